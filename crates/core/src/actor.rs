//! Actor identity and the access-policy seam.
//!
//! Authentication and role lookup live outside the core. Callers hand in an [`Actor`] produced
//! by that collaborator, and the core asks an [`AccessPolicy`] whether the actor may perform a
//! guarded action. The policy answer is treated as a plain precondition.

use crate::error::{CareError, CareResult};
use crate::NonEmptyText;

/// The person performing an operation, as identified by the external auth collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    /// Stable identifier of the user (staff number, username).
    pub id: NonEmptyText,

    /// Role string assigned by the auth collaborator (e.g. "doctor", "admin").
    pub role: NonEmptyText,
}

impl Actor {
    pub fn new(id: impl AsRef<str>, role: impl AsRef<str>) -> CareResult<Self> {
        Ok(Self {
            id: NonEmptyText::new(id)?,
            role: NonEmptyText::new(role)?,
        })
    }
}

/// Operations whose caller must be cleared by the access policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GuardedAction {
    Unlock,
    WriteDischargeSummary,
    FinalDischarge,
}

impl GuardedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardedAction::Unlock => "unlock a visit",
            GuardedAction::WriteDischargeSummary => "write a discharge summary",
            GuardedAction::FinalDischarge => "perform final discharge",
        }
    }
}

impl std::fmt::Display for GuardedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether an actor may perform a guarded action.
pub trait AccessPolicy: Send + Sync + std::fmt::Debug {
    fn permits(&self, actor: &Actor, action: GuardedAction) -> bool;
}

pub(crate) fn authorize(
    policy: &dyn AccessPolicy,
    actor: &Actor,
    action: GuardedAction,
) -> CareResult<()> {
    if policy.permits(actor, action) {
        return Ok(());
    }

    tracing::warn!(actor = %actor.id, role = %actor.role, %action, "access denied");
    Err(CareError::Unauthorized {
        actor: actor.id.to_string(),
        role: actor.role.to_string(),
        action,
    })
}
