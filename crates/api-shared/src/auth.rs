//! Actor identity and role checks for the API layer.
//!
//! Authentication happens upstream: a gateway verifies the caller and forwards the result as
//! the `x-actor-id` and `x-actor-role` headers. This module turns those headers into a core
//! [`Actor`] and supplies [`RolePolicy`], the [`AccessPolicy`] used by the server.

use clinic_core::{AccessPolicy, Actor, CareError, CareResult, GuardedAction};
use http::HeaderMap;
use std::collections::BTreeSet;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Roles allowed to unlock a visit when `CLINIC_UNLOCK_ROLES` is unset.
pub const DEFAULT_UNLOCK_ROLES: &str = "doctor,admin";
/// Roles allowed to write a discharge summary when `CLINIC_DISCHARGE_ROLES` is unset.
pub const DEFAULT_DISCHARGE_ROLES: &str = "doctor";
/// Roles allowed to perform final discharge when `CLINIC_FINAL_DISCHARGE_ROLES` is unset.
pub const DEFAULT_FINAL_DISCHARGE_ROLES: &str = "doctor,admin,nurse";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("{0} header must be non-empty visible ASCII")]
    InvalidHeader(&'static str),
}

fn header_value(headers: &HeaderMap, name: &'static str) -> Result<String, AuthError> {
    let value = headers.get(name).ok_or(AuthError::MissingHeader(name))?;
    let value = value
        .to_str()
        .map_err(|_| AuthError::InvalidHeader(name))?
        .trim();
    if value.is_empty() {
        return Err(AuthError::MissingHeader(name));
    }
    Ok(value.to_string())
}

/// Builds the acting user from the forwarded identity headers.
///
/// # Errors
/// Returns `AuthError` if either header is absent, empty or not valid text.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AuthError> {
    let id = header_value(headers, ACTOR_ID_HEADER)?;
    let role = header_value(headers, ACTOR_ROLE_HEADER)?;
    Actor::new(id, role).map_err(|_| AuthError::InvalidHeader(ACTOR_ID_HEADER))
}

/// Role-list access policy.
///
/// Each guarded action has its own set of role names. Role comparison ignores ASCII case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolePolicy {
    unlock: BTreeSet<String>,
    discharge: BTreeSet<String>,
    final_discharge: BTreeSet<String>,
}

impl RolePolicy {
    pub fn new(
        unlock: BTreeSet<String>,
        discharge: BTreeSet<String>,
        final_discharge: BTreeSet<String>,
    ) -> Self {
        Self {
            unlock,
            discharge,
            final_discharge,
        }
    }

    /// Resolve the policy from optional environment values, falling back to the defaults.
    ///
    /// # Errors
    /// Returns `CareError::InvalidInput` if a value is set but names no role.
    pub fn from_env_values(
        unlock: Option<String>,
        discharge: Option<String>,
        final_discharge: Option<String>,
    ) -> CareResult<Self> {
        let policy = Self::new(
            roles_from_env_value("CLINIC_UNLOCK_ROLES", unlock, DEFAULT_UNLOCK_ROLES)?,
            roles_from_env_value("CLINIC_DISCHARGE_ROLES", discharge, DEFAULT_DISCHARGE_ROLES)?,
            roles_from_env_value(
                "CLINIC_FINAL_DISCHARGE_ROLES",
                final_discharge,
                DEFAULT_FINAL_DISCHARGE_ROLES,
            )?,
        );
        tracing::debug!(?policy, "role policy resolved");
        Ok(policy)
    }

    fn roles_for(&self, action: GuardedAction) -> &BTreeSet<String> {
        match action {
            GuardedAction::Unlock => &self.unlock,
            GuardedAction::WriteDischargeSummary => &self.discharge,
            GuardedAction::FinalDischarge => &self.final_discharge,
        }
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::new(
            parse_roles(DEFAULT_UNLOCK_ROLES),
            parse_roles(DEFAULT_DISCHARGE_ROLES),
            parse_roles(DEFAULT_FINAL_DISCHARGE_ROLES),
        )
    }
}

impl AccessPolicy for RolePolicy {
    fn permits(&self, actor: &Actor, action: GuardedAction) -> bool {
        self.roles_for(action)
            .contains(&actor.role.as_str().to_ascii_lowercase())
    }
}

fn parse_roles(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn roles_from_env_value(
    var: &str,
    value: Option<String>,
    default: &str,
) -> CareResult<BTreeSet<String>> {
    match value {
        None => Ok(parse_roles(default)),
        Some(value) => {
            let roles = parse_roles(&value);
            if roles.is_empty() {
                return Err(CareError::InvalidInput(format!(
                    "{var} must list at least one role"
                )));
            }
            Ok(roles)
        }
    }
}
