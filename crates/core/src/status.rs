//! Visit status state machine.
//!
//! Every status change in the crate goes through [`transition`], which consults the single
//! transition table below. Some edges belong to a workflow (locking a record, taking a payment,
//! final discharge) and are refused when requested from anywhere else, so the direct status
//! endpoint cannot skip the side effects those workflows carry.

use crate::error::{CareError, CareResult};
use crate::model::{Visit, VisitStatus, VisitType};
use chrono::{DateTime, Utc};
use TransitionOrigin as O;
use VisitStatus as S;

/// Where a transition request came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// Direct status update by a caller (`PATCH /visit/status`).
    Direct,
    Examination,
    RecordLock,
    RecordUnlock,
    BillingCreated,
    Payment,
    ClinicalDischarge,
    FinalDischarge,
    Handover,
}

impl TransitionOrigin {
    pub fn workflow_name(&self) -> &'static str {
        match self {
            TransitionOrigin::Direct => "direct status update",
            TransitionOrigin::Examination => "begin examination",
            TransitionOrigin::RecordLock => "medical record lock",
            TransitionOrigin::RecordUnlock => "visit unlock",
            TransitionOrigin::BillingCreated => "billing creation",
            TransitionOrigin::Payment => "payment",
            TransitionOrigin::ClinicalDischarge => "clinical discharge",
            TransitionOrigin::FinalDischarge => "final discharge",
            TransitionOrigin::Handover => "emergency handover",
        }
    }
}

/// Inputs that accompany a transition request.
#[derive(Clone, Copy, Debug)]
pub struct TransitionContext<'a> {
    pub origin: TransitionOrigin,
    /// Appended to the visit notes when cancelling.
    pub reason: Option<&'a str>,
    pub now: DateTime<Utc>,
}

impl<'a> TransitionContext<'a> {
    pub fn new(origin: TransitionOrigin, now: DateTime<Utc>) -> Self {
        Self {
            origin,
            reason: None,
            now,
        }
    }

    pub fn with_reason(mut self, reason: &'a str) -> Self {
        self.reason = Some(reason);
        self
    }
}

#[derive(Clone, Copy, Debug)]
enum Guard {
    Open,
    Only(&'static [TransitionOrigin]),
    /// Restricted for inpatient visits, open for the other types.
    InpatientOnly(&'static [TransitionOrigin]),
}

#[derive(Clone, Copy, Debug)]
struct Edge {
    to: VisitStatus,
    guard: Guard,
}

const fn open(to: VisitStatus) -> Edge {
    Edge {
        to,
        guard: Guard::Open,
    }
}

const fn only(to: VisitStatus, origins: &'static [TransitionOrigin]) -> Edge {
    Edge {
        to,
        guard: Guard::Only(origins),
    }
}

const EXAMINATION_ENTRY: &[TransitionOrigin] = &[O::Examination, O::Handover];
const BILLING_ENTRY: &[TransitionOrigin] = &[O::RecordLock, O::ClinicalDischarge];
const REVERSAL: &[TransitionOrigin] = &[O::RecordUnlock];
const REQUEUE: &[TransitionOrigin] = &[O::Handover];

const REGISTERED: &[Edge] = &[
    open(S::Waiting),
    only(S::InExamination, EXAMINATION_ENTRY),
    open(S::Cancelled),
];
const WAITING: &[Edge] = &[
    only(S::InExamination, EXAMINATION_ENTRY),
    open(S::Cancelled),
];
const IN_EXAMINATION: &[Edge] = &[
    only(S::Waiting, REQUEUE),
    open(S::Examined),
    only(S::ReadyForBilling, BILLING_ENTRY),
    open(S::Cancelled),
];
const EXAMINED: &[Edge] = &[
    only(S::Waiting, REQUEUE),
    open(S::InExamination),
    only(S::ReadyForBilling, BILLING_ENTRY),
    open(S::Cancelled),
];
const READY_FOR_BILLING: &[Edge] = &[
    only(S::InExamination, REVERSAL),
    only(S::Billed, &[O::BillingCreated]),
    open(S::Cancelled),
];
const BILLED: &[Edge] = &[
    only(S::InExamination, REVERSAL),
    only(S::Paid, &[O::Payment]),
    open(S::Cancelled),
];
const PAID: &[Edge] = &[
    Edge {
        to: S::Completed,
        guard: Guard::InpatientOnly(&[O::FinalDischarge]),
    },
    open(S::Cancelled),
];

/// The transition table, keyed by current status.
fn edges(from: VisitStatus) -> &'static [Edge] {
    match from {
        S::Registered => REGISTERED,
        S::Waiting => WAITING,
        S::InExamination => IN_EXAMINATION,
        S::Examined => EXAMINED,
        S::ReadyForBilling => READY_FOR_BILLING,
        S::Billed => BILLED,
        S::Paid => PAID,
        S::Completed | S::Cancelled => &[],
    }
}

impl VisitStatus {
    /// `completed` and `cancelled` have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        edges(*self).is_empty()
    }

    /// Statuses reachable from this one in a single step, ignoring origin guards.
    pub fn next_statuses(&self) -> impl Iterator<Item = VisitStatus> {
        edges(*self).iter().map(|edge| edge.to)
    }
}

/// True iff `next` appears in the transition table under `current`.
pub fn can_transition(current: VisitStatus, next: VisitStatus) -> bool {
    edges(current).iter().any(|edge| edge.to == next)
}

/// Move `visit` to `next`, enforcing the table and origin guards and applying side effects.
///
/// Side effects:
/// - entering `in_examination` stamps `start_time` if unset,
/// - entering `completed` stamps `end_time` and, for inpatient visits, `discharge_date`
///   if unset,
/// - entering `cancelled` appends the reason to `notes`.
///
/// The visit is left untouched when the transition is refused. Persisting the change is the
/// caller's job, inside the same transaction that validated it.
///
/// # Errors
///
/// - [`CareError::InvalidTransition`] if the edge does not exist,
/// - [`CareError::WorkflowRequired`] if the edge exists but belongs to another workflow.
pub fn transition(
    visit: &mut Visit,
    next: VisitStatus,
    ctx: &TransitionContext<'_>,
) -> CareResult<()> {
    let from = visit.status;
    let edge = edges(from)
        .iter()
        .find(|edge| edge.to == next)
        .ok_or(CareError::InvalidTransition { from, to: next })?;

    let allowed = match edge.guard {
        Guard::Open => None,
        Guard::Only(origins) => Some(origins),
        Guard::InpatientOnly(origins) if visit.visit_type == VisitType::Inpatient => Some(origins),
        Guard::InpatientOnly(_) => None,
    };
    if let Some(origins) = allowed {
        if !origins.contains(&ctx.origin) {
            return Err(CareError::WorkflowRequired {
                from,
                to: next,
                workflow: origins
                    .first()
                    .map(TransitionOrigin::workflow_name)
                    .unwrap_or("another workflow"),
            });
        }
    }

    match next {
        S::InExamination => {
            visit.start_time.get_or_insert(ctx.now);
        }
        S::Completed => {
            visit.end_time = Some(ctx.now);
            if visit.visit_type == VisitType::Inpatient {
                visit.discharge_date.get_or_insert(ctx.now);
            }
        }
        S::Cancelled => {
            if let Some(reason) = ctx.reason {
                let line = format!("Cancelled: {reason}");
                visit.notes = Some(match visit.notes.take() {
                    Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
                    _ => line,
                });
            }
        }
        _ => {}
    }

    tracing::debug!(
        visit = %visit.id,
        %from,
        to = %next,
        origin = ctx.origin.workflow_name(),
        "visit status transition"
    );
    visit.status = next;
    Ok(())
}
