use crate::actor::GuardedAction;
use crate::model::{PaymentStatus, VisitStatus};
use serde::Serialize;
use uuid::Uuid;

/// Coarse classification of a [`CareError`], used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    CapacityExceeded,
    AlreadyInState,
    PreconditionFailed,
    Unauthorized,
    InvalidInput,
    /// Storage-level serialization conflict. The only retryable kind.
    Conflict,
    Storage,
}

impl ErrorKind {
    /// Wire label, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::AlreadyInState => "already_in_state",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CareError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("visit {0} not found")]
    VisitNotFound(Uuid),
    #[error("room {0} not found")]
    RoomNotFound(Uuid),
    #[error("medical record {0} not found")]
    RecordNotFound(Uuid),
    #[error("bed assignment {0} not found")]
    AssignmentNotFound(Uuid),

    #[error("cannot move visit from {from} to {to}")]
    InvalidTransition { from: VisitStatus, to: VisitStatus },
    #[error("moving visit from {from} to {to} is reserved for {workflow}")]
    WorkflowRequired {
        from: VisitStatus,
        to: VisitStatus,
        workflow: &'static str,
    },

    #[error("visit {0} is not an inpatient visit")]
    NotInpatient(Uuid),
    #[error("visit {0} is not an emergency visit")]
    NotEmergency(Uuid),
    #[error("visit {visit} is already {status}")]
    VisitClosed { visit: Uuid, status: VisitStatus },

    #[error("room {room} has no available beds")]
    RoomFull { room: String },
    #[error("bed {bed} does not exist in room {room} (beds 1 to {bed_count})")]
    InvalidBedNumber {
        room: String,
        bed: i64,
        bed_count: i64,
    },
    #[error("bed {bed} in room {room} already occupied")]
    BedOccupied { room: String, bed: i64 },
    #[error("room {room} is under maintenance")]
    RoomUnderMaintenance { room: String },

    #[error("visit {0} already has an active bed assignment")]
    AlreadyAssigned(Uuid),
    #[error("visit {0} has no active bed assignment")]
    NotAssigned(Uuid),
    #[error("bed assignment {0} was already discharged")]
    AlreadyDischarged(Uuid),
    #[error("visit {0} still holds a bed; release it or discharge the patient first")]
    BedStillAssigned(Uuid),

    #[error("medical record {0} is already locked")]
    AlreadyLocked(Uuid),
    #[error("medical record for visit {0} already exists")]
    RecordExists(Uuid),
    #[error("visit {visit} is {status}; only locked or billed visits can be unlocked")]
    NotLocked { visit: Uuid, status: VisitStatus },
    #[error(
        "payment already started for visit {visit} (paid {paid_amount}, status {status}); cannot unlock"
    )]
    PaymentInProgress {
        visit: Uuid,
        paid_amount: i64,
        status: PaymentStatus,
    },

    #[error("billing for visit {0} already exists")]
    BillingExists(Uuid),
    #[error("billing for visit {0} does not exist")]
    BillingMissing(Uuid),
    #[error("billing for visit {visit} is {status}: paid {paid_amount} of {total_amount}")]
    PaymentIncomplete {
        visit: Uuid,
        status: PaymentStatus,
        paid_amount: i64,
        total_amount: i64,
    },
    #[error("billing for visit {0} is already paid")]
    AlreadyPaid(Uuid),
    #[error("payment of {amount} exceeds outstanding balance {outstanding} for visit {visit}")]
    Overpayment {
        visit: Uuid,
        amount: i64,
        outstanding: i64,
    },

    #[error("discharge summary for visit {0} already exists")]
    DischargeSummaryExists(Uuid),
    #[error("discharge summary for visit {0} is missing")]
    DischargeSummaryMissing(Uuid),
    #[error("visit {0} is already ready for billing")]
    AlreadyReadyForBilling(Uuid),

    #[error("actor {actor} ({role}) may not {action}")]
    Unauthorized {
        actor: String,
        role: String,
        action: GuardedAction,
    },

    #[error("storage conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("stored data violates invariant: {0}")]
    InvariantViolated(String),
}

impl CareError {
    pub fn kind(&self) -> ErrorKind {
        use CareError::*;
        match self {
            InvalidInput(_) | MissingField(_) => ErrorKind::InvalidInput,
            VisitNotFound(_) | RoomNotFound(_) | RecordNotFound(_) | AssignmentNotFound(_) => {
                ErrorKind::NotFound
            }
            InvalidTransition { .. } | WorkflowRequired { .. } | VisitClosed { .. } => {
                ErrorKind::InvalidTransition
            }
            RoomFull { .. }
            | InvalidBedNumber { .. }
            | BedOccupied { .. }
            | RoomUnderMaintenance { .. } => ErrorKind::CapacityExceeded,
            AlreadyAssigned(_)
            | AlreadyDischarged(_)
            | AlreadyLocked(_)
            | RecordExists(_)
            | BillingExists(_)
            | AlreadyPaid(_)
            | DischargeSummaryExists(_)
            | AlreadyReadyForBilling(_) => ErrorKind::AlreadyInState,
            NotInpatient(_)
            | NotEmergency(_)
            | NotAssigned(_)
            | BedStillAssigned(_)
            | NotLocked { .. }
            | PaymentInProgress { .. }
            | BillingMissing(_)
            | PaymentIncomplete { .. }
            | Overpayment { .. }
            | DischargeSummaryMissing(_) => ErrorKind::PreconditionFailed,
            Unauthorized { .. } => ErrorKind::Unauthorized,
            Conflict { .. } => ErrorKind::Conflict,
            Database(e) if is_serialization_conflict(e) => ErrorKind::Conflict,
            Database(_) | InvariantViolated(_) => ErrorKind::Storage,
        }
    }

    /// Name of the rule that rejected the operation, for callers that render specific messages.
    pub fn rule(&self) -> &'static str {
        use CareError::*;
        match self {
            InvalidInput(_) => "InvalidInput",
            MissingField(_) => "MissingField",
            VisitNotFound(_) => "VisitNotFound",
            RoomNotFound(_) => "RoomNotFound",
            RecordNotFound(_) => "RecordNotFound",
            AssignmentNotFound(_) => "AssignmentNotFound",
            InvalidTransition { .. } => "InvalidTransition",
            WorkflowRequired { .. } => "WorkflowRequired",
            NotInpatient(_) => "NotInpatient",
            NotEmergency(_) => "NotEmergency",
            VisitClosed { .. } => "VisitClosed",
            RoomFull { .. } => "RoomFull",
            InvalidBedNumber { .. } => "InvalidBedNumber",
            BedOccupied { .. } => "BedOccupied",
            RoomUnderMaintenance { .. } => "RoomUnderMaintenance",
            AlreadyAssigned(_) => "AlreadyAssigned",
            NotAssigned(_) => "NotAssigned",
            AlreadyDischarged(_) => "AlreadyDischarged",
            BedStillAssigned(_) => "BedStillAssigned",
            AlreadyLocked(_) => "AlreadyLocked",
            RecordExists(_) => "RecordExists",
            NotLocked { .. } => "NotLocked",
            PaymentInProgress { .. } => "PaymentInProgress",
            BillingExists(_) => "BillingExists",
            BillingMissing(_) => "BillingMissing",
            PaymentIncomplete { .. } => "PaymentIncomplete",
            AlreadyPaid(_) => "AlreadyPaid",
            Overpayment { .. } => "Overpayment",
            DischargeSummaryExists(_) => "DischargeSummaryExists",
            DischargeSummaryMissing(_) => "DischargeSummaryMissing",
            AlreadyReadyForBilling(_) => "AlreadyReadyForBilling",
            Unauthorized { .. } => "Unauthorized",
            Conflict { .. } => "SerializationConflict",
            Database(e) if is_serialization_conflict(e) => "SerializationConflict",
            Database(_) => "Storage",
            InvariantViolated(_) => "InvariantViolated",
        }
    }

    /// True only for storage-level serialization conflicts.
    ///
    /// Business-rule rejections are never retryable; the whole operation must be re-validated
    /// from scratch when a conflict is retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

fn is_serialization_conflict(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

impl From<clinic_types::TextError> for CareError {
    fn from(e: clinic_types::TextError) -> Self {
        CareError::InvalidInput(e.to_string())
    }
}

pub type CareResult<T> = std::result::Result<T, CareError>;
