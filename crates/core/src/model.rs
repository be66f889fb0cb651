//! Domain records for the visit core.
//!
//! The Visit is the aggregate root. Bed assignments, medical records, billings and discharge
//! summaries are keyed by `visit_id` but stored as independent rows; their consistency comes
//! from the workflow transactions in [`crate::repositories`], not from any owning structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Error returned when a stored or submitted label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed, snake_case-labelled enum with `as_str`, `Display` and `FromStr`.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseLabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($name::$variant), )+
                    other => Err(ParseLabelError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

labelled_enum! {
    /// The care pathway a visit belongs to.
    VisitType ("visit type") {
        Outpatient => "outpatient",
        Inpatient => "inpatient",
        Emergency => "emergency",
    }
}

labelled_enum! {
    /// Lifecycle status of a visit. See [`crate::status`] for the transition table.
    VisitStatus ("visit status") {
        Registered => "registered",
        Waiting => "waiting",
        InExamination => "in_examination",
        Examined => "examined",
        ReadyForBilling => "ready_for_billing",
        Billed => "billed",
        Paid => "paid",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

labelled_enum! {
    RoomStatus ("room status") {
        Available => "available",
        Occupied => "occupied",
        Maintenance => "maintenance",
    }
}

labelled_enum! {
    PaymentStatus ("payment status") {
        Pending => "pending",
        Partial => "partial",
        Paid => "paid",
    }
}

/// One episode of a patient's contact with the clinic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Visit {
    pub id: Uuid,
    /// Identifier owned by the external patient registry.
    pub patient_id: String,
    pub visit_type: VisitType,
    pub status: VisitStatus,
    pub arrival_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub admission_date: Option<DateTime<Utc>>,
    pub discharge_date: Option<DateTime<Utc>>,
    pub room_id: Option<Uuid>,
    pub poli_id: Option<String>,
    pub queue_number: Option<i64>,
    pub triage_level: Option<u8>,
    pub disposition: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Room {
    pub id: Uuid,
    /// Human label used in messages, e.g. "101".
    pub name: String,
    pub bed_count: i64,
    pub available_beds: i64,
    pub status: RoomStatus,
}

/// Active or historical occupancy of one bed by one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BedAssignment {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub room_id: Uuid,
    pub bed_number: i64,
    pub assigned_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
}

impl BedAssignment {
    pub fn is_active(&self) -> bool {
        self.discharged_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MedicalRecord {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub is_locked: bool,
    pub is_draft: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Amounts are integer minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Billing {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub total_amount: i64,
    pub paid_amount: i64,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Billing {
    pub fn outstanding(&self) -> i64 {
        self.total_amount - self.paid_amount
    }

    /// True once any money has moved against this billing.
    pub fn has_payment_progress(&self) -> bool {
        self.paid_amount > 0 || self.payment_status != PaymentStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BillingItem {
    pub id: Uuid,
    pub billing_id: Uuid,
    pub description: String,
    pub amount: i64,
}

/// Clinical closing note for an inpatient stay. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DischargeSummary {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub diagnosis: String,
    pub treatment: String,
    pub condition: String,
    pub follow_up: Option<String>,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}
