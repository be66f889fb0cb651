//! # Clinic Core
//!
//! Visit lifecycle and resource-allocation core for the clinic system.
//!
//! This crate owns:
//! - the visit status state machine ([`status`]),
//! - room and bed capacity ([`repositories::beds`]),
//! - medical record locking and the billing gate ([`repositories::records`],
//!   [`repositories::billing`]),
//! - the emergency handover and inpatient discharge workflows.
//!
//! Every operation runs as one transaction against the SQLite store.
//!
//! **No API concerns**: HTTP servers, header parsing and role configuration belong in
//! `api-rest` or `api-shared`.

pub mod actor;
pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod repositories;
pub mod status;
pub mod store;

pub use actor::{AccessPolicy, Actor, GuardedAction};
pub use clinic_types::{NonEmptyText, TextError, TriageLevel};
pub use config::CoreConfig;
pub use error::{CareError, CareResult, ErrorKind};
pub use model::{
    BedAssignment, Billing, BillingItem, DischargeSummary, MedicalRecord, PaymentStatus, Room,
    RoomStatus, Visit, VisitStatus, VisitType,
};
pub use repositories::beds::{BedService, RoomOccupancy};
pub use repositories::billing::{BillingService, BillingStatement, NewBillingItem};
pub use repositories::discharge::{DischargeService, NewDischargeSummary};
pub use repositories::handover::{HandoverOutcome, HandoverRequest, HandoverService, HandoverTarget};
pub use repositories::records::RecordService;
pub use repositories::visits::{NewVisit, VisitOverview, VisitService};
pub use status::{can_transition, TransitionContext, TransitionOrigin};
pub use store::Store;

use std::sync::Arc;

/// All services over one store, sharing one access policy.
#[derive(Clone, Debug)]
pub struct ClinicCore {
    pub visits: VisitService,
    pub beds: BedService,
    pub records: RecordService,
    pub billing: BillingService,
    pub discharge: DischargeService,
    pub handover: HandoverService,
}

impl ClinicCore {
    /// Opens the store described by `cfg` and builds every service over it.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::Database`] if the store cannot be opened or migrated.
    pub fn open(cfg: CoreConfig, policy: Arc<dyn AccessPolicy>) -> CareResult<Self> {
        let store = Store::open(Arc::new(cfg))?;
        Ok(Self::with_store(store, policy))
    }

    pub fn with_store(store: Store, policy: Arc<dyn AccessPolicy>) -> Self {
        Self {
            visits: VisitService::new(store.clone()),
            beds: BedService::new(store.clone()),
            records: RecordService::new(store.clone(), policy.clone()),
            billing: BillingService::new(store.clone()),
            discharge: DischargeService::new(store.clone(), policy),
            handover: HandoverService::new(store),
        }
    }
}
