//! Emergency handover.
//!
//! An emergency visit ends its emergency phase by becoming either an outpatient visit queued at
//! a poli, or an inpatient admission with a bed. The type change, the status change and the bed
//! assignment commit together or not at all.

use crate::actor::Actor;
use crate::constants::{DISPOSITION_HANDOVER_INPATIENT, DISPOSITION_HANDOVER_OUTPATIENT};
use crate::error::{CareError, CareResult};
use crate::model::{BedAssignment, Visit, VisitStatus, VisitType};
use crate::repositories::beds::assign_in_tx;
use crate::status::{self, TransitionContext, TransitionOrigin};
use crate::store::rows;
use crate::store::Store;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Where an emergency visit is handed over to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HandoverTarget {
    Outpatient,
    Inpatient,
}

/// Handover destination. Outpatient needs `poli_id`; inpatient needs `room_id` and
/// `bed_number`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, ToSchema)]
pub struct HandoverRequest {
    pub target: HandoverTarget,
    #[serde(default)]
    pub poli_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<Uuid>,
    #[serde(default)]
    pub bed_number: Option<i64>,
}

enum Destination<'a> {
    Poli(&'a str),
    Bed { room_id: Uuid, bed_number: i64 },
}

impl HandoverRequest {
    fn destination(&self) -> CareResult<Destination<'_>> {
        match self.target {
            HandoverTarget::Outpatient => {
                let poli = self.poli_id.as_deref().ok_or(CareError::MissingField("poli_id"))?;
                let poli = poli.trim();
                if poli.is_empty() {
                    return Err(CareError::InvalidInput("poli_id must not be empty".into()));
                }
                Ok(Destination::Poli(poli))
            }
            HandoverTarget::Inpatient => Ok(Destination::Bed {
                room_id: self.room_id.ok_or(CareError::MissingField("room_id"))?,
                bed_number: self.bed_number.ok_or(CareError::MissingField("bed_number"))?,
            }),
        }
    }
}

/// The visit after handover, plus the bed it was given for an inpatient handover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct HandoverOutcome {
    pub visit: Visit,
    pub assignment: Option<BedAssignment>,
}

#[derive(Clone, Debug)]
pub struct HandoverService {
    store: Store,
}

impl HandoverService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Converts an emergency visit into an outpatient or inpatient visit.
    ///
    /// # Errors
    ///
    /// - `VisitNotFound`, `NotEmergency`,
    /// - `MissingField` / `InvalidInput` for an incomplete destination,
    /// - `InvalidTransition` once the visit has reached billing,
    /// - any bed assignment error for an inpatient handover.
    pub fn handover(
        &self,
        visit_id: Uuid,
        request: &HandoverRequest,
        actor: &Actor,
    ) -> CareResult<HandoverOutcome> {
        let outcome = self.store.write("handover", |tx| {
            let now = Utc::now();
            let mut visit = rows::require_visit(tx, visit_id)?;
            if visit.visit_type != VisitType::Emergency {
                return Err(CareError::NotEmergency(visit_id));
            }
            let destination = request.destination()?;
            if !matches!(
                visit.status,
                VisitStatus::Registered
                    | VisitStatus::Waiting
                    | VisitStatus::InExamination
                    | VisitStatus::Examined
            ) {
                let to = match destination {
                    Destination::Poli(_) => VisitStatus::Waiting,
                    Destination::Bed { .. } => VisitStatus::InExamination,
                };
                return Err(CareError::InvalidTransition {
                    from: visit.status,
                    to,
                });
            }

            let ctx = TransitionContext::new(TransitionOrigin::Handover, now);
            visit.triage_level = None;
            let assignment = match destination {
                Destination::Poli(poli) => {
                    visit.visit_type = VisitType::Outpatient;
                    visit.disposition = Some(DISPOSITION_HANDOVER_OUTPATIENT.to_string());
                    visit.queue_number = Some(rows::next_queue_number(
                        tx,
                        poli,
                        visit.arrival_time.date_naive(),
                    )?);
                    visit.poli_id = Some(poli.to_string());
                    if visit.status != VisitStatus::Waiting {
                        status::transition(&mut visit, VisitStatus::Waiting, &ctx)?;
                    }
                    None
                }
                Destination::Bed {
                    room_id,
                    bed_number,
                } => {
                    visit.visit_type = VisitType::Inpatient;
                    visit.disposition = Some(DISPOSITION_HANDOVER_INPATIENT.to_string());
                    visit.poli_id = None;
                    visit.queue_number = None;
                    let assignment = assign_in_tx(tx, &mut visit, room_id, bed_number, now)?;
                    if visit.status != VisitStatus::InExamination {
                        status::transition(&mut visit, VisitStatus::InExamination, &ctx)?;
                    }
                    Some(assignment)
                }
            };

            rows::update_visit(tx, &visit)?;
            Ok(HandoverOutcome { visit, assignment })
        })?;

        tracing::info!(
            visit = %visit_id,
            actor = %actor.id,
            visit_type = %outcome.visit.visit_type,
            status = %outcome.visit.status,
            "emergency visit handed over"
        );
        Ok(outcome)
    }
}
