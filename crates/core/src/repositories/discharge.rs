//! Two-phase inpatient discharge.
//!
//! Phase one is clinical: a doctor writes the discharge summary and the visit moves to billing.
//! Phase two is administrative: once the summary exists and the bill is settled, the bed is
//! released and the visit is completed. Both phases are single transactions.

use crate::actor::{authorize, AccessPolicy, Actor, GuardedAction};
use crate::error::{CareError, CareResult};
use crate::model::{DischargeSummary, Visit, VisitStatus, VisitType};
use crate::repositories::beds::release_in_tx;
use crate::repositories::billing::ensure_paid;
use crate::status::{self, TransitionContext, TransitionOrigin};
use crate::store::rows;
use crate::store::Store;
use crate::NonEmptyText;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Clinical content of a discharge summary.
#[derive(Clone, Debug)]
pub struct NewDischargeSummary {
    pub diagnosis: NonEmptyText,
    pub treatment: NonEmptyText,
    pub condition: NonEmptyText,
    pub follow_up: Option<NonEmptyText>,
}

#[derive(Clone, Debug)]
pub struct DischargeService {
    store: Store,
    policy: Arc<dyn AccessPolicy>,
}

impl DischargeService {
    pub fn new(store: Store, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    /// Records the discharge summary and moves the visit to `ready_for_billing`.
    ///
    /// The visit's medical record, if any, is locked in the same transaction.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `VisitNotFound`, `NotInpatient`, `DischargeSummaryExists`,
    /// `AlreadyReadyForBilling`, then whatever the state machine refuses.
    pub fn clinical_discharge(
        &self,
        visit_id: Uuid,
        summary: &NewDischargeSummary,
        actor: &Actor,
    ) -> CareResult<DischargeSummary> {
        authorize(self.policy.as_ref(), actor, GuardedAction::WriteDischargeSummary)?;

        let stored = self.store.write("clinical_discharge", |tx| {
            let now = Utc::now();
            let mut visit = rows::require_visit(tx, visit_id)?;
            if visit.visit_type != VisitType::Inpatient {
                return Err(CareError::NotInpatient(visit_id));
            }
            if rows::summary_for_visit(tx, visit_id)?.is_some() {
                return Err(CareError::DischargeSummaryExists(visit_id));
            }
            if visit.status == VisitStatus::ReadyForBilling {
                return Err(CareError::AlreadyReadyForBilling(visit_id));
            }
            status::transition(
                &mut visit,
                VisitStatus::ReadyForBilling,
                &TransitionContext::new(TransitionOrigin::ClinicalDischarge, now),
            )?;

            let stored = DischargeSummary {
                id: Uuid::new_v4(),
                visit_id,
                diagnosis: summary.diagnosis.to_string(),
                treatment: summary.treatment.to_string(),
                condition: summary.condition.to_string(),
                follow_up: summary.follow_up.as_ref().map(NonEmptyText::to_string),
                author_id: actor.id.to_string(),
                created_at: now,
            };
            rows::insert_summary(tx, &stored)?;
            rows::update_visit(tx, &visit)?;

            if let Some(mut record) = rows::record_for_visit(tx, visit_id)? {
                if !record.is_locked {
                    record.is_locked = true;
                    record.is_draft = false;
                    record.locked_at = Some(now);
                    record.locked_by = Some(actor.id.to_string());
                    rows::update_record_lock(tx, &record)?;
                }
            }
            Ok(stored)
        })?;

        tracing::info!(visit = %visit_id, actor = %actor.id, "clinical discharge recorded");
        Ok(stored)
    }

    /// Releases the bed and completes a paid inpatient visit.
    ///
    /// The gates are checked in a fixed order whatever the caller did before:
    /// summary present, bill present, bill paid.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `VisitNotFound`, `DischargeSummaryMissing`, `BillingMissing`,
    /// `PaymentIncomplete`.
    pub fn final_discharge(&self, visit_id: Uuid, actor: &Actor) -> CareResult<Visit> {
        authorize(self.policy.as_ref(), actor, GuardedAction::FinalDischarge)?;

        let visit = self.store.write("final_discharge", |tx| {
            let now = Utc::now();
            let mut visit = rows::require_visit(tx, visit_id)?;
            if rows::summary_for_visit(tx, visit_id)?.is_none() {
                return Err(CareError::DischargeSummaryMissing(visit_id));
            }
            ensure_paid(visit_id, rows::billing_for_visit(tx, visit_id)?.as_ref())?;

            status::transition(
                &mut visit,
                VisitStatus::Completed,
                &TransitionContext::new(TransitionOrigin::FinalDischarge, now),
            )?;
            if let Some(assignment) = rows::active_assignment_for_visit(tx, visit_id)? {
                release_in_tx(tx, assignment.id, now)?;
            }
            rows::update_visit(tx, &visit)?;
            Ok(visit)
        })?;

        tracing::info!(visit = %visit_id, actor = %actor.id, "visit discharged");
        Ok(visit)
    }

    pub fn summary_for_visit(&self, visit_id: Uuid) -> CareResult<Option<DischargeSummary>> {
        self.store.read(|conn| rows::summary_for_visit(conn, visit_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::repositories::beds::BedService;
    use crate::repositories::billing::tests::items;
    use crate::repositories::billing::BillingService;
    use crate::repositories::tests::{
        actor, examined_visit, register, register_in_status, role_policy, room_name,
    };
    use crate::store::tests::temp_store;

    fn summary() -> NewDischargeSummary {
        NewDischargeSummary {
            diagnosis: NonEmptyText::new("community acquired pneumonia").unwrap(),
            treatment: NonEmptyText::new("IV antibiotics, oxygen").unwrap(),
            condition: NonEmptyText::new("stable").unwrap(),
            follow_up: Some(NonEmptyText::new("clinic review in 2 weeks").unwrap()),
        }
    }

    fn setup() -> (tempfile::TempDir, Store, DischargeService) {
        let (dir, store) = temp_store();
        let discharge = DischargeService::new(store.clone(), role_policy(&["doctor"]));
        (dir, store, discharge)
    }

    #[test]
    fn test_full_inpatient_discharge_releases_bed() {
        let (_dir, store, discharge) = setup();
        let beds = BedService::new(store.clone());
        let billing = BillingService::new(store.clone());
        let doctor = actor("dr-7", "doctor");

        let room = beds.create_room(&room_name("W1"), 2).unwrap();
        let (visit, record) = examined_visit(&store, VisitType::Inpatient);
        beds.assign(visit.id, room.id, 1).unwrap();
        assert_eq!(beds.get_room(room.id).unwrap().available_beds, 1);

        let stored = discharge.clinical_discharge(visit.id, &summary(), &doctor).unwrap();
        assert_eq!(stored.author_id, "dr-7");
        let record = store
            .read(|c| rows::find_record(c, record.id))
            .unwrap()
            .unwrap();
        assert!(record.is_locked);

        billing.create_billing(visit.id, &items(&[500])).unwrap();
        billing.record_payment(visit.id, 500).unwrap();

        let completed = discharge.final_discharge(visit.id, &doctor).unwrap();
        assert_eq!(completed.status, VisitStatus::Completed);
        assert!(completed.discharge_date.is_some());
        assert!(completed.end_time.is_some());

        assert_eq!(beds.get_room(room.id).unwrap().available_beds, 2);
        assert!(beds.room_occupancy(room.id).unwrap().active_assignments.is_empty());
    }

    #[test]
    fn test_final_discharge_gates_in_order() {
        let (_dir, store, discharge) = setup();
        let billing = BillingService::new(store.clone());
        let doctor = actor("dr-7", "doctor");
        let visit = register_in_status(&store, VisitType::Inpatient, VisitStatus::InExamination);

        let err = discharge.final_discharge(visit.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "DischargeSummaryMissing");

        discharge.clinical_discharge(visit.id, &summary(), &doctor).unwrap();
        let err = discharge.final_discharge(visit.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "BillingMissing");

        billing.create_billing(visit.id, &items(&[300])).unwrap();
        let err = discharge.final_discharge(visit.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "PaymentIncomplete");

        billing.record_payment(visit.id, 100).unwrap();
        let err = discharge.final_discharge(visit.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "PaymentIncomplete");
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[test]
    fn test_summary_missing_reported_before_payment() {
        let (_dir, store, discharge) = setup();
        let billing = BillingService::new(store.clone());
        let doctor = actor("dr-7", "doctor");
        let visit = register_in_status(&store, VisitType::Inpatient, VisitStatus::ReadyForBilling);
        billing.create_billing(visit.id, &items(&[300])).unwrap();
        billing.record_payment(visit.id, 300).unwrap();

        let err = discharge.final_discharge(visit.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "DischargeSummaryMissing");
    }

    #[test]
    fn test_clinical_discharge_preconditions() {
        let (_dir, store, discharge) = setup();
        let doctor = actor("dr-7", "doctor");
        let nurse = actor("rn-2", "nurse");
        let inpatient =
            register_in_status(&store, VisitType::Inpatient, VisitStatus::InExamination);
        let outpatient = register(&store, VisitType::Outpatient);
        let ready = register_in_status(&store, VisitType::Inpatient, VisitStatus::ReadyForBilling);

        assert_eq!(
            discharge
                .clinical_discharge(inpatient.id, &summary(), &nurse)
                .unwrap_err()
                .kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            discharge
                .clinical_discharge(outpatient.id, &summary(), &doctor)
                .unwrap_err()
                .rule(),
            "NotInpatient"
        );
        assert_eq!(
            discharge
                .clinical_discharge(ready.id, &summary(), &doctor)
                .unwrap_err()
                .rule(),
            "AlreadyReadyForBilling"
        );

        discharge.clinical_discharge(inpatient.id, &summary(), &doctor).unwrap();
        assert_eq!(
            discharge
                .clinical_discharge(inpatient.id, &summary(), &doctor)
                .unwrap_err()
                .rule(),
            "DischargeSummaryExists"
        );
        assert!(discharge.summary_for_visit(inpatient.id).unwrap().is_some());
    }

    #[test]
    fn test_final_discharge_requires_permission() {
        let (_dir, store, discharge) = setup();
        let visit = register_in_status(&store, VisitType::Inpatient, VisitStatus::Paid);
        let err = discharge
            .final_discharge(visit.id, &actor("clerk", "cashier"))
            .unwrap_err();
        assert_eq!(err.rule(), "Unauthorized");
    }
}
