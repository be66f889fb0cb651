//! Medical record locking.
//!
//! Locking a record finalises the clinical note and hands the visit to billing. Unlocking is the
//! reversal: it is only allowed before any payment has been taken, throws the bill away and
//! sends the visit back to examination with an editable draft.

use crate::actor::{authorize, AccessPolicy, Actor, GuardedAction};
use crate::error::{CareError, CareResult};
use crate::model::{MedicalRecord, Visit, VisitStatus};
use crate::repositories::billing::ensure_unlockable;
use crate::status::{self, TransitionContext, TransitionOrigin};
use crate::store::rows;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct RecordService {
    store: Store,
    policy: Arc<dyn AccessPolicy>,
}

impl RecordService {
    pub fn new(store: Store, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    /// Locks a medical record and moves its visit to `ready_for_billing`.
    ///
    /// # Errors
    ///
    /// - `RecordNotFound`,
    /// - `AlreadyLocked`,
    /// - `InvalidTransition` when the visit cannot move to `ready_for_billing` from its
    ///   current status.
    pub fn lock(&self, record_id: Uuid, actor: &Actor) -> CareResult<MedicalRecord> {
        let record = self.store.write("lock_record", |tx| {
            let now = Utc::now();
            let mut record =
                rows::find_record(tx, record_id)?.ok_or(CareError::RecordNotFound(record_id))?;
            if record.is_locked {
                return Err(CareError::AlreadyLocked(record.visit_id));
            }

            let mut visit = rows::require_visit(tx, record.visit_id)?;
            status::transition(
                &mut visit,
                VisitStatus::ReadyForBilling,
                &TransitionContext::new(TransitionOrigin::RecordLock, now),
            )?;

            record.is_locked = true;
            record.is_draft = false;
            record.locked_at = Some(now);
            record.locked_by = Some(actor.id.to_string());
            rows::update_record_lock(tx, &record)?;
            rows::update_visit(tx, &visit)?;
            Ok(record)
        })?;

        tracing::info!(
            record = %record_id,
            visit = %record.visit_id,
            actor = %actor.id,
            "medical record locked"
        );
        Ok(record)
    }

    /// Reopens a locked visit for editing.
    ///
    /// Checked in order: the visit exists, the actor is permitted, the visit is
    /// `ready_for_billing` or `billed`, and no payment has started. The bill and its items are
    /// deleted, the visit returns to `in_examination` and the record becomes an unlocked
    /// draft.
    ///
    /// # Errors
    ///
    /// `VisitNotFound`, `Unauthorized`, `NotLocked`, `PaymentInProgress`.
    pub fn unlock(&self, visit_id: Uuid, actor: &Actor) -> CareResult<Visit> {
        let visit = self.store.write("unlock_visit", |tx| {
            let mut visit = rows::require_visit(tx, visit_id)?;
            authorize(self.policy.as_ref(), actor, GuardedAction::Unlock)?;
            if !matches!(
                visit.status,
                VisitStatus::ReadyForBilling | VisitStatus::Billed
            ) {
                return Err(CareError::NotLocked {
                    visit: visit_id,
                    status: visit.status,
                });
            }

            let billing = rows::billing_for_visit(tx, visit_id)?;
            ensure_unlockable(visit_id, billing.as_ref())?;
            if let Some(billing) = &billing {
                let items = rows::delete_billing(tx, billing.id)?;
                tracing::debug!(visit = %visit_id, items, "billing removed on unlock");
            }

            status::transition(
                &mut visit,
                VisitStatus::InExamination,
                &TransitionContext::new(TransitionOrigin::RecordUnlock, Utc::now()),
            )?;
            rows::update_visit(tx, &visit)?;

            if let Some(mut record) = rows::record_for_visit(tx, visit_id)? {
                record.is_locked = false;
                record.is_draft = true;
                record.locked_at = None;
                record.locked_by = None;
                rows::update_record_lock(tx, &record)?;
            }
            Ok(visit)
        })?;

        tracing::info!(visit = %visit_id, actor = %actor.id, "visit unlocked");
        Ok(visit)
    }

    pub fn record_for_visit(&self, visit_id: Uuid) -> CareResult<Option<MedicalRecord>> {
        self.store.read(|conn| rows::record_for_visit(conn, visit_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::VisitType;
    use crate::repositories::billing::tests::items;
    use crate::repositories::billing::BillingService;
    use crate::repositories::tests::{actor, examined_visit, role_policy};
    use crate::store::tests::temp_store;

    fn setup() -> (tempfile::TempDir, Store, RecordService) {
        let (dir, store) = temp_store();
        let records = RecordService::new(store.clone(), role_policy(&["doctor"]));
        (dir, store, records)
    }

    fn status_of(store: &Store, visit_id: Uuid) -> VisitStatus {
        store.read(|c| rows::require_visit(c, visit_id)).unwrap().status
    }

    #[test]
    fn test_lock_then_unlock_without_billing() {
        let (_dir, store, records) = setup();
        let (visit, record) = examined_visit(&store, VisitType::Outpatient);
        let doctor = actor("dr-1", "doctor");

        let locked = records.lock(record.id, &doctor).unwrap();
        assert!(locked.is_locked);
        assert!(!locked.is_draft);
        assert_eq!(locked.locked_by.as_deref(), Some("dr-1"));
        assert_eq!(status_of(&store, visit.id), VisitStatus::ReadyForBilling);

        let reopened = records.unlock(visit.id, &doctor).unwrap();
        assert_eq!(reopened.status, VisitStatus::InExamination);

        let record = records.record_for_visit(visit.id).unwrap().unwrap();
        assert!(!record.is_locked);
        assert!(record.is_draft);
        assert_eq!(record.locked_at, None);
        assert_eq!(record.locked_by, None);
    }

    #[test]
    fn test_lock_twice_is_rejected() {
        let (_dir, store, records) = setup();
        let (_visit, record) = examined_visit(&store, VisitType::Outpatient);
        let doctor = actor("dr-1", "doctor");

        records.lock(record.id, &doctor).unwrap();
        let err = records.lock(record.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "AlreadyLocked");
        assert_eq!(
            records.lock(Uuid::new_v4(), &doctor).unwrap_err().rule(),
            "RecordNotFound"
        );
    }

    #[test]
    fn test_unlock_checks_in_order() {
        let (_dir, store, records) = setup();
        let (visit, _record) = examined_visit(&store, VisitType::Outpatient);
        let doctor = actor("dr-1", "doctor");
        let clerk = actor("clerk-1", "cashier");

        assert_eq!(
            records.unlock(Uuid::new_v4(), &clerk).unwrap_err().rule(),
            "VisitNotFound"
        );
        assert_eq!(
            records.unlock(visit.id, &clerk).unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        let err = records.unlock(visit.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "NotLocked");
        assert_eq!(status_of(&store, visit.id), VisitStatus::Examined);
    }

    #[test]
    fn test_unlock_deletes_pending_billing() {
        let (_dir, store, records) = setup();
        let billing = BillingService::new(store.clone());
        let (visit, record) = examined_visit(&store, VisitType::Outpatient);
        let doctor = actor("dr-1", "doctor");

        records.lock(record.id, &doctor).unwrap();
        billing.create_billing(visit.id, &items(&[80, 20])).unwrap();
        assert_eq!(status_of(&store, visit.id), VisitStatus::Billed);

        records.unlock(visit.id, &doctor).unwrap();
        assert_eq!(status_of(&store, visit.id), VisitStatus::InExamination);
        assert_eq!(billing.get_billing(visit.id).unwrap_err().rule(), "BillingMissing");
        let orphans: i64 = store
            .read(|c| Ok(c.query_row("SELECT COUNT(*) FROM billing_items", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_partial_payment_blocks_unlock() {
        let (_dir, store, records) = setup();
        let billing = BillingService::new(store.clone());
        let (visit, record) = examined_visit(&store, VisitType::Outpatient);
        let doctor = actor("dr-1", "doctor");

        records.lock(record.id, &doctor).unwrap();
        billing.create_billing(visit.id, &items(&[100])).unwrap();
        billing.record_payment(visit.id, 40).unwrap();

        let err = records.unlock(visit.id, &doctor).unwrap_err();
        assert_eq!(err.rule(), "PaymentInProgress");
        assert!(err.to_string().contains("cannot unlock"));

        assert_eq!(status_of(&store, visit.id), VisitStatus::Billed);
        let statement = billing.get_billing(visit.id).unwrap();
        assert_eq!(statement.billing.paid_amount, 40);
        assert_eq!(statement.items.len(), 1);
        assert!(records.record_for_visit(visit.id).unwrap().unwrap().is_locked);
    }
}
