//! Visit registration, examination start and direct status updates.

use crate::error::{CareError, CareResult};
use crate::model::{BedAssignment, MedicalRecord, Visit, VisitStatus, VisitType};
use crate::repositories::billing::BillingStatement;
use crate::status::{self, TransitionContext, TransitionOrigin};
use crate::store::rows;
use crate::store::Store;
use crate::{NonEmptyText, TriageLevel};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Registration details for a new visit.
#[derive(Clone, Debug)]
pub struct NewVisit {
    pub patient_id: NonEmptyText,
    pub visit_type: VisitType,
    /// Required for outpatient visits, rejected for the other types.
    pub poli_id: Option<NonEmptyText>,
    /// Emergency visits only.
    pub triage_level: Option<TriageLevel>,
    pub notes: Option<String>,
}

/// Everything the core knows about one visit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct VisitOverview {
    pub visit: Visit,
    pub record: Option<MedicalRecord>,
    pub billing: Option<BillingStatement>,
    pub active_assignment: Option<BedAssignment>,
    pub has_discharge_summary: bool,
}

#[derive(Clone, Debug)]
pub struct VisitService {
    store: Store,
}

impl VisitService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Registers a visit in `registered`.
    ///
    /// Outpatient visits are queued at their poli: the queue number counts from 1 per poli and
    /// arrival day.
    ///
    /// # Errors
    ///
    /// - [`CareError::MissingField`] for an outpatient visit without a poli,
    /// - [`CareError::InvalidInput`] for a poli on a non-outpatient visit or a triage level on
    ///   a non-emergency visit.
    pub fn register(&self, new_visit: &NewVisit) -> CareResult<Visit> {
        match (new_visit.visit_type, &new_visit.poli_id) {
            (VisitType::Outpatient, None) => return Err(CareError::MissingField("poli_id")),
            (VisitType::Inpatient | VisitType::Emergency, Some(_)) => {
                return Err(CareError::InvalidInput(format!(
                    "{} visits are not queued at a poli",
                    new_visit.visit_type
                )))
            }
            _ => {}
        }
        if new_visit.triage_level.is_some() && new_visit.visit_type != VisitType::Emergency {
            return Err(CareError::InvalidInput(
                "triage level applies to emergency visits only".into(),
            ));
        }

        let visit = self.store.write("register_visit", |tx| {
            let now = Utc::now();
            let queue_number = new_visit
                .poli_id
                .as_ref()
                .map(|poli| rows::next_queue_number(tx, poli.as_str(), now.date_naive()))
                .transpose()?;

            let visit = Visit {
                id: Uuid::new_v4(),
                patient_id: new_visit.patient_id.to_string(),
                visit_type: new_visit.visit_type,
                status: VisitStatus::Registered,
                arrival_time: now,
                start_time: None,
                end_time: None,
                admission_date: None,
                discharge_date: None,
                room_id: None,
                poli_id: new_visit.poli_id.as_ref().map(NonEmptyText::to_string),
                queue_number,
                triage_level: new_visit.triage_level.map(TriageLevel::get),
                disposition: None,
                notes: new_visit.notes.clone().filter(|n| !n.trim().is_empty()),
            };
            rows::insert_visit(tx, &visit)?;
            Ok(visit)
        })?;

        tracing::info!(
            visit = %visit.id,
            visit_type = %visit.visit_type,
            queue = ?visit.queue_number,
            "visit registered"
        );
        Ok(visit)
    }

    /// Moves a visit into examination and opens its draft medical record.
    ///
    /// A visit already in examination (after an inpatient handover) only gets its record. A
    /// visit requeued at a poli after emergency examination keeps its unlocked draft, which is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// `VisitNotFound`, `RecordExists`, or whatever the state machine refuses.
    pub fn begin_examination(&self, visit_id: Uuid) -> CareResult<MedicalRecord> {
        let record = self.store.write("begin_examination", |tx| {
            let now = Utc::now();
            let mut visit = rows::require_visit(tx, visit_id)?;
            let existing = rows::record_for_visit(tx, visit_id)?;
            let reopens_draft = matches!(
                &existing,
                Some(record) if !record.is_locked && visit.status == VisitStatus::Waiting
            );
            if existing.is_some() && !reopens_draft {
                return Err(CareError::RecordExists(visit_id));
            }
            if visit.status != VisitStatus::InExamination {
                status::transition(
                    &mut visit,
                    VisitStatus::InExamination,
                    &TransitionContext::new(TransitionOrigin::Examination, now),
                )?;
                rows::update_visit(tx, &visit)?;
            }
            if let Some(record) = existing {
                return Ok(record);
            }

            let record = MedicalRecord {
                id: Uuid::new_v4(),
                visit_id,
                is_locked: false,
                is_draft: true,
                locked_at: None,
                locked_by: None,
                created_at: now,
            };
            rows::insert_record(tx, &record)?;
            Ok(record)
        })?;

        tracing::info!(visit = %visit_id, record = %record.id, "examination started");
        Ok(record)
    }

    /// Applies a caller-requested status change.
    ///
    /// Edges owned by a workflow are refused here. Cancelling needs a reason and is refused
    /// while the visit still holds a bed.
    pub fn transition_status(
        &self,
        visit_id: Uuid,
        next: VisitStatus,
        reason: Option<&str>,
    ) -> CareResult<Visit> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if next == VisitStatus::Cancelled && reason.is_none() {
            return Err(CareError::MissingField("reason"));
        }

        let visit = self.store.write("transition_status", |tx| {
            let mut visit = rows::require_visit(tx, visit_id)?;
            if next == VisitStatus::Cancelled
                && rows::active_assignment_for_visit(tx, visit_id)?.is_some()
            {
                return Err(CareError::BedStillAssigned(visit_id));
            }

            let mut ctx = TransitionContext::new(TransitionOrigin::Direct, Utc::now());
            if let Some(reason) = reason {
                ctx = ctx.with_reason(reason);
            }
            status::transition(&mut visit, next, &ctx)?;
            rows::update_visit(tx, &visit)?;
            Ok(visit)
        });

        match &visit {
            Ok(visit) => {
                tracing::info!(visit = %visit_id, status = %visit.status, "status updated")
            }
            Err(e) => {
                tracing::warn!(visit = %visit_id, to = %next, error = %e, "status update refused")
            }
        }
        visit
    }

    pub fn get_visit(&self, visit_id: Uuid) -> CareResult<Visit> {
        self.store.read(|conn| rows::require_visit(conn, visit_id))
    }

    pub fn overview(&self, visit_id: Uuid) -> CareResult<VisitOverview> {
        self.store.read(|conn| {
            let visit = rows::require_visit(conn, visit_id)?;
            let billing = match rows::billing_for_visit(conn, visit_id)? {
                Some(billing) => Some(BillingStatement {
                    items: rows::billing_items(conn, billing.id)?,
                    billing,
                }),
                None => None,
            };
            Ok(VisitOverview {
                record: rows::record_for_visit(conn, visit_id)?,
                billing,
                active_assignment: rows::active_assignment_for_visit(conn, visit_id)?,
                has_discharge_summary: rows::summary_for_visit(conn, visit_id)?.is_some(),
                visit,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::repositories::beds::BedService;
    use crate::repositories::tests::room_name;
    use crate::store::tests::temp_store;
    use std::collections::{HashSet, VecDeque};

    fn outpatient(poli: &str) -> NewVisit {
        NewVisit {
            patient_id: NonEmptyText::new("MRN-0001").unwrap(),
            visit_type: VisitType::Outpatient,
            poli_id: Some(NonEmptyText::new(poli).unwrap()),
            triage_level: None,
            notes: None,
        }
    }

    fn of_type(visit_type: VisitType) -> NewVisit {
        NewVisit {
            visit_type,
            poli_id: None,
            ..outpatient("unused")
        }
    }

    #[test]
    fn test_register_queues_per_poli() {
        let (_dir, store) = temp_store();
        let visits = VisitService::new(store);

        let a1 = visits.register(&outpatient("GIGI")).unwrap();
        let a2 = visits.register(&outpatient("GIGI")).unwrap();
        let b1 = visits.register(&outpatient("ANAK")).unwrap();

        assert_eq!(a1.status, VisitStatus::Registered);
        assert_eq!(a1.queue_number, Some(1));
        assert_eq!(a2.queue_number, Some(2));
        assert_eq!(b1.queue_number, Some(1));
        assert_eq!(visits.get_visit(a2.id).unwrap(), a2);
    }

    #[test]
    fn test_register_validation() {
        let (_dir, store) = temp_store();
        let visits = VisitService::new(store);

        let err = visits
            .register(&NewVisit {
                poli_id: None,
                ..outpatient("x")
            })
            .unwrap_err();
        assert_eq!(err.rule(), "MissingField");

        let err = visits
            .register(&NewVisit {
                triage_level: Some(TriageLevel::new(2).unwrap()),
                ..outpatient("x")
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let emergency = visits
            .register(&NewVisit {
                triage_level: Some(TriageLevel::MOST_URGENT),
                ..of_type(VisitType::Emergency)
            })
            .unwrap();
        assert_eq!(emergency.triage_level, Some(1));
        assert_eq!(emergency.queue_number, None);
    }

    #[test]
    fn test_begin_examination_creates_single_draft_record() {
        let (_dir, store) = temp_store();
        let visits = VisitService::new(store);
        let visit = visits.register(&outpatient("UMUM")).unwrap();

        let record = visits.begin_examination(visit.id).unwrap();
        assert!(record.is_draft);
        assert!(!record.is_locked);

        let stored = visits.get_visit(visit.id).unwrap();
        assert_eq!(stored.status, VisitStatus::InExamination);
        assert!(stored.start_time.is_some());

        let err = visits.begin_examination(visit.id).unwrap_err();
        assert_eq!(err.rule(), "RecordExists");
    }

    #[test]
    fn test_direct_update_cannot_skip_workflows() {
        let (_dir, store) = temp_store();
        let visits = VisitService::new(store);
        let visit = visits.register(&outpatient("UMUM")).unwrap();

        let err = visits
            .transition_status(visit.id, VisitStatus::Billed, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        visits
            .transition_status(visit.id, VisitStatus::Waiting, None)
            .unwrap();
        let err = visits
            .transition_status(visit.id, VisitStatus::InExamination, None)
            .unwrap_err();
        assert_eq!(err.rule(), "WorkflowRequired");

        visits.begin_examination(visit.id).unwrap();
        visits
            .transition_status(visit.id, VisitStatus::Examined, None)
            .unwrap();
        let err = visits
            .transition_status(visit.id, VisitStatus::ReadyForBilling, None)
            .unwrap_err();
        assert_eq!(err.rule(), "WorkflowRequired");
    }

    #[test]
    fn test_cancel_requires_reason_and_free_bed() {
        let (_dir, store) = temp_store();
        let visits = VisitService::new(store.clone());
        let beds = BedService::new(store);
        let room = beds.create_room(&room_name("K1"), 1).unwrap();
        let visit = visits.register(&of_type(VisitType::Inpatient)).unwrap();
        let assignment = beds.assign(visit.id, room.id, 1).unwrap();

        let err = visits
            .transition_status(visit.id, VisitStatus::Cancelled, Some("  "))
            .unwrap_err();
        assert_eq!(err.rule(), "MissingField");
        let err = visits
            .transition_status(visit.id, VisitStatus::Cancelled, Some("patient left"))
            .unwrap_err();
        assert_eq!(err.rule(), "BedStillAssigned");

        beds.release(assignment.id).unwrap();
        let cancelled = visits
            .transition_status(visit.id, VisitStatus::Cancelled, Some("patient left"))
            .unwrap();
        assert_eq!(cancelled.status, VisitStatus::Cancelled);
        assert_eq!(cancelled.notes.as_deref(), Some("Cancelled: patient left"));

        let err = visits
            .transition_status(visit.id, VisitStatus::Waiting, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_stored_status_stays_reachable() {
        let (_dir, store) = temp_store();
        let visits = VisitService::new(store);
        let visit = visits.register(&outpatient("UMUM")).unwrap();

        let mut reachable = HashSet::from([VisitStatus::Registered]);
        let mut queue = VecDeque::from([VisitStatus::Registered]);
        while let Some(status) = queue.pop_front() {
            for next in status.next_statuses() {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        for next in VisitStatus::ALL {
            let _ = visits.transition_status(visit.id, *next, Some("test"));
            let current = visits.get_visit(visit.id).unwrap().status;
            assert!(reachable.contains(&current));
        }
    }

    #[test]
    fn test_overview_collects_related_rows() {
        let (_dir, store) = temp_store();
        let visits = VisitService::new(store);
        let visit = visits.register(&outpatient("UMUM")).unwrap();

        let overview = visits.overview(visit.id).unwrap();
        assert_eq!(overview.record, None);
        assert!(!overview.has_discharge_summary);

        let record = visits.begin_examination(visit.id).unwrap();
        let overview = visits.overview(visit.id).unwrap();
        assert_eq!(overview.record.map(|r| r.id), Some(record.id));
        assert_eq!(overview.billing, None);
        assert_eq!(overview.active_assignment, None);
        assert_eq!(overview.visit.status, VisitStatus::InExamination);
    }
}
