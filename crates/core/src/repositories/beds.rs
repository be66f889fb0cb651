//! Bed and room allocation.
//!
//! Tracks total and available capacity per room and which bed each inpatient visit occupies.
//! Every mutation changes `available_beds` and the matching assignment row in the same
//! transaction, so for every room at every observable point:
//!
//! ```text
//! available_beds + |active assignments in room| = bed_count
//! ```
//!
//! The `*_in_tx` functions are the transactional building blocks; the admission and discharge
//! workflows call them inside their own transactions.

use crate::error::{CareError, CareResult};
use crate::model::{BedAssignment, Room, RoomStatus, Visit, VisitType};
use crate::store::rows;
use crate::store::Store;
use crate::NonEmptyText;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// A room together with its currently occupied beds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct RoomOccupancy {
    pub room: Room,
    pub active_assignments: Vec<BedAssignment>,
}

/// Service for room provisioning and bed assignment.
#[derive(Clone, Debug)]
pub struct BedService {
    store: Store,
}

impl BedService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates a room with all beds free.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::InvalidInput`] if `bed_count < 1` or the name is already in use.
    pub fn create_room(&self, name: &NonEmptyText, bed_count: i64) -> CareResult<Room> {
        if bed_count < 1 {
            return Err(CareError::InvalidInput(format!(
                "room {name} must have at least one bed"
            )));
        }

        let room = self.store.write("create_room", |tx| {
            if rows::room_name_exists(tx, name.as_str())? {
                return Err(CareError::InvalidInput(format!(
                    "room name {name} is already in use"
                )));
            }
            let room = Room {
                id: Uuid::new_v4(),
                name: name.to_string(),
                bed_count,
                available_beds: bed_count,
                status: RoomStatus::Available,
            };
            rows::insert_room(tx, &room)?;
            Ok(room)
        })?;

        tracing::info!(room = %room.name, beds = bed_count, "room created");
        Ok(room)
    }

    /// Puts a room under maintenance or takes it out again.
    ///
    /// Occupied beds stay occupied; maintenance only blocks new assignments. Leaving
    /// maintenance restores `occupied` or `available` from the current free-bed count.
    pub fn set_maintenance(&self, room_id: Uuid, under_maintenance: bool) -> CareResult<Room> {
        self.store.write("set_maintenance", |tx| {
            let mut room = rows::require_room(tx, room_id)?;
            room.status = match (under_maintenance, room.available_beds) {
                (true, _) => RoomStatus::Maintenance,
                (false, 0) => RoomStatus::Occupied,
                (false, _) => RoomStatus::Available,
            };
            rows::set_room_status(tx, room_id, room.status)?;
            Ok(room)
        })
    }

    pub fn get_room(&self, room_id: Uuid) -> CareResult<Room> {
        self.store.read(|conn| rows::require_room(conn, room_id))
    }

    pub fn room_occupancy(&self, room_id: Uuid) -> CareResult<RoomOccupancy> {
        self.store.read(|conn| {
            Ok(RoomOccupancy {
                room: rows::require_room(conn, room_id)?,
                active_assignments: rows::active_assignments_for_room(conn, room_id)?,
            })
        })
    }

    /// Assigns an inpatient visit to a specific bed.
    ///
    /// Preconditions are checked inside the transaction, in this order: the visit exists, is
    /// inpatient, is not closed and holds no bed; the room exists, is not under maintenance
    /// and has a free bed; the bed number is within the room; the bed is free. With every bed
    /// taken the caller gets `RoomFull`, whichever bed was requested.
    ///
    /// # Errors
    ///
    /// `VisitNotFound`, `NotInpatient`, `VisitClosed`, `AlreadyAssigned`, `RoomNotFound`,
    /// `RoomUnderMaintenance`, `RoomFull`, `InvalidBedNumber`, `BedOccupied`.
    pub fn assign(
        &self,
        visit_id: Uuid,
        room_id: Uuid,
        bed_number: i64,
    ) -> CareResult<BedAssignment> {
        let assignment = self.store.write("assign_bed", |tx| {
            let mut visit = rows::require_visit(tx, visit_id)?;
            let assignment = assign_in_tx(tx, &mut visit, room_id, bed_number, Utc::now())?;
            rows::update_visit(tx, &visit)?;
            Ok(assignment)
        })?;

        tracing::info!(
            visit = %visit_id,
            room = %room_id,
            bed = bed_number,
            "bed assigned"
        );
        Ok(assignment)
    }

    /// Moves a visit from its current bed to another, in one transaction.
    ///
    /// The destination is validated like [`BedService::assign`], except that a move within the
    /// same room does not need a spare bed since the source bed is vacated at the same time.
    /// Requesting the bed the visit already holds is `BedOccupied`.
    pub fn transfer(
        &self,
        visit_id: Uuid,
        new_room_id: Uuid,
        new_bed_number: i64,
        reason: &NonEmptyText,
    ) -> CareResult<BedAssignment> {
        let assignment = self.store.write("transfer_bed", |tx| {
            let now = Utc::now();
            let mut visit = rows::require_visit(tx, visit_id)?;
            ensure_inpatient_open(&visit)?;

            let source = rows::active_assignment_for_visit(tx, visit_id)?
                .ok_or(CareError::NotAssigned(visit_id))?;
            let destination = rows::require_room(tx, new_room_id)?;
            let same_room = source.room_id == destination.id;

            check_destination(tx, &destination, new_bed_number, same_room)?;

            close_in_tx(tx, &source, now, Some(reason.as_str()))?;
            let assignment = open_in_tx(tx, &visit, &destination, new_bed_number, now)?;
            visit.room_id = Some(destination.id);
            rows::update_visit(tx, &visit)?;
            Ok(assignment)
        })?;

        tracing::info!(
            visit = %visit_id,
            room = %new_room_id,
            bed = new_bed_number,
            reason = %reason,
            "bed transferred"
        );
        Ok(assignment)
    }

    /// Releases an assignment and frees its bed.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::AlreadyDischarged`] when the assignment was already released, so
    /// that a double discharge is reported instead of freeing the bed twice.
    pub fn release(&self, assignment_id: Uuid) -> CareResult<BedAssignment> {
        let released = self
            .store
            .write("release_bed", |tx| release_in_tx(tx, assignment_id, Utc::now()))?;

        tracing::info!(
            assignment = %assignment_id,
            room = %released.room_id,
            bed = released.bed_number,
            "bed released"
        );
        Ok(released)
    }
}

fn ensure_inpatient_open(visit: &Visit) -> CareResult<()> {
    if visit.visit_type != VisitType::Inpatient {
        return Err(CareError::NotInpatient(visit.id));
    }
    if visit.status.is_terminal() {
        return Err(CareError::VisitClosed {
            visit: visit.id,
            status: visit.status,
        });
    }
    Ok(())
}

fn check_destination(
    conn: &Connection,
    room: &Room,
    bed_number: i64,
    vacating_same_room: bool,
) -> CareResult<()> {
    if room.status == RoomStatus::Maintenance {
        return Err(CareError::RoomUnderMaintenance {
            room: room.name.clone(),
        });
    }
    if room.available_beds <= 0 && !vacating_same_room {
        return Err(CareError::RoomFull {
            room: room.name.clone(),
        });
    }
    if !(1..=room.bed_count).contains(&bed_number) {
        return Err(CareError::InvalidBedNumber {
            room: room.name.clone(),
            bed: bed_number,
            bed_count: room.bed_count,
        });
    }
    if rows::active_assignment_for_bed(conn, room.id, bed_number)?.is_some() {
        return Err(CareError::BedOccupied {
            room: room.name.clone(),
            bed: bed_number,
        });
    }
    Ok(())
}

fn open_in_tx(
    conn: &Connection,
    visit: &Visit,
    room: &Room,
    bed_number: i64,
    now: DateTime<Utc>,
) -> CareResult<BedAssignment> {
    if !rows::take_bed(conn, room.id)? {
        return Err(CareError::RoomFull {
            room: room.name.clone(),
        });
    }

    let assignment = BedAssignment {
        id: Uuid::new_v4(),
        visit_id: visit.id,
        room_id: room.id,
        bed_number,
        assigned_at: now,
        discharged_at: None,
        release_reason: None,
    };
    rows::insert_assignment(conn, &assignment)?;
    Ok(assignment)
}

fn close_in_tx(
    conn: &Connection,
    assignment: &BedAssignment,
    now: DateTime<Utc>,
    reason: Option<&str>,
) -> CareResult<BedAssignment> {
    if !rows::close_assignment(conn, assignment.id, now, reason)? {
        return Err(CareError::AlreadyDischarged(assignment.id));
    }
    if !rows::free_bed(conn, assignment.room_id)? {
        return Err(CareError::InvariantViolated(format!(
            "room {} has no occupied bed to free for assignment {}",
            assignment.room_id, assignment.id
        )));
    }

    Ok(BedAssignment {
        discharged_at: Some(now),
        release_reason: reason.map(str::to_string),
        ..assignment.clone()
    })
}

/// Assigns `visit` to a bed within an open transaction and updates the in-memory visit.
///
/// The caller persists `visit`. `admission_date` is only set if the visit has none yet.
pub(crate) fn assign_in_tx(
    conn: &Connection,
    visit: &mut Visit,
    room_id: Uuid,
    bed_number: i64,
    now: DateTime<Utc>,
) -> CareResult<BedAssignment> {
    ensure_inpatient_open(visit)?;
    if rows::active_assignment_for_visit(conn, visit.id)?.is_some() {
        return Err(CareError::AlreadyAssigned(visit.id));
    }

    let room = rows::require_room(conn, room_id)?;
    check_destination(conn, &room, bed_number, false)?;
    let assignment = open_in_tx(conn, visit, &room, bed_number, now)?;

    visit.room_id = Some(room.id);
    visit.admission_date.get_or_insert(now);
    Ok(assignment)
}

/// Closes an assignment and frees its bed within an open transaction.
pub(crate) fn release_in_tx(
    conn: &Connection,
    assignment_id: Uuid,
    now: DateTime<Utc>,
) -> CareResult<BedAssignment> {
    let assignment = rows::find_assignment(conn, assignment_id)?
        .ok_or(CareError::AssignmentNotFound(assignment_id))?;
    if !assignment.is_active() {
        return Err(CareError::AlreadyDischarged(assignment_id));
    }
    close_in_tx(conn, &assignment, now, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::VisitStatus;
    use crate::repositories::tests::{register, room_name};
    use crate::store::tests::temp_store;
    use std::sync::{Arc, Barrier};

    fn setup() -> (tempfile::TempDir, Store, BedService) {
        let (dir, store) = temp_store();
        let beds = BedService::new(store.clone());
        (dir, store, beds)
    }

    fn occupied(store: &Store, room_id: Uuid) -> i64 {
        store
            .read(|conn| Ok(rows::active_assignments_for_room(conn, room_id)?.len() as i64))
            .unwrap()
    }

    fn assert_capacity_invariant(store: &Store, beds: &BedService, room_id: Uuid) {
        let room = beds.get_room(room_id).unwrap();
        assert_eq!(room.available_beds + occupied(store, room_id), room.bed_count);
    }

    #[test]
    fn test_create_room_rejects_zero_beds_and_duplicates() {
        let (_dir, _store, beds) = setup();
        assert_eq!(
            beds.create_room(&room_name("101"), 0).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        beds.create_room(&room_name("101"), 2).unwrap();
        assert!(beds.create_room(&room_name("101"), 2).is_err());
    }

    #[test]
    fn test_scenario_room_full_short_circuits_bed_check() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("R1"), 2).unwrap();
        let v1 = register(&store, VisitType::Inpatient);
        let v2 = register(&store, VisitType::Inpatient);
        let v3 = register(&store, VisitType::Inpatient);

        beds.assign(v1.id, room.id, 1).unwrap();
        assert_eq!(beds.get_room(room.id).unwrap().available_beds, 1);

        let err = beds.assign(v2.id, room.id, 1).unwrap_err();
        assert_eq!(err.rule(), "BedOccupied");
        assert_eq!(err.to_string(), "bed 1 in room R1 already occupied");

        beds.assign(v2.id, room.id, 2).unwrap();
        let room_after = beds.get_room(room.id).unwrap();
        assert_eq!(room_after.available_beds, 0);
        assert_eq!(room_after.status, RoomStatus::Occupied);

        let err = beds.assign(v3.id, room.id, 1).unwrap_err();
        assert_eq!(err.rule(), "RoomFull");
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_capacity_invariant(&store, &beds, room.id);
    }

    #[test]
    fn test_assign_sets_room_and_admission_date() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("201"), 3).unwrap();
        let visit = register(&store, VisitType::Inpatient);

        let assignment = beds.assign(visit.id, room.id, 3).unwrap();
        assert!(assignment.is_active());

        let stored = store.read(|c| rows::require_visit(c, visit.id)).unwrap();
        assert_eq!(stored.room_id, Some(room.id));
        assert_eq!(stored.admission_date, Some(assignment.assigned_at));
    }

    #[test]
    fn test_assign_validation_failures() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("301"), 2).unwrap();
        let outpatient = register(&store, VisitType::Outpatient);
        let inpatient = register(&store, VisitType::Inpatient);

        let cases = [
            (beds.assign(Uuid::new_v4(), room.id, 1), "VisitNotFound"),
            (beds.assign(outpatient.id, room.id, 1), "NotInpatient"),
            (beds.assign(inpatient.id, Uuid::new_v4(), 1), "RoomNotFound"),
            (beds.assign(inpatient.id, room.id, 0), "InvalidBedNumber"),
            (beds.assign(inpatient.id, room.id, 3), "InvalidBedNumber"),
        ];
        for (result, rule) in cases {
            assert_eq!(result.unwrap_err().rule(), rule);
        }

        beds.assign(inpatient.id, room.id, 1).unwrap();
        let err = beds.assign(inpatient.id, room.id, 2).unwrap_err();
        assert_eq!(err.rule(), "AlreadyAssigned");
        assert_capacity_invariant(&store, &beds, room.id);
    }

    #[test]
    fn test_maintenance_blocks_new_assignments() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("401"), 1).unwrap();
        let visit = register(&store, VisitType::Inpatient);

        beds.set_maintenance(room.id, true).unwrap();
        let err = beds.assign(visit.id, room.id, 1).unwrap_err();
        assert_eq!(err.rule(), "RoomUnderMaintenance");

        let room = beds.set_maintenance(room.id, false).unwrap();
        assert_eq!(room.status, RoomStatus::Available);
        beds.assign(visit.id, room.id, 1).unwrap();
    }

    #[test]
    fn test_release_twice_fails_without_double_increment() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("501"), 2).unwrap();
        let visit = register(&store, VisitType::Inpatient);
        let assignment = beds.assign(visit.id, room.id, 2).unwrap();

        let released = beds.release(assignment.id).unwrap();
        assert!(released.discharged_at.is_some());
        assert_eq!(beds.get_room(room.id).unwrap().available_beds, 2);

        let err = beds.release(assignment.id).unwrap_err();
        assert!(matches!(err, CareError::AlreadyDischarged(id) if id == assignment.id));
        assert_eq!(beds.get_room(room.id).unwrap().available_beds, 2);
        assert_capacity_invariant(&store, &beds, room.id);
    }

    #[test]
    fn test_release_keeps_maintenance_status() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("502"), 1).unwrap();
        let visit = register(&store, VisitType::Inpatient);
        let assignment = beds.assign(visit.id, room.id, 1).unwrap();

        beds.set_maintenance(room.id, true).unwrap();
        beds.release(assignment.id).unwrap();
        let room = beds.get_room(room.id).unwrap();
        assert_eq!(room.status, RoomStatus::Maintenance);
        assert_eq!(room.available_beds, 1);
    }

    #[test]
    fn test_release_unknown_assignment() {
        let (_dir, _store, beds) = setup();
        let err = beds.release(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_transfer_moves_capacity_between_rooms() {
        let (_dir, store, beds) = setup();
        let ward_a = beds.create_room(&room_name("A"), 1).unwrap();
        let ward_b = beds.create_room(&room_name("B"), 2).unwrap();
        let visit = register(&store, VisitType::Inpatient);
        let source = beds.assign(visit.id, ward_a.id, 1).unwrap();

        let reason = NonEmptyText::new("needs isolation").unwrap();
        let moved = beds.transfer(visit.id, ward_b.id, 2, &reason).unwrap();
        assert_eq!(moved.room_id, ward_b.id);

        assert_eq!(beds.get_room(ward_a.id).unwrap().available_beds, 1);
        assert_eq!(beds.get_room(ward_b.id).unwrap().available_beds, 1);
        let closed = store
            .read(|c| rows::find_assignment(c, source.id))
            .unwrap()
            .unwrap();
        assert!(closed.discharged_at.is_some());
        assert_eq!(closed.release_reason.as_deref(), Some("needs isolation"));

        let stored = store.read(|c| rows::require_visit(c, visit.id)).unwrap();
        assert_eq!(stored.room_id, Some(ward_b.id));
        assert_capacity_invariant(&store, &beds, ward_a.id);
        assert_capacity_invariant(&store, &beds, ward_b.id);
    }

    #[test]
    fn test_transfer_within_full_room() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("C"), 2).unwrap();
        let v1 = register(&store, VisitType::Inpatient);
        let v2 = register(&store, VisitType::Inpatient);
        beds.assign(v1.id, room.id, 1).unwrap();
        beds.assign(v2.id, room.id, 2).unwrap();

        let reason = NonEmptyText::new("window bed").unwrap();
        let err = beds.transfer(v1.id, room.id, 2, &reason).unwrap_err();
        assert_eq!(err.rule(), "BedOccupied");
        let err = beds.transfer(v1.id, room.id, 1, &reason).unwrap_err();
        assert_eq!(err.rule(), "BedOccupied");

        let v3 = register(&store, VisitType::Inpatient);
        let err = beds.transfer(v3.id, room.id, 1, &reason).unwrap_err();
        assert_eq!(err.rule(), "NotAssigned");
        assert_capacity_invariant(&store, &beds, room.id);
    }

    #[test]
    fn test_transfer_within_room_to_free_bed() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("D"), 2).unwrap();
        let visit = register(&store, VisitType::Inpatient);
        beds.assign(visit.id, room.id, 1).unwrap();

        let reason = NonEmptyText::new("closer to nurse station").unwrap();
        let moved = beds.transfer(visit.id, room.id, 2, &reason).unwrap();
        assert_eq!(moved.bed_number, 2);
        assert_eq!(beds.get_room(room.id).unwrap().available_beds, 1);
        assert_capacity_invariant(&store, &beds, room.id);
    }

    #[test]
    fn test_failed_transfer_leaves_source_untouched() {
        let (_dir, store, beds) = setup();
        let source_room = beds.create_room(&room_name("E"), 1).unwrap();
        let full_room = beds.create_room(&room_name("F"), 1).unwrap();
        let visit = register(&store, VisitType::Inpatient);
        let other = register(&store, VisitType::Inpatient);
        let source = beds.assign(visit.id, source_room.id, 1).unwrap();
        beds.assign(other.id, full_room.id, 1).unwrap();

        let reason = NonEmptyText::new("upgrade").unwrap();
        let err = beds.transfer(visit.id, full_room.id, 1, &reason).unwrap_err();
        assert_eq!(err.rule(), "RoomFull");

        let still_active = store
            .read(|c| rows::active_assignment_for_visit(c, visit.id))
            .unwrap()
            .unwrap();
        assert_eq!(still_active.id, source.id);
        assert_eq!(beds.get_room(source_room.id).unwrap().available_beds, 0);
    }

    #[test]
    fn test_cannot_assign_closed_visit() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("G"), 1).unwrap();
        let mut visit = register(&store, VisitType::Inpatient);
        visit.status = VisitStatus::Cancelled;
        store
            .write("test", |tx| rows::update_visit(tx, &visit))
            .unwrap();

        let err = beds.assign(visit.id, room.id, 1).unwrap_err();
        assert_eq!(err.rule(), "VisitClosed");
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_concurrent_assigns_to_last_bed_admit_exactly_one() {
        let (_dir, store, beds) = setup();
        let room = beds.create_room(&room_name("H"), 1).unwrap();
        let visits: Vec<_> = (0..4)
            .map(|_| register(&store, VisitType::Inpatient))
            .collect();

        let barrier = Arc::new(Barrier::new(visits.len()));
        let handles: Vec<_> = visits
            .iter()
            .map(|visit| {
                let beds = beds.clone();
                let barrier = barrier.clone();
                let visit_id = visit.id;
                let room_id = room.id;
                std::thread::spawn(move || {
                    barrier.wait();
                    beds.assign(visit_id, room_id, 1)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(err.kind(), ErrorKind::CapacityExceeded, "{err}");
        }

        let room = beds.get_room(room.id).unwrap();
        assert_eq!(room.available_beds, 0);
        assert_capacity_invariant(&store, &beds, room.id);
    }
}
