//! Row mapping and single-statement queries.
//!
//! Functions here take a `&Connection` so they can run either on a read connection or inside a
//! workflow transaction (`Transaction` derefs to `Connection`). They check nothing beyond what
//! the SQL expresses; validation belongs to the services in [`crate::repositories`].

use crate::error::{CareError, CareResult};
use crate::model::{
    BedAssignment, Billing, BillingItem, DischargeSummary, MedicalRecord, PaymentStatus, Room,
    RoomStatus, Visit, VisitStatus, VisitType,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

macro_rules! sql_label {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

sql_label!(VisitType, VisitStatus, RoomStatus, PaymentStatus);

// ============================================================================
// VISITS
// ============================================================================

const VISIT_COLUMNS: &str = "id, patient_id, visit_type, status, arrival_time, start_time, \
     end_time, admission_date, discharge_date, room_id, poli_id, queue_number, triage_level, \
     disposition, notes";

fn visit_from_row(row: &Row<'_>) -> rusqlite::Result<Visit> {
    Ok(Visit {
        id: row.get("id")?,
        patient_id: row.get("patient_id")?,
        visit_type: row.get("visit_type")?,
        status: row.get("status")?,
        arrival_time: row.get("arrival_time")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        admission_date: row.get("admission_date")?,
        discharge_date: row.get("discharge_date")?,
        room_id: row.get("room_id")?,
        poli_id: row.get("poli_id")?,
        queue_number: row.get("queue_number")?,
        triage_level: row.get("triage_level")?,
        disposition: row.get("disposition")?,
        notes: row.get("notes")?,
    })
}

pub(crate) fn insert_visit(conn: &Connection, visit: &Visit) -> CareResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO visits ({VISIT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            visit.id,
            visit.patient_id,
            visit.visit_type,
            visit.status,
            visit.arrival_time,
            visit.start_time,
            visit.end_time,
            visit.admission_date,
            visit.discharge_date,
            visit.room_id,
            visit.poli_id,
            visit.queue_number,
            visit.triage_level,
            visit.disposition,
            visit.notes,
        ],
    )?;
    Ok(())
}

/// Writes every mutable visit column back.
pub(crate) fn update_visit(conn: &Connection, visit: &Visit) -> CareResult<()> {
    let updated = conn.execute(
        "UPDATE visits SET visit_type = ?2, status = ?3, start_time = ?4, end_time = ?5,
             admission_date = ?6, discharge_date = ?7, room_id = ?8, poli_id = ?9,
             queue_number = ?10, triage_level = ?11, disposition = ?12, notes = ?13
         WHERE id = ?1",
        params![
            visit.id,
            visit.visit_type,
            visit.status,
            visit.start_time,
            visit.end_time,
            visit.admission_date,
            visit.discharge_date,
            visit.room_id,
            visit.poli_id,
            visit.queue_number,
            visit.triage_level,
            visit.disposition,
            visit.notes,
        ],
    )?;
    if updated == 0 {
        return Err(CareError::VisitNotFound(visit.id));
    }
    Ok(())
}

pub(crate) fn find_visit(conn: &Connection, id: Uuid) -> CareResult<Option<Visit>> {
    Ok(conn
        .query_row(
            &format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = ?1"),
            [id],
            visit_from_row,
        )
        .optional()?)
}

pub(crate) fn require_visit(conn: &Connection, id: Uuid) -> CareResult<Visit> {
    find_visit(conn, id)?.ok_or(CareError::VisitNotFound(id))
}

/// Next queue number for a poli on the given arrival day, starting at 1.
pub(crate) fn next_queue_number(
    conn: &Connection,
    poli_id: &str,
    day: NaiveDate,
) -> CareResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(queue_number), 0) + 1 FROM visits
         WHERE poli_id = ?1 AND substr(arrival_time, 1, 10) = ?2",
        params![poli_id, day.format("%Y-%m-%d").to_string()],
        |row| row.get(0),
    )?)
}

// ============================================================================
// ROOMS
// ============================================================================

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get("id")?,
        name: row.get("name")?,
        bed_count: row.get("bed_count")?,
        available_beds: row.get("available_beds")?,
        status: row.get("status")?,
    })
}

pub(crate) fn insert_room(conn: &Connection, room: &Room) -> CareResult<()> {
    conn.execute(
        "INSERT INTO rooms (id, name, bed_count, available_beds, status)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            room.id,
            room.name,
            room.bed_count,
            room.available_beds,
            room.status
        ],
    )?;
    Ok(())
}

pub(crate) fn find_room(conn: &Connection, id: Uuid) -> CareResult<Option<Room>> {
    Ok(conn
        .query_row(
            "SELECT id, name, bed_count, available_beds, status FROM rooms WHERE id = ?1",
            [id],
            room_from_row,
        )
        .optional()?)
}

pub(crate) fn require_room(conn: &Connection, id: Uuid) -> CareResult<Room> {
    find_room(conn, id)?.ok_or(CareError::RoomNotFound(id))
}

pub(crate) fn room_name_exists(conn: &Connection, name: &str) -> CareResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM rooms WHERE name = ?1", [name], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Decrements `available_beds` if a bed is free. Returns `false` when the room was full.
///
/// A room that reaches zero free beds is marked occupied unless it is under maintenance.
pub(crate) fn take_bed(conn: &Connection, room_id: Uuid) -> CareResult<bool> {
    let updated = conn.execute(
        "UPDATE rooms SET
             available_beds = available_beds - 1,
             status = CASE
                 WHEN status = 'maintenance' THEN status
                 WHEN available_beds - 1 = 0 THEN 'occupied'
                 ELSE status
             END
         WHERE id = ?1 AND available_beds > 0",
        [room_id],
    )?;
    Ok(updated == 1)
}

/// Increments `available_beds` if below capacity. Returns `false` when the room was already
/// fully free, which means occupancy and capacity disagree.
///
/// The room becomes available again unless it is under maintenance.
pub(crate) fn free_bed(conn: &Connection, room_id: Uuid) -> CareResult<bool> {
    let updated = conn.execute(
        "UPDATE rooms SET
             available_beds = available_beds + 1,
             status = CASE WHEN status = 'maintenance' THEN status ELSE 'available' END
         WHERE id = ?1 AND available_beds < bed_count",
        [room_id],
    )?;
    Ok(updated == 1)
}

pub(crate) fn set_room_status(
    conn: &Connection,
    room_id: Uuid,
    status: RoomStatus,
) -> CareResult<()> {
    conn.execute(
        "UPDATE rooms SET status = ?2 WHERE id = ?1",
        params![room_id, status],
    )?;
    Ok(())
}

// ============================================================================
// BED ASSIGNMENTS
// ============================================================================

const ASSIGNMENT_COLUMNS: &str =
    "id, visit_id, room_id, bed_number, assigned_at, discharged_at, release_reason";

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<BedAssignment> {
    Ok(BedAssignment {
        id: row.get("id")?,
        visit_id: row.get("visit_id")?,
        room_id: row.get("room_id")?,
        bed_number: row.get("bed_number")?,
        assigned_at: row.get("assigned_at")?,
        discharged_at: row.get("discharged_at")?,
        release_reason: row.get("release_reason")?,
    })
}

pub(crate) fn insert_assignment(conn: &Connection, assignment: &BedAssignment) -> CareResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO bed_assignments ({ASSIGNMENT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
            assignment.id,
            assignment.visit_id,
            assignment.room_id,
            assignment.bed_number,
            assignment.assigned_at,
            assignment.discharged_at,
            assignment.release_reason,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_assignment(conn: &Connection, id: Uuid) -> CareResult<Option<BedAssignment>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ASSIGNMENT_COLUMNS} FROM bed_assignments WHERE id = ?1"),
            [id],
            assignment_from_row,
        )
        .optional()?)
}

pub(crate) fn active_assignment_for_visit(
    conn: &Connection,
    visit_id: Uuid,
) -> CareResult<Option<BedAssignment>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM bed_assignments
                 WHERE visit_id = ?1 AND discharged_at IS NULL"
            ),
            [visit_id],
            assignment_from_row,
        )
        .optional()?)
}

pub(crate) fn active_assignment_for_bed(
    conn: &Connection,
    room_id: Uuid,
    bed_number: i64,
) -> CareResult<Option<BedAssignment>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM bed_assignments
                 WHERE room_id = ?1 AND bed_number = ?2 AND discharged_at IS NULL"
            ),
            params![room_id, bed_number],
            assignment_from_row,
        )
        .optional()?)
}

pub(crate) fn active_assignments_for_room(
    conn: &Connection,
    room_id: Uuid,
) -> CareResult<Vec<BedAssignment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM bed_assignments
         WHERE room_id = ?1 AND discharged_at IS NULL
         ORDER BY bed_number"
    ))?;
    let rows = stmt.query_map([room_id], assignment_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Stamps `discharged_at` on an active assignment. Returns `false` if it was already closed.
pub(crate) fn close_assignment(
    conn: &Connection,
    id: Uuid,
    at: DateTime<Utc>,
    reason: Option<&str>,
) -> CareResult<bool> {
    let updated = conn.execute(
        "UPDATE bed_assignments SET discharged_at = ?2, release_reason = ?3
         WHERE id = ?1 AND discharged_at IS NULL",
        params![id, at, reason],
    )?;
    Ok(updated == 1)
}

// ============================================================================
// MEDICAL RECORDS
// ============================================================================

const RECORD_COLUMNS: &str = "id, visit_id, is_locked, is_draft, locked_at, locked_by, created_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MedicalRecord> {
    Ok(MedicalRecord {
        id: row.get("id")?,
        visit_id: row.get("visit_id")?,
        is_locked: row.get("is_locked")?,
        is_draft: row.get("is_draft")?,
        locked_at: row.get("locked_at")?,
        locked_by: row.get("locked_by")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn insert_record(conn: &Connection, record: &MedicalRecord) -> CareResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO medical_records ({RECORD_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
            record.id,
            record.visit_id,
            record.is_locked,
            record.is_draft,
            record.locked_at,
            record.locked_by,
            record.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn update_record_lock(conn: &Connection, record: &MedicalRecord) -> CareResult<()> {
    conn.execute(
        "UPDATE medical_records SET is_locked = ?2, is_draft = ?3, locked_at = ?4, locked_by = ?5
         WHERE id = ?1",
        params![
            record.id,
            record.is_locked,
            record.is_draft,
            record.locked_at,
            record.locked_by,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_record(conn: &Connection, id: Uuid) -> CareResult<Option<MedicalRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM medical_records WHERE id = ?1"),
            [id],
            record_from_row,
        )
        .optional()?)
}

pub(crate) fn record_for_visit(
    conn: &Connection,
    visit_id: Uuid,
) -> CareResult<Option<MedicalRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM medical_records WHERE visit_id = ?1"),
            [visit_id],
            record_from_row,
        )
        .optional()?)
}

// ============================================================================
// BILLING
// ============================================================================

const BILLING_COLUMNS: &str =
    "id, visit_id, total_amount, paid_amount, payment_status, created_at";

fn billing_from_row(row: &Row<'_>) -> rusqlite::Result<Billing> {
    Ok(Billing {
        id: row.get("id")?,
        visit_id: row.get("visit_id")?,
        total_amount: row.get("total_amount")?,
        paid_amount: row.get("paid_amount")?,
        payment_status: row.get("payment_status")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn insert_billing(conn: &Connection, billing: &Billing) -> CareResult<()> {
    conn.execute(
        &format!("INSERT INTO billings ({BILLING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            billing.id,
            billing.visit_id,
            billing.total_amount,
            billing.paid_amount,
            billing.payment_status,
            billing.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_billing_item(conn: &Connection, item: &BillingItem) -> CareResult<()> {
    conn.execute(
        "INSERT INTO billing_items (id, billing_id, description, amount) VALUES (?1, ?2, ?3, ?4)",
        params![item.id, item.billing_id, item.description, item.amount],
    )?;
    Ok(())
}

pub(crate) fn billing_for_visit(conn: &Connection, visit_id: Uuid) -> CareResult<Option<Billing>> {
    Ok(conn
        .query_row(
            &format!("SELECT {BILLING_COLUMNS} FROM billings WHERE visit_id = ?1"),
            [visit_id],
            billing_from_row,
        )
        .optional()?)
}

pub(crate) fn billing_items(conn: &Connection, billing_id: Uuid) -> CareResult<Vec<BillingItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, billing_id, description, amount FROM billing_items
         WHERE billing_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map([billing_id], |row| {
        Ok(BillingItem {
            id: row.get("id")?,
            billing_id: row.get("billing_id")?,
            description: row.get("description")?,
            amount: row.get("amount")?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn update_billing_payment(conn: &Connection, billing: &Billing) -> CareResult<()> {
    conn.execute(
        "UPDATE billings SET paid_amount = ?2, payment_status = ?3 WHERE id = ?1",
        params![billing.id, billing.paid_amount, billing.payment_status],
    )?;
    Ok(())
}

/// Removes a billing and its line items. Returns the number of items deleted.
pub(crate) fn delete_billing(conn: &Connection, billing_id: Uuid) -> CareResult<usize> {
    let items = conn.execute("DELETE FROM billing_items WHERE billing_id = ?1", [billing_id])?;
    conn.execute("DELETE FROM billings WHERE id = ?1", [billing_id])?;
    Ok(items)
}

// ============================================================================
// DISCHARGE SUMMARIES
// ============================================================================

pub(crate) fn insert_summary(conn: &Connection, summary: &DischargeSummary) -> CareResult<()> {
    conn.execute(
        "INSERT INTO discharge_summaries
             (id, visit_id, diagnosis, treatment, discharge_condition, follow_up, author_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            summary.id,
            summary.visit_id,
            summary.diagnosis,
            summary.treatment,
            summary.condition,
            summary.follow_up,
            summary.author_id,
            summary.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn summary_for_visit(
    conn: &Connection,
    visit_id: Uuid,
) -> CareResult<Option<DischargeSummary>> {
    Ok(conn
        .query_row(
            "SELECT id, visit_id, diagnosis, treatment, discharge_condition, follow_up,
                    author_id, created_at
             FROM discharge_summaries WHERE visit_id = ?1",
            [visit_id],
            |row| {
                Ok(DischargeSummary {
                    id: row.get("id")?,
                    visit_id: row.get("visit_id")?,
                    diagnosis: row.get("diagnosis")?,
                    treatment: row.get("treatment")?,
                    condition: row.get("discharge_condition")?,
                    follow_up: row.get("follow_up")?,
                    author_id: row.get("author_id")?,
                    created_at: row.get("created_at")?,
                })
            },
        )
        .optional()?)
}
