//! Database schema.
//!
//! Constraints here back up the workflow checks: capacity bounds, one active assignment per bed
//! and per visit, and 1:1 records per visit. A workflow bug therefore surfaces as a storage error
//! instead of silently corrupting occupancy.

use crate::error::CareResult;
use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id              BLOB PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    bed_count       INTEGER NOT NULL CHECK (bed_count >= 1),
    available_beds  INTEGER NOT NULL,
    status          TEXT NOT NULL CHECK (status IN ('available', 'occupied', 'maintenance')),
    CHECK (available_beds BETWEEN 0 AND bed_count)
);

CREATE TABLE IF NOT EXISTS visits (
    id              BLOB PRIMARY KEY,
    patient_id      TEXT NOT NULL,
    visit_type      TEXT NOT NULL,
    status          TEXT NOT NULL,
    arrival_time    TEXT NOT NULL,
    start_time      TEXT,
    end_time        TEXT,
    admission_date  TEXT,
    discharge_date  TEXT,
    room_id         BLOB REFERENCES rooms(id),
    poli_id         TEXT,
    queue_number    INTEGER,
    triage_level    INTEGER CHECK (triage_level BETWEEN 1 AND 5),
    disposition     TEXT,
    notes           TEXT
);

CREATE INDEX IF NOT EXISTS idx_visits_poli_queue ON visits(poli_id, arrival_time);

CREATE TABLE IF NOT EXISTS bed_assignments (
    id              BLOB PRIMARY KEY,
    visit_id        BLOB NOT NULL REFERENCES visits(id),
    room_id         BLOB NOT NULL REFERENCES rooms(id),
    bed_number      INTEGER NOT NULL CHECK (bed_number >= 1),
    assigned_at     TEXT NOT NULL,
    discharged_at   TEXT,
    release_reason  TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_bed_assignments_active_bed
    ON bed_assignments(room_id, bed_number) WHERE discharged_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_bed_assignments_active_visit
    ON bed_assignments(visit_id) WHERE discharged_at IS NULL;

CREATE TABLE IF NOT EXISTS medical_records (
    id              BLOB PRIMARY KEY,
    visit_id        BLOB NOT NULL UNIQUE REFERENCES visits(id),
    is_locked       INTEGER NOT NULL DEFAULT 0,
    is_draft        INTEGER NOT NULL DEFAULT 1,
    locked_at       TEXT,
    locked_by       TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS billings (
    id              BLOB PRIMARY KEY,
    visit_id        BLOB NOT NULL UNIQUE REFERENCES visits(id),
    total_amount    INTEGER NOT NULL CHECK (total_amount > 0),
    paid_amount     INTEGER NOT NULL DEFAULT 0,
    payment_status  TEXT NOT NULL CHECK (payment_status IN ('pending', 'partial', 'paid')),
    created_at      TEXT NOT NULL,
    CHECK (paid_amount BETWEEN 0 AND total_amount)
);

CREATE TABLE IF NOT EXISTS billing_items (
    id              BLOB PRIMARY KEY,
    billing_id      BLOB NOT NULL REFERENCES billings(id) ON DELETE CASCADE,
    description     TEXT NOT NULL,
    amount          INTEGER NOT NULL CHECK (amount > 0)
);

CREATE TABLE IF NOT EXISTS discharge_summaries (
    id                  BLOB PRIMARY KEY,
    visit_id            BLOB NOT NULL UNIQUE REFERENCES visits(id),
    diagnosis           TEXT NOT NULL,
    treatment           TEXT NOT NULL,
    discharge_condition TEXT NOT NULL,
    follow_up           TEXT,
    author_id           TEXT NOT NULL,
    created_at          TEXT NOT NULL
);
"#;

/// Creates any missing tables and indexes. Safe to run on every startup.
pub(super) fn migrate(conn: &Connection) -> CareResult<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "journal mode set");

    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
