//! Constants used throughout the clinic core crate.
//!
//! Defaults for runtime configuration and the fixed labels written into visit records live here
//! so that the REST layer, the CLI and the core agree on them.

/// Default SQLite database file when no explicit path is configured.
pub const DEFAULT_DATABASE_PATH: &str = "clinic.db";

/// Default time a connection waits on a held write lock before reporting a conflict.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default number of times a conflicting transaction is re-run from scratch.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Upper bound accepted for the retry setting.
pub const MAX_CONFLICT_RETRIES_LIMIT: u32 = 10;

/// Base backoff between conflict retries; multiplied by the attempt number.
pub const CONFLICT_BACKOFF_MS: u64 = 25;

/// Disposition recorded on an emergency visit handed over to an outpatient clinic.
pub const DISPOSITION_HANDOVER_OUTPATIENT: &str = "handover_outpatient";

/// Disposition recorded on an emergency visit handed over to inpatient care.
pub const DISPOSITION_HANDOVER_INPATIENT: &str = "handover_inpatient";
