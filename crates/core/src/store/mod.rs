//! Relational store access.
//!
//! All visit-core state lives in one SQLite database. Every write operation runs inside a single
//! `BEGIN IMMEDIATE` transaction: the write lock is taken before the first read, so two
//! concurrent operations on the same room or visit are serialized by the database rather than
//! by any in-process lock. A fresh connection is opened per operation, the same way independent
//! service instances would reach the database.
//!
//! ## Retry policy
//!
//! Only serialization conflicts (`SQLITE_BUSY` / `SQLITE_LOCKED`) are retried. Each retry runs
//! the whole operation closure again from scratch, re-reading and re-validating every row.
//! Business-rule rejections propagate immediately and roll the transaction back.

pub(crate) mod rows;
mod schema;

use crate::config::CoreConfig;
use crate::constants::CONFLICT_BACKOFF_MS;
use crate::error::{CareError, CareResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;

/// Handle to the clinic database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Store {
    cfg: Arc<CoreConfig>,
}

impl Store {
    /// Opens the database described by `cfg` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::Database`] if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(cfg: Arc<CoreConfig>) -> CareResult<Self> {
        let store = Self { cfg };
        let conn = store.connect()?;
        schema::migrate(&conn)?;
        tracing::info!(
            path = %store.cfg.database_path().display(),
            "clinic store ready"
        );
        Ok(store)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    fn connect(&self) -> CareResult<Connection> {
        let conn = Connection::open(self.cfg.database_path())?;
        conn.busy_timeout(self.cfg.busy_timeout())?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// Runs a read-only query on its own connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> CareResult<T>) -> CareResult<T> {
        let conn = self.connect()?;
        f(&conn)
    }

    /// Runs `f` inside one immediate transaction, committing only if it returns `Ok`.
    ///
    /// The closure may be invoked more than once when the database reports a serialization
    /// conflict, up to `max_conflict_retries` extra times. It must not carry state between
    /// invocations.
    ///
    /// # Errors
    ///
    /// - whatever `f` returns, after rolling back,
    /// - [`CareError::Conflict`] when conflicts persist past the retry budget.
    pub(crate) fn write<T>(
        &self,
        operation: &'static str,
        mut f: impl FnMut(&Transaction<'_>) -> CareResult<T>,
    ) -> CareResult<T> {
        let max_attempts = self.cfg.max_conflict_retries().saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.try_write(&mut f) {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::debug!(operation, attempt, error = %e, "storage conflict, retrying");
                    std::thread::sleep(Duration::from_millis(
                        CONFLICT_BACKOFF_MS * u64::from(attempt),
                    ));
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(operation, attempt, error = %e, "storage conflict, giving up");
                    return Err(CareError::Conflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    fn try_write<T>(
        &self,
        f: &mut impl FnMut(&Transaction<'_>) -> CareResult<T>,
    ) -> CareResult<T> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
