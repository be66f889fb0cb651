//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Request handlers never read environment variables; the binaries
//! resolve them here and hand the result to [`crate::Store::open`].

use crate::constants::{
    DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONFLICT_RETRIES, MAX_CONFLICT_RETRIES_LIMIT,
};
use crate::error::{CareError, CareResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_path: PathBuf,
    busy_timeout: Duration,
    max_conflict_retries: u32,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::InvalidInput`] if the database path is empty or the retry count
    /// exceeds [`MAX_CONFLICT_RETRIES_LIMIT`].
    pub fn new(
        database_path: PathBuf,
        busy_timeout: Duration,
        max_conflict_retries: u32,
    ) -> CareResult<Self> {
        if database_path.as_os_str().is_empty() {
            return Err(CareError::InvalidInput(
                "database_path cannot be empty".into(),
            ));
        }
        if max_conflict_retries > MAX_CONFLICT_RETRIES_LIMIT {
            return Err(CareError::InvalidInput(format!(
                "max_conflict_retries must be at most {MAX_CONFLICT_RETRIES_LIMIT}"
            )));
        }

        Ok(Self {
            database_path,
            busy_timeout,
            max_conflict_retries,
        })
    }

    /// Configuration with default timeout and retry settings for the given database file.
    pub fn with_database(database_path: PathBuf) -> CareResult<Self> {
        Self::new(
            database_path,
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            DEFAULT_MAX_CONFLICT_RETRIES,
        )
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn max_conflict_retries(&self) -> u32 {
        self.max_conflict_retries
    }
}

/// Parse the busy timeout (milliseconds) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default timeout.
pub fn busy_timeout_from_env_value(value: Option<String>) -> CareResult<Duration> {
    let millis = parse_optional_number::<u64>("busy timeout", value)?;
    Ok(Duration::from_millis(
        millis.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
    ))
}

/// Parse the conflict retry count from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default retry count.
pub fn max_conflict_retries_from_env_value(value: Option<String>) -> CareResult<u32> {
    Ok(parse_optional_number::<u32>("max conflict retries", value)?
        .unwrap_or(DEFAULT_MAX_CONFLICT_RETRIES))
}

fn parse_optional_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
) -> CareResult<Option<T>> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| CareError::InvalidInput(format!("{name} is not a number: {v}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_path() {
        let result = CoreConfig::new(PathBuf::new(), Duration::from_millis(10), 1);
        assert!(matches!(result, Err(CareError::InvalidInput(_))));
    }

    #[test]
    fn test_new_rejects_excessive_retries() {
        let result = CoreConfig::new(
            PathBuf::from("clinic.db"),
            Duration::from_millis(10),
            MAX_CONFLICT_RETRIES_LIMIT + 1,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_env_values_fall_back_to_defaults() {
        assert_eq!(
            busy_timeout_from_env_value(None).unwrap(),
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        );
        assert_eq!(
            max_conflict_retries_from_env_value(Some("  ".into())).unwrap(),
            DEFAULT_MAX_CONFLICT_RETRIES
        );
    }

    #[test]
    fn test_env_values_parse_and_reject() {
        assert_eq!(
            busy_timeout_from_env_value(Some("250".into())).unwrap(),
            Duration::from_millis(250)
        );
        assert!(max_conflict_retries_from_env_value(Some("many".into())).is_err());
    }
}
