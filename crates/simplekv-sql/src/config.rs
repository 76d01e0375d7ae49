//! Configuration for the SQL store.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use simplekv::{ConfigError, RetryPolicy};

use crate::schema::validate_table_name;

/// Default table name.
pub const DEFAULT_TABLE: &str = "simplekv";

/// Default driver name.
pub const DEFAULT_DRIVER: &str = "sqlite3";

/// Default connection pool size.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Default time a statement waits for a lock held by another connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver names accepted by [`SqlStoreConfig`].
const SUPPORTED_DRIVERS: &[&str] = &["sqlite3", "sqlite"];

/// Configuration for [`SqlStore::open`](crate::SqlStore::open).
///
/// # Example
///
/// ```no_run
/// use simplekv_sql::SqlStoreConfig;
///
/// let config = SqlStoreConfig::builder()
///     .path("/var/lib/app/kv.db")
///     .table("sessions")
///     .build()?;
/// # Ok::<(), simplekv::ConfigError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlStoreConfig {
    /// Database driver name.
    #[serde(default = "default_driver")]
    pub(crate) driver: String,

    /// Database file path.
    pub(crate) path: PathBuf,

    /// Table holding the entries.
    #[serde(default = "default_table")]
    pub(crate) table: String,

    /// Maximum number of open connections.
    #[serde(default = "default_max_connections")]
    pub(crate) max_connections: usize,

    /// Lock wait before a statement fails with "database is locked".
    #[serde(with = "humantime_serde", default = "default_busy_timeout")]
    pub(crate) busy_timeout: Duration,

    /// Backoff for insert races.
    #[serde(default)]
    pub(crate) retry: RetryPolicy,
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_owned()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_owned()
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_busy_timeout() -> Duration {
    DEFAULT_BUSY_TIMEOUT
}

#[bon::bon]
impl SqlStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `driver` is not a SQLite driver name
    /// - `table` is not a plain SQL identifier
    /// - `max_connections` is zero
    /// - `retry` is invalid
    #[builder]
    pub fn new(
        #[builder(into)] path: PathBuf,
        #[builder(into, default = DEFAULT_DRIVER.to_owned())] driver: String,
        #[builder(into, default = DEFAULT_TABLE.to_owned())] table: String,
        #[builder(default = DEFAULT_MAX_CONNECTIONS)] max_connections: usize,
        #[builder(default = DEFAULT_BUSY_TIMEOUT)] busy_timeout: Duration,
        #[builder(default)] retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let config = Self { driver, path, table, max_connections, busy_timeout, retry };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks a configuration obtained through deserialization.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SqlStoreConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_DRIVERS.contains(&self.driver.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "driver",
                reason: format!("unsupported database driver {:?}", self.driver),
            });
        }
        validate_table_name(&self.table)?;
        if self.max_connections == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_connections",
                min: "1".into(),
                value: "0".into(),
            });
        }
        self.retry.validate()
    }

    /// Returns the driver name.
    #[must_use]
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the pool size.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Returns the lock wait.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SqlStoreConfig::builder().path("kv.db").build().unwrap();
        assert_eq!(config.driver(), "sqlite3");
        assert_eq!(config.table(), "simplekv");
        assert_eq!(config.max_connections(), 4);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry(), &RetryPolicy::default());
    }

    #[test]
    fn test_unsupported_driver() {
        let err = SqlStoreConfig::builder().path("kv.db").driver("mysql").build().unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"invalid configuration: driver: unsupported database driver "mysql""#
        );
    }

    #[test]
    fn test_invalid_table() {
        let err = SqlStoreConfig::builder().path("kv.db").table("kv; drop").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "table", .. }));
    }

    #[test]
    fn test_zero_connections() {
        let err = SqlStoreConfig::builder().path("kv.db").max_connections(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "max_connections", .. }));
    }

    #[test]
    fn test_deserialize() {
        let config: SqlStoreConfig = serde_json::from_str(
            r#"{"path": "/tmp/kv.db", "table": "sessions", "busy_timeout": "250ms",
                "retry": {"max_attempts": 10}}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.table(), "sessions");
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.retry().max_attempts(), 10);
        assert_eq!(config.driver(), "sqlite3");
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result: Result<SqlStoreConfig, _> =
            serde_json::from_str(r#"{"path": "kv.db", "dsn": "postgres://"}"#);
        assert!(result.is_err());
    }
}
