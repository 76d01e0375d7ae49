//! Error types for the SQL store.
//!
//! [`SqlStoreError`] wraps `rusqlite` and runtime errors; conversion into
//! [`StoreError`] decides which engine failures are contention (retried) and
//! which are fatal.

use rusqlite::{ErrorCode, ffi};
use simplekv::{ConfigError, StoreError};
use thiserror::Error;

/// Result type alias for SQL store internals.
pub type Result<T> = std::result::Result<T, SqlStoreError>;

/// Errors specific to the SQL store.
#[derive(Debug, Error)]
pub enum SqlStoreError {
    /// Error reported by SQLite.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A blocking database task panicked or was aborted.
    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SqlStoreError {
    /// Returns `true` if the error is a unique or primary key violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlite(err) => is_unique_violation(err),
            _ => false,
        }
    }

    /// Converts into a [`StoreError`] naming the failed operation and key.
    pub(crate) fn into_store_error(self, operation: &str, key: &str) -> StoreError {
        if self.is_unique_violation() {
            return StoreError::conflict(key);
        }
        match self {
            Self::Sqlite(err) if is_connection_error(&err) => {
                StoreError::connection_with_source(format!("cannot {operation} key {key}"), err)
            },
            Self::Sqlite(err) => {
                StoreError::backend_with_source(format!("cannot {operation} key {key}: {err}"), err)
            },
            Self::Join(err) => {
                StoreError::backend_with_source(format!("cannot {operation} key {key}: {err}"), err)
            },
            Self::Config(err) => StoreError::Config(err),
        }
    }
}

impl From<SqlStoreError> for StoreError {
    fn from(err: SqlStoreError) -> Self {
        match err {
            SqlStoreError::Sqlite(err) if is_connection_error(&err) => {
                StoreError::connection_with_source("sqlite database unavailable", err)
            },
            SqlStoreError::Sqlite(err) => StoreError::backend_with_source(err.to_string(), err),
            SqlStoreError::Join(err) => StoreError::backend_with_source(err.to_string(), err),
            SqlStoreError::Config(err) => StoreError::Config(err),
        }
    }
}

/// Returns `true` for `SQLITE_CONSTRAINT_PRIMARYKEY` and `SQLITE_CONSTRAINT_UNIQUE`.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        },
        _ => false,
    }
}

fn is_connection_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::CannotOpen
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::NotADatabase
            )
    )
}

/// Builds a SQLite failure with the given primary result code.
pub(crate) fn sqlite_failure(code: std::ffi::c_int, message: &str) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some(message.to_owned()))
}
