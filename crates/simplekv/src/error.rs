//! Store error types and result alias.
//!
//! Every backend maps its engine errors onto [`StoreError`]. Callers branch on
//! the variant (or on [`StoreError::cause`]), never on the message text.
//!
//! # Error Types
//!
//! - [`StoreError::NotFound`] - no live entry exists for the key
//! - [`StoreError::DuplicateKey`] - [`set_key_once`](crate::set_key_once) found an existing entry
//! - [`StoreError::Transform`] - the caller's transform failed; its error is kept as the source
//! - [`StoreError::Conflict`] - concurrent writer detected; retried internally
//! - [`StoreError::Cancelled`] - the caller's context was cancelled or its deadline passed
//! - [`StoreError::RetriesExhausted`] - the retry budget ran out while still contended
//! - [`StoreError::Connection`] / [`StoreError::Backend`] / [`StoreError::Serialization`] - engine
//!   failures, never retried
//!
//! # Example
//!
//! ```
//! use simplekv::{StoreError, StoreResult};
//!
//! fn lookup(key: &str) -> StoreResult<Vec<u8>> {
//!     Err(StoreError::not_found(key))
//! }
//!
//! let err = lookup("session:42").unwrap_err();
//! assert!(err.is_not_found());
//! assert_eq!(err.to_string(), "key session:42 not found");
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::context::ContextError;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Errors preserve their source chain via `#[source]`, so a caller can walk
/// [`std::error::Error::source`] down to an engine error or to the error its
/// own transform returned.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No live (non-expired) entry exists for the key.
    #[error("key {key} not found")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// An entry already exists for the key.
    ///
    /// Produced by [`set_key_once`](crate::set_key_once).
    #[error("key {key} already exists")]
    DuplicateKey {
        /// The key that was already present.
        key: String,
    },

    /// The caller-supplied transform returned an error.
    ///
    /// The display and the source are the caller's error, untouched. The
    /// transform is never retried after it fails.
    #[error("{source}")]
    Transform {
        /// The error the transform returned.
        #[source]
        source: BoxError,
    },

    /// A concurrent writer changed the entry between read and write.
    ///
    /// Backends use this internally to trigger another update cycle; callers
    /// only see it if a backend is driven outside its retry loop.
    #[error("concurrent update of key {key}")]
    Conflict {
        /// The contended key.
        key: String,
    },

    /// The caller's context was cancelled or its deadline passed.
    #[error("cannot {operation} key {key}: {source}")]
    Cancelled {
        /// The operation that was interrupted (`"update"`, `"get"`, ...).
        operation: &'static str,
        /// The key the operation was working on.
        key: String,
        /// Why the context finished.
        #[source]
        source: ContextError,
    },

    /// The update stayed contended for the whole retry budget.
    #[error("too many retry attempts trying to update key {key}")]
    RetriesExhausted {
        /// The contended key.
        key: String,
        /// Number of update cycles attempted.
        attempts: u32,
    },

    /// The storage engine could not be reached.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
        /// The underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// The storage engine rejected or failed an operation.
    #[error("{message}")]
    Backend {
        /// Description including the operation and key.
        message: String,
        /// The underlying engine error.
        #[source]
        source: Option<BoxError>,
    },

    /// Data read from the engine could not be decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the decoding failure.
        message: String,
        /// The underlying decoding error.
        #[source]
        source: Option<BoxError>,
    },

    /// Rolling back a transaction failed after another error.
    ///
    /// The original error stays reachable through [`StoreError::cause`] and
    /// through the source chain.
    #[error("failed to roll back (error: {rollback}) after error: {source}")]
    RollbackFailed {
        /// Description of the rollback failure.
        rollback: String,
        /// The error that triggered the rollback.
        #[source]
        source: Box<StoreError>,
    },

    /// Invalid store configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `DuplicateKey` error for the given key.
    #[must_use]
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        Self::DuplicateKey { key: key.into() }
    }

    /// Wraps a caller error returned from an update transform.
    ///
    /// If `err` is itself a [`StoreError`] (for example a `DuplicateKey`
    /// raised inside a transform), use it directly instead of wrapping.
    #[must_use]
    pub fn transform(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transform { source: Arc::new(err) }
    }

    /// Creates a new `Conflict` error for the given key.
    #[must_use]
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    /// Creates a new `Cancelled` error.
    #[must_use]
    pub fn cancelled(operation: &'static str, key: impl Into<String>, source: ContextError) -> Self {
        Self::Cancelled { operation, key: key.into(), source }
    }

    /// Creates a new `RetriesExhausted` error.
    #[must_use]
    pub fn retries_exhausted(key: impl Into<String>, attempts: u32) -> Self {
        Self::RetriesExhausted { key: key.into(), attempts }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Backend` error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), source: None }
    }

    /// Creates a new `Backend` error with a message and source error.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Records that rolling back failed after `self`.
    #[must_use]
    pub fn with_rollback_failure(self, rollback: impl std::fmt::Display) -> Self {
        Self::RollbackFailed { rollback: rollback.to_string(), source: Box::new(self) }
    }

    /// Returns the root store error, looking through rollback notes.
    #[must_use]
    pub fn cause(&self) -> &StoreError {
        match self {
            Self::RollbackFailed { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Returns `true` if the root cause is [`StoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.cause(), Self::NotFound { .. })
    }

    /// Returns `true` if the root cause is [`StoreError::DuplicateKey`].
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self.cause(), Self::DuplicateKey { .. })
    }

    /// Returns `true` if the error is a contention signal that warrants
    /// another update cycle.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if the caller's context ended the operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause(), Self::Cancelled { .. })
    }

    /// Returns the caller's transform error, if this error carries one.
    #[must_use]
    pub fn transform_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self.cause() {
            Self::Transform { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Configuration validation errors.
///
/// Returned by builders and validating constructors when a value is out of
/// range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric value is below the allowed minimum.
    #[error("invalid configuration: {field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The field that failed validation.
        field: &'static str,
        /// The minimum allowed value, formatted for display.
        min: String,
        /// The rejected value, formatted for display.
        value: String,
    },

    /// Two related values are inconsistent.
    #[error("invalid configuration: {message}")]
    Inconsistent {
        /// What is wrong.
        message: String,
    },

    /// A string value is not acceptable.
    #[error("invalid configuration: {field}: {reason}")]
    InvalidValue {
        /// The field that failed validation.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
