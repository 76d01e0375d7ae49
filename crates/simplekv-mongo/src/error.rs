//! Errors raised by a [`DocumentCollection`](crate::DocumentCollection).

use mongodb::error::{ErrorKind, WriteFailure};
use simplekv::StoreError;
use thiserror::Error;

/// MongoDB's duplicate key error code.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Result type alias for collection operations.
pub type DocResult<T> = std::result::Result<T, DocumentError>;

/// Errors from a document collection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DocumentError {
    /// An insert hit an existing `_id`.
    #[error("document {key} already exists")]
    DuplicateKey {
        /// The `_id` that collided.
        key: String,
    },

    /// A stored document does not have the expected shape.
    #[error("malformed document {key}: {message}")]
    Malformed {
        /// The `_id` of the document.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// The collection could not be reached.
    #[error("collection unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// Error reported by the MongoDB driver.
    #[error("mongodb: {0}")]
    Driver(#[from] mongodb::error::Error),
}

impl DocumentError {
    /// Classifies a driver error from an insert, turning a duplicate `_id`
    /// into [`DocumentError::DuplicateKey`].
    pub(crate) fn from_insert(key: &str, err: mongodb::error::Error) -> Self {
        if is_duplicate_key(&err) {
            Self::DuplicateKey { key: key.to_owned() }
        } else {
            Self::Driver(err)
        }
    }

    /// Converts into a [`StoreError`] naming the failed operation and key.
    pub(crate) fn into_store_error(self, operation: &str, key: &str) -> StoreError {
        let message = format!("cannot {operation} key {key}");
        match self {
            Self::DuplicateKey { key } => StoreError::conflict(key),
            err @ Self::Malformed { .. } => StoreError::serialization_with_source(message, err),
            err @ Self::Unavailable { .. } => StoreError::connection_with_source(message, err),
            Self::Driver(err) if is_connection_error(&err) => {
                StoreError::connection_with_source(message, err)
            },
            Self::Driver(err) => StoreError::backend_with_source(format!("{message}: {err}"), err),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

fn is_connection_error(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. }
    )
}
