//! Error types for the etcd store.

use simplekv::{ConfigError, StoreError};
use thiserror::Error;

/// Result type alias for etcd client calls.
pub type Result<T> = std::result::Result<T, EtcdError>;

/// Errors from the etcd gateway client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EtcdError {
    /// The request could not be sent or the response not read.
    #[error("etcd request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("etcd returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message from the gateway's error body.
        message: String,
    },

    /// The gateway's response could not be decoded.
    #[error("malformed etcd response: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Message etcd returns when a request names a lease that no longer exists.
pub(crate) const LEASE_NOT_FOUND: &str = "etcdserver: requested lease not found";

impl EtcdError {
    /// Returns `true` if the request referenced a lease that expired or was
    /// revoked.
    #[must_use]
    pub fn is_lease_not_found(&self) -> bool {
        matches!(self, Self::Status { message, .. } if message.contains(LEASE_NOT_FOUND))
    }

    /// Converts into a [`StoreError`] naming the failed operation and key.
    pub(crate) fn into_store_error(self, operation: &str, key: &str) -> StoreError {
        let message = format!("cannot {operation} key {key}");
        match self {
            Self::Http(err) if err.is_connect() || err.is_timeout() => {
                StoreError::connection_with_source(message, err)
            },
            err @ Self::Status { status: 503, .. } => StoreError::connection_with_source(message, err),
            err @ Self::Decode { .. } => StoreError::serialization_with_source(message, err),
            Self::Config(err) => StoreError::Config(err),
            err => StoreError::backend_with_source(format!("{message}: {err}"), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_gateway_is_connection_error() {
        let err = EtcdError::Status { status: 503, message: "etcdserver: no leader".into() };
        assert!(matches!(err.into_store_error("get", "k"), StoreError::Connection { .. }));
    }

    #[test]
    fn other_status_is_backend_error() {
        let err = EtcdError::Status { status: 400, message: "etcdserver: bad request".into() };
        let store_err = err.into_store_error("update", "k");
        assert_eq!(
            store_err.to_string(),
            "cannot update key k: etcd returned 400: etcdserver: bad request"
        );
    }

    #[test]
    fn lapsed_lease_is_recognized() {
        let err = EtcdError::Status { status: 404, message: LEASE_NOT_FOUND.into() };
        assert!(err.is_lease_not_found());
        let err = EtcdError::Status { status: 404, message: "etcdserver: key not found".into() };
        assert!(!err.is_lease_not_found());
    }

    #[test]
    fn decode_failure_is_serialization_error() {
        let err = EtcdError::Decode { message: "bad base64".into() };
        assert!(matches!(err.into_store_error("get", "k"), StoreError::Serialization { .. }));
    }
}
