//! Configuration for the etcd store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use simplekv::{ConfigError, RetryPolicy};

/// Default gateway endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Smallest accepted per-request timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration for [`EtcdStore`](crate::EtcdStore).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use simplekv_etcd::EtcdConfig;
///
/// let config = EtcdConfig::builder()
///     .endpoint("http://etcd:2379")
///     .prefix("app/sessions/")
///     .timeout(Duration::from_secs(2))
///     .build()?;
/// assert_eq!(config.prefix(), "app/sessions/");
/// # Ok::<(), simplekv::ConfigError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtcdConfig {
    /// Base URL of the v3 JSON gateway.
    #[serde(default = "default_endpoint")]
    endpoint: String,

    /// Prepended to every key; `keys` lists only keys under it.
    #[serde(default)]
    prefix: String,

    /// Per-request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    timeout: Duration,

    /// Backoff for contended updates.
    #[serde(default)]
    retry: RetryPolicy,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_owned()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            prefix: String::new(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

#[bon::bon]
impl EtcdConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `endpoint` is not an `http://` or `https://` URL
    /// - `timeout` is below [`MIN_TIMEOUT`]
    /// - `retry` is invalid
    #[builder]
    pub fn new(
        #[builder(into, default = DEFAULT_ENDPOINT.to_owned())] endpoint: String,
        #[builder(into, default)] prefix: String,
        #[builder(default = DEFAULT_TIMEOUT)] timeout: Duration,
        #[builder(default)] retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let config = Self { endpoint, prefix, timeout, retry };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks a configuration obtained through deserialization.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EtcdConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "endpoint",
                reason: format!("{:?} is not an http(s) URL", self.endpoint),
            });
        }
        if self.timeout < MIN_TIMEOUT {
            return Err(ConfigError::BelowMinimum {
                field: "timeout",
                min: format!("{MIN_TIMEOUT:?}"),
                value: format!("{:?}", self.timeout),
            });
        }
        self.retry.validate()
    }

    /// Returns the gateway endpoint without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    /// Returns the key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EtcdConfig::builder().build().unwrap();
        assert_eq!(config.endpoint(), "http://127.0.0.1:2379");
        assert_eq!(config.prefix(), "");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = EtcdConfig::builder().endpoint("http://etcd:2379/").build().unwrap();
        assert_eq!(config.endpoint(), "http://etcd:2379");
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let err = EtcdConfig::builder().endpoint("etcd:2379").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "endpoint", .. }));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = EtcdConfig::builder().timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "timeout", .. }));
    }

    #[test]
    fn deserializes_humantime_timeout() {
        let config: EtcdConfig =
            serde_json::from_str(r#"{"endpoint": "https://etcd:2379", "timeout": "750ms"}"#)
                .unwrap();
        config.validate().unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(750));
        assert_eq!(config.retry(), &RetryPolicy::default());
    }
}
