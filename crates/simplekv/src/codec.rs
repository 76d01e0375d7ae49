//! Value and expiry representation shared by all backends.
//!
//! Values are raw bytes. An absent entry is `None`; a stored empty value is
//! `Some(&[])`. Backends normalize a missing or NULL engine value to empty bytes
//! with [`normalize_value`] so the two never get confused.
//!
//! Expiry is a best-effort hint. [`Expiry::Never`] keeps the entry forever;
//! [`Expiry::At`] allows the backend to drop it any time after the instant.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// When an entry may be garbage-collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// The entry never expires.
    #[default]
    Never,
    /// The entry may be removed after this instant.
    At(DateTime<Utc>),
}

impl Expiry {
    /// Expires `ttl` from now.
    #[must_use]
    pub fn after(ttl: Duration) -> Self {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now().checked_add_signed(ttl).map_or(Self::Never, Self::At),
            Err(_) => Self::Never,
        }
    }

    /// Expires at `at`.
    #[must_use]
    pub fn at(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }

    /// Returns `true` for [`Expiry::Never`].
    #[must_use]
    pub fn is_never(&self) -> bool {
        matches!(self, Self::Never)
    }

    /// The expiry instant, if any.
    #[must_use]
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Never => None,
            Self::At(at) => Some(*at),
        }
    }

    /// Returns `true` if the entry is past its expiry at `now`.
    #[must_use]
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::At(at) => *at <= now,
        }
    }

    /// Milliseconds since the Unix epoch, or `None` for [`Expiry::Never`].
    #[must_use]
    pub fn unix_millis(&self) -> Option<i64> {
        self.instant().map(|at| at.timestamp_millis())
    }

    /// Inverse of [`Expiry::unix_millis`]. Out-of-range values read as never.
    #[must_use]
    pub fn from_unix_millis(millis: Option<i64>) -> Self {
        match millis {
            Some(ms) => Utc.timestamp_millis_opt(ms).single().map_or(Self::Never, Self::At),
            None => Self::Never,
        }
    }

    /// Whole seconds of life left at `now`, rounded up.
    ///
    /// Returns `None` for [`Expiry::Never`]. An instant already in the past
    /// yields one second, the shortest lease most engines grant.
    #[must_use]
    pub fn ttl_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        let at = self.instant()?;
        let millis = (at - now).num_milliseconds();
        if millis <= 0 {
            return Some(1);
        }
        Some((millis + 999) / 1000)
    }
}

impl From<Option<DateTime<Utc>>> for Expiry {
    fn from(at: Option<DateTime<Utc>>) -> Self {
        at.map_or(Self::Never, Self::At)
    }
}

impl From<DateTime<Utc>> for Expiry {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

/// Normalizes a value read back from an engine: missing becomes empty bytes.
#[must_use]
pub fn normalize_value(value: Option<Vec<u8>>) -> Bytes {
    value.map(Bytes::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_default_and_never_passes() {
        let expiry = Expiry::default();
        assert!(expiry.is_never());
        assert!(!expiry.has_passed(Utc::now()));
        assert_eq!(expiry.unix_millis(), None);
        assert_eq!(expiry.ttl_seconds(Utc::now()), None);
    }

    #[test]
    fn unix_millis_round_trip() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap_or_default();
        let expiry = Expiry::at(at);
        assert_eq!(expiry.unix_millis(), Some(1_700_000_000_123));
        assert_eq!(Expiry::from_unix_millis(Some(1_700_000_000_123)), expiry);
        assert_eq!(Expiry::from_unix_millis(None), Expiry::Never);
    }

    #[test]
    fn ttl_rounds_up_and_floors_at_one_second() {
        let now = Utc::now();
        let expiry = Expiry::at(now + chrono::Duration::milliseconds(1_500));
        assert_eq!(expiry.ttl_seconds(now), Some(2));

        let past = Expiry::at(now - chrono::Duration::seconds(30));
        assert_eq!(past.ttl_seconds(now), Some(1));
        assert!(past.has_passed(now));
    }

    #[test]
    fn after_lands_in_the_future() {
        let expiry = Expiry::after(Duration::from_secs(60));
        assert!(!expiry.has_passed(Utc::now()));
        assert!(expiry.has_passed(Utc::now() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn missing_value_normalizes_to_empty() {
        assert_eq!(normalize_value(None), Bytes::new());
        assert_eq!(normalize_value(Some(b"x".to_vec())), Bytes::from_static(b"x"));
    }
}
