//! Backoff driver for contended update cycles.
//!
//! Optimistic backends (document store, distributed coordination store, the
//! insert race in the relational store) loop `READ → TRANSFORM → WRITE-ATTEMPT`
//! until the write lands. [`RetryPolicy::start`] hands them an [`Attempts`]
//! iterator that paces those cycles:
//!
//! - The first attempt starts immediately
//! - Later attempts wait `min(initial_delay * factor^(n-1), max_delay)`, optionally jittered to a
//!   uniform value in the upper half of that range
//! - Every wait races the caller's [`Context`]; cancellation stops the loop
//! - After `max_attempts` cycles the loop stops with [`RetryStop::Exhausted`]
//!
//! ```
//! use simplekv::{Context, RetryPolicy, StoreError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let ctx = Context::background();
//! let policy = RetryPolicy::default();
//! let mut attempts = policy.start(&ctx);
//! let mut tries = 0;
//! let result: Result<(), StoreError> = loop {
//!     if let Err(stop) = attempts.next().await {
//!         break Err(stop.into_update_error("k"));
//!     }
//!     tries += 1;
//!     if tries == 3 {
//!         break Ok(());
//!     }
//! };
//! assert!(result.is_ok());
//! # });
//! ```

use std::time::Duration;

use fail::fail_point;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    context::{Context, ContextError},
    error::{ConfigError, StoreError},
};

/// Default first backoff delay (1 microsecond).
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_micros(1);

/// Default backoff growth factor.
pub const DEFAULT_FACTOR: u32 = 2;

/// Default backoff ceiling (500 milliseconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(500);

/// Default number of update cycles before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Exponential backoff policy for contended updates.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use simplekv::RetryPolicy;
///
/// let policy = RetryPolicy::builder()
///     .initial_delay(Duration::from_millis(1))
///     .max_delay(Duration::from_millis(50))
///     .max_attempts(20)
///     .build()?;
/// assert_eq!(policy.max_attempts(), 20);
/// # Ok::<(), simplekv::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    initial_delay: Duration,

    #[serde(default = "default_factor")]
    factor: u32,

    #[serde(with = "humantime_serde", default = "default_max_delay")]
    max_delay: Duration,

    #[serde(default = "default_jitter")]
    jitter: bool,

    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
}

fn default_initial_delay() -> Duration {
    DEFAULT_INITIAL_DELAY
}

fn default_factor() -> u32 {
    DEFAULT_FACTOR
}

fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}

fn default_jitter() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            factor: DEFAULT_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[bon::bon]
impl RetryPolicy {
    /// Creates a validated retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `max_attempts` is zero
    /// - `factor` is zero
    /// - `initial_delay` is greater than `max_delay`
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_INITIAL_DELAY)] initial_delay: Duration,
        #[builder(default = DEFAULT_FACTOR)] factor: u32,
        #[builder(default = DEFAULT_MAX_DELAY)] max_delay: Duration,
        #[builder(default = true)] jitter: bool,
        #[builder(default = DEFAULT_MAX_ATTEMPTS)] max_attempts: u32,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_attempts",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if factor == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "factor",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if initial_delay > max_delay {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "initial_delay ({initial_delay:?}) exceeds max_delay ({max_delay:?})"
                ),
            });
        }
        Ok(Self { initial_delay, factor, max_delay, jitter, max_attempts })
    }

    /// Re-checks a policy obtained through deserialization.
    ///
    /// # Errors
    ///
    /// Same conditions as [`RetryPolicy::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::builder()
            .initial_delay(self.initial_delay)
            .factor(self.factor)
            .max_delay(self.max_delay)
            .jitter(self.jitter)
            .max_attempts(self.max_attempts)
            .build()
            .map(|_| ())
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Multiplier applied to the delay after each retry.
    #[must_use]
    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Upper bound on a single delay.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether delays are randomized.
    #[must_use]
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Maximum number of update cycles per call.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Starts pacing a new update loop bounded by `ctx`.
    #[must_use]
    pub fn start<'a>(&'a self, ctx: &'a Context) -> Attempts<'a> {
        Attempts { policy: self, ctx, attempt: 0 }
    }

    /// Computes the un-jittered delay before retry number `retry` (1-based).
    fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(multiplier).min(self.max_delay)
    }
}

/// Computes the delay before retry number `retry`, including jitter.
///
/// Jitter picks uniformly from `[delay / 2, delay]` so concurrent writers
/// spread out without ever waiting longer than the cap.
fn compute_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let delay = policy.base_delay(retry);
    if !policy.jitter {
        return delay;
    }
    let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    if nanos < 2 {
        return delay;
    }
    Duration::from_nanos(rand::rng().random_range(nanos / 2..=nanos))
}

/// Why an update loop stopped without succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    /// The caller's context finished.
    Cancelled(ContextError),
    /// `max_attempts` cycles ran without the write landing.
    Exhausted {
        /// Number of cycles attempted.
        attempts: u32,
    },
}

impl RetryStop {
    /// Converts the stop reason into the error [`Store::update`](crate::Store::update)
    /// returns for `key`.
    #[must_use]
    pub fn into_update_error(self, key: &str) -> StoreError {
        match self {
            Self::Cancelled(err) => StoreError::cancelled("update", key, err),
            Self::Exhausted { attempts } => StoreError::retries_exhausted(key, attempts),
        }
    }
}

/// Paces the cycles of one update loop. Created by [`RetryPolicy::start`].
#[derive(Debug)]
pub struct Attempts<'a> {
    policy: &'a RetryPolicy,
    ctx: &'a Context,
    attempt: u32,
}

impl Attempts<'_> {
    /// Number of cycles started so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Waits until the next cycle may start.
    ///
    /// Returns immediately for the first cycle. The context is checked before
    /// every cycle, including the first.
    ///
    /// # Errors
    ///
    /// Returns [`RetryStop::Cancelled`] if the context finished, and
    /// [`RetryStop::Exhausted`] once `max_attempts` cycles have run.
    pub async fn next(&mut self) -> Result<u32, RetryStop> {
        if let Some(err) = self.ctx.err() {
            return Err(RetryStop::Cancelled(err));
        }
        if self.attempt >= self.policy.max_attempts {
            return Err(RetryStop::Exhausted { attempts: self.attempt });
        }
        if self.attempt > 0 {
            let delay = compute_delay(self.policy, self.attempt);
            tracing::debug!(
                attempt = self.attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_us = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX),
                "contention, retrying after backoff",
            );
            fail_point!("retry-before-sleep", |_| {
                Err(RetryStop::Cancelled(ContextError::Canceled))
            });
            if let Err(err) = self.ctx.run(tokio::time::sleep(delay)).await {
                return Err(RetryStop::Cancelled(err));
            }
        }
        self.attempt += 1;
        Ok(self.attempt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fixed_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(8))
            .jitter(false)
            .max_attempts(max_attempts)
            .build()
            .unwrap()
    }

    #[test]
    fn base_delay_grows_exponentially_and_caps() {
        let policy = fixed_policy(10);
        assert_eq!(policy.base_delay(1), Duration::from_millis(1));
        assert_eq!(policy.base_delay(2), Duration::from_millis(2));
        assert_eq!(policy.base_delay(3), Duration::from_millis(4));
        assert_eq!(policy.base_delay(4), Duration::from_millis(8));
        assert_eq!(policy.base_delay(5), Duration::from_millis(8));
        assert_eq!(policy.base_delay(64), Duration::from_millis(8));
    }

    #[test]
    fn jittered_delay_stays_in_upper_half() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(100))
            .build()
            .unwrap();
        for _ in 0..100 {
            let d = compute_delay(&policy, 3);
            assert!(d >= Duration::from_millis(50), "{d:?} below half");
            assert!(d <= Duration::from_millis(100), "{d:?} above cap");
        }
    }

    #[test]
    fn default_policy_matches_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay(), Duration::from_micros(1));
        assert_eq!(policy.factor(), 2);
        assert_eq!(policy.max_delay(), Duration::from_millis(500));
        assert!(policy.jitter());
        assert_eq!(policy.max_attempts(), 100);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RetryPolicy::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "max_attempts", .. }));
    }

    #[test]
    fn builder_rejects_initial_above_max() {
        let err = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(2))
            .max_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent { .. }));
    }

    #[test]
    fn deserializes_humantime_durations() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"initial_delay": "10ms", "max_delay": "2s", "max_attempts": 5}"#,
        )
        .unwrap();
        assert_eq!(policy.initial_delay(), Duration::from_millis(10));
        assert_eq!(policy.max_delay(), Duration::from_secs(2));
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.factor(), DEFAULT_FACTOR);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_stop_after_budget() {
        let ctx = Context::background();
        let policy = fixed_policy(3);
        let mut attempts = policy.start(&ctx);
        assert_eq!(attempts.next().await, Ok(1));
        assert_eq!(attempts.next().await, Ok(2));
        assert_eq!(attempts.next().await, Ok(3));
        assert_eq!(attempts.next().await, Err(RetryStop::Exhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_first_attempt() {
        let ctx = Context::background();
        ctx.cancel();
        let policy = RetryPolicy::default();
        let mut attempts = policy.start(&ctx);
        assert_eq!(attempts.next().await, Err(RetryStop::Cancelled(ContextError::Canceled)));
        assert_eq!(attempts.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_backoff_sleep() {
        let ctx = Context::with_timeout(Duration::from_millis(5));
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(1))
            .jitter(false)
            .build()
            .unwrap();
        let mut attempts = policy.start(&ctx);
        assert_eq!(attempts.next().await, Ok(1));
        let stop = attempts.next().await.unwrap_err();
        assert_eq!(stop, RetryStop::Cancelled(ContextError::DeadlineExceeded));
        let err = stop.into_update_error("k");
        assert_eq!(err.to_string(), "cannot update key k: context deadline exceeded");
    }

    #[test]
    fn exhausted_maps_to_retries_exhausted() {
        let err = RetryStop::Exhausted { attempts: 7 }.into_update_error("hot");
        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 7, .. }));
    }
}
