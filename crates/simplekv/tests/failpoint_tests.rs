#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p simplekv --features failpoints --test failpoint_tests
//! ```

#![cfg(feature = "failpoints")]

use std::time::Duration;

use simplekv::{Context, RetryPolicy, RetryStop};

#[tokio::test]
async fn retry_sleep_failpoint_stops_loop() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("retry-before-sleep", "return").expect("failed to configure fail point");

    let ctx = Context::background();
    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(1))
        .build()
        .expect("valid policy");
    let mut attempts = policy.start(&ctx);

    assert_eq!(attempts.next().await, Ok(1), "first attempt never sleeps");
    let stop = attempts.next().await.expect_err("fail point should stop the loop");
    assert!(matches!(stop, RetryStop::Cancelled(_)));

    scenario.teardown();
}

#[tokio::test]
async fn retry_without_failpoint_continues() {
    let scenario = fail::FailScenario::setup();

    let ctx = Context::background();
    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_micros(1))
        .max_delay(Duration::from_micros(10))
        .max_attempts(3)
        .build()
        .expect("valid policy");
    let mut attempts = policy.start(&ctx);

    assert_eq!(attempts.next().await, Ok(1));
    assert_eq!(attempts.next().await, Ok(2));
    assert_eq!(attempts.next().await, Ok(3));

    scenario.teardown();
}
