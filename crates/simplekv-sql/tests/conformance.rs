//! Conformance test suite for `SqlStore`.
//!
//! Every test opens its own database file, so tests are independent and can
//! run in parallel.

#![allow(clippy::expect_used, clippy::panic)]

use simplekv::conformance;
use simplekv_sql::testutil::TestDatabase;

// ============================================================================
// Read/write (4 tests)
// ============================================================================

#[tokio::test]
async fn set_then_get_returns_value() {
    let db = TestDatabase::new().await;
    conformance::set_then_get_returns_value(db.store()).await;
}

#[tokio::test]
async fn set_overwrites_existing() {
    let db = TestDatabase::new().await;
    conformance::set_overwrites_existing(db.store()).await;
}

#[tokio::test]
async fn binary_value_roundtrip() {
    let db = TestDatabase::new().await;
    conformance::binary_value_roundtrip(db.store()).await;
}

#[tokio::test]
async fn get_missing_key_is_not_found() {
    let db = TestDatabase::new().await;
    conformance::get_missing_key_is_not_found(db.store()).await;
}

// ============================================================================
// Once (2 tests)
// ============================================================================

#[tokio::test]
async fn set_key_once_writes_absent_key() {
    let db = TestDatabase::new().await;
    conformance::set_key_once_writes_absent_key(db.store()).await;
}

#[tokio::test]
async fn set_key_once_rejects_duplicate() {
    let db = TestDatabase::new().await;
    conformance::set_key_once_rejects_duplicate(db.store()).await;
}

// ============================================================================
// Update (6 tests)
// ============================================================================

#[tokio::test]
async fn update_sees_existing_value() {
    let db = TestDatabase::new().await;
    conformance::update_sees_existing_value(db.store()).await;
}

#[tokio::test]
async fn update_absent_key_passes_none() {
    let db = TestDatabase::new().await;
    conformance::update_absent_key_passes_none(db.store()).await;
}

#[tokio::test]
async fn set_empty_updates_as_empty() {
    let db = TestDatabase::new().await;
    conformance::set_empty_updates_as_empty(db.store()).await;
}

#[tokio::test]
async fn update_empty_result_updates_as_empty() {
    let db = TestDatabase::new().await;
    conformance::update_empty_result_updates_as_empty(db.store()).await;
}

#[tokio::test]
async fn update_transform_error_passes_through() {
    let db = TestDatabase::new().await;
    conformance::update_transform_error_passes_through(db.store()).await;
}

#[tokio::test]
async fn update_unchanged_value_is_noop() {
    let db = TestDatabase::new().await;
    conformance::update_unchanged_value_is_noop(db.store()).await;
}

// ============================================================================
// Concurrent (2 tests)
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_concurrent_increments() {
    let db = TestDatabase::new().await;
    conformance::update_concurrent_increments(db.shared()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_key_once_single_winner() {
    let db = TestDatabase::new().await;
    conformance::set_key_once_single_winner(db.shared()).await;
}

// ============================================================================
// Scope (2 tests)
// ============================================================================

#[tokio::test]
async fn update_cancelled_context_fails() {
    let db = TestDatabase::new().await;
    conformance::update_cancelled_context_fails(db.store()).await;
}

#[tokio::test]
async fn keys_lists_written_keys() {
    let db = TestDatabase::new().await;
    conformance::keys_lists_written_keys(db.store()).await;
}

// ============================================================================
// Full suite
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_all() {
    let db = TestDatabase::new().await;
    conformance::run_all(db.shared()).await;
}
