//! Conformance test suite for `MemoryStore`.
//!
//! Each test function corresponds to a single conformance check, providing
//! fine-grained failure reporting. The `run_all` test exercises the full
//! suite as a one-liner to verify no tests are accidentally omitted.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use simplekv::{MemoryStore, conformance};

// ============================================================================
// Read/write (4 tests)
// ============================================================================

#[tokio::test]
async fn set_then_get_returns_value() {
    conformance::set_then_get_returns_value(&MemoryStore::new()).await;
}

#[tokio::test]
async fn set_overwrites_existing() {
    conformance::set_overwrites_existing(&MemoryStore::new()).await;
}

#[tokio::test]
async fn binary_value_roundtrip() {
    conformance::binary_value_roundtrip(&MemoryStore::new()).await;
}

#[tokio::test]
async fn get_missing_key_is_not_found() {
    conformance::get_missing_key_is_not_found(&MemoryStore::new()).await;
}

// ============================================================================
// Once (2 tests)
// ============================================================================

#[tokio::test]
async fn set_key_once_writes_absent_key() {
    conformance::set_key_once_writes_absent_key(&MemoryStore::new()).await;
}

#[tokio::test]
async fn set_key_once_rejects_duplicate() {
    conformance::set_key_once_rejects_duplicate(&MemoryStore::new()).await;
}

// ============================================================================
// Update (6 tests)
// ============================================================================

#[tokio::test]
async fn update_sees_existing_value() {
    conformance::update_sees_existing_value(&MemoryStore::new()).await;
}

#[tokio::test]
async fn update_absent_key_passes_none() {
    conformance::update_absent_key_passes_none(&MemoryStore::new()).await;
}

#[tokio::test]
async fn set_empty_updates_as_empty() {
    conformance::set_empty_updates_as_empty(&MemoryStore::new()).await;
}

#[tokio::test]
async fn update_empty_result_updates_as_empty() {
    conformance::update_empty_result_updates_as_empty(&MemoryStore::new()).await;
}

#[tokio::test]
async fn update_transform_error_passes_through() {
    conformance::update_transform_error_passes_through(&MemoryStore::new()).await;
}

#[tokio::test]
async fn update_unchanged_value_is_noop() {
    conformance::update_unchanged_value_is_noop(&MemoryStore::new()).await;
}

// ============================================================================
// Concurrent (2 tests)
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_concurrent_increments() {
    conformance::update_concurrent_increments(Arc::new(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_key_once_single_winner() {
    conformance::set_key_once_single_winner(Arc::new(MemoryStore::new())).await;
}

// ============================================================================
// Scope (2 tests)
// ============================================================================

#[tokio::test]
async fn update_cancelled_context_fails() {
    conformance::update_cancelled_context_fails(&MemoryStore::new()).await;
}

#[tokio::test]
async fn keys_lists_written_keys() {
    conformance::keys_lists_written_keys(&MemoryStore::new()).await;
}
// ============================================================================
// Full suite
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_all() {
    conformance::run_all(Arc::new(MemoryStore::new())).await;
}
