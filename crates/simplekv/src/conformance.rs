//! Conformance test suite for [`Store`] implementations.
//!
//! Every backend runs the same async test functions to show it honours the
//! contract: round-trips, not-found semantics, once-semantics, update
//! visibility, nil normalization, transform error passthrough, lost-update
//! freedom under contention, and no-op writes.
//!
//! # Usage
//!
//! Enable the `testutil` feature and register each function as its own test
//! with a fresh store:
//!
//! ```no_run
//! use simplekv::{MemoryStore, conformance};
//!
//! #[tokio::test]
//! async fn get_missing_key_is_not_found() {
//!     conformance::get_missing_key_is_not_found(&MemoryStore::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | Read/write | 4 tests | `set`/`get` round-trip and not-found |
//! | Once | 2 tests | `set_key_once` |
//! | Update | 6 tests | transform inputs, outputs and errors |
//! | Concurrent | 2 tests | lost-update freedom under contention |
//! | Scope | 2 tests | cancellation and `keys` |

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::{
    assert_duplicate_key, assert_not_found,
    codec::Expiry,
    context::Context,
    error::StoreError,
    store::{Store, set_key_once},
};

/// Error returned by transforms in the passthrough tests.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("transform refused key {0}")]
pub struct RefusedError(pub String);

async fn scope<S: Store>(store: &S) -> crate::Scope<S::Session> {
    store.scope(Context::background()).await.expect("scope should be acquired")
}

// ============================================================================
// Read/write: set/get round-trip and not-found (4 tests)
// ============================================================================

/// `set` then `get` returns the exact bytes written.
pub async fn set_then_get_returns_value<S: Store>(store: &S) {
    let scope = scope(store).await;
    store.set(&scope, "rw:k1", b"some value".to_vec(), Expiry::Never).await.expect("set");
    let value = store.get(&scope, "rw:k1").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"some value"));
}

/// `set` on an existing key replaces the value.
pub async fn set_overwrites_existing<S: Store>(store: &S) {
    let scope = scope(store).await;
    store.set(&scope, "rw:k2", b"original".to_vec(), Expiry::Never).await.expect("set");
    store.set(&scope, "rw:k2", b"updated".to_vec(), Expiry::Never).await.expect("overwrite");
    let value = store.get(&scope, "rw:k2").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"updated"));
}

/// Binary values, including NUL and high bytes, round-trip unchanged.
pub async fn binary_value_roundtrip<S: Store>(store: &S) {
    let scope = scope(store).await;
    let value: Vec<u8> = (0..=255u8).collect();
    store.set(&scope, "rw:binary", value.clone(), Expiry::Never).await.expect("set");
    let read = store.get(&scope, "rw:binary").await.expect("get");
    assert_eq!(read.as_ref(), value.as_slice());
}

/// `get` on a never-written key fails with `NotFound` naming the key.
pub async fn get_missing_key_is_not_found<S: Store>(store: &S) {
    let scope = scope(store).await;
    let result = store.get(&scope, "rw:never-written").await;
    assert_not_found!(&result);
    let message = result.expect_err("checked above").to_string();
    assert!(message.contains("rw:never-written"), "message should name the key: {message}");
}

// ============================================================================
// Once: set_key_once (2 tests)
// ============================================================================

/// The first `set_key_once` writes the value.
pub async fn set_key_once_writes_absent_key<S: Store>(store: &S) {
    let scope = scope(store).await;
    set_key_once(store, &scope, "once:k", b"first".to_vec(), Expiry::Never)
        .await
        .expect("first set_key_once should succeed");
    let value = store.get(&scope, "once:k").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"first"));
}

/// A second `set_key_once` fails with `DuplicateKey` and keeps the first value.
pub async fn set_key_once_rejects_duplicate<S: Store>(store: &S) {
    let scope = scope(store).await;
    set_key_once(store, &scope, "once:dup", b"first".to_vec(), Expiry::Never)
        .await
        .expect("first set_key_once should succeed");
    let result = set_key_once(store, &scope, "once:dup", b"second".to_vec(), Expiry::Never).await;
    assert_duplicate_key!(&result);
    let value = store.get(&scope, "once:dup").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"first"));
}

// ============================================================================
// Update: transform inputs, outputs and errors (6 tests)
// ============================================================================

/// `update` passes the stored value to the transform and writes its result.
pub async fn update_sees_existing_value<S: Store>(store: &S) {
    let scope = scope(store).await;
    store.set(&scope, "up:existing", b"A".to_vec(), Expiry::Never).await.expect("set");

    let mut seen = Vec::new();
    store
        .update(&scope, "up:existing", Expiry::Never, |old| {
            seen.push(old.map(<[u8]>::to_vec));
            Ok(b"B".to_vec())
        })
        .await
        .expect("update");

    assert_eq!(seen.last(), Some(&Some(b"A".to_vec())));
    let value = store.get(&scope, "up:existing").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"B"));
}

/// `update` on a never-set key passes `None`, not empty bytes.
pub async fn update_absent_key_passes_none<S: Store>(store: &S) {
    let scope = scope(store).await;

    let mut seen = Vec::new();
    store
        .update(&scope, "up:absent", Expiry::Never, |old| {
            seen.push(old.map(<[u8]>::to_vec));
            Ok(b"X".to_vec())
        })
        .await
        .expect("update");

    assert_eq!(seen.first(), Some(&None), "first transform call must see an absent key");
    let value = store.get(&scope, "up:absent").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"X"));
}

/// An empty value written by `set` reaches the transform as empty bytes.
pub async fn set_empty_updates_as_empty<S: Store>(store: &S) {
    let scope = scope(store).await;
    store.set(&scope, "up:empty-set", Vec::new(), Expiry::Never).await.expect("set empty");

    let mut seen = Vec::new();
    store
        .update(&scope, "up:empty-set", Expiry::Never, |old| {
            seen.push(old.map(<[u8]>::to_vec));
            Ok(Vec::new())
        })
        .await
        .expect("update");

    assert_eq!(seen, vec![Some(Vec::new())], "stored empty value must not read as absent");
    let value = store.get(&scope, "up:empty-set").await.expect("get");
    assert!(value.is_empty());
}

/// An empty value written by a transform reaches the next transform as empty bytes.
pub async fn update_empty_result_updates_as_empty<S: Store>(store: &S) {
    let scope = scope(store).await;
    store
        .update(&scope, "up:empty-update", Expiry::Never, |_| Ok(Vec::new()))
        .await
        .expect("first update");

    let mut seen = Vec::new();
    store
        .update(&scope, "up:empty-update", Expiry::Never, |old| {
            seen.push(old.map(<[u8]>::to_vec));
            Ok(b"filled".to_vec())
        })
        .await
        .expect("second update");

    assert_eq!(seen, vec![Some(Vec::new())]);
    let value = store.get(&scope, "up:empty-update").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"filled"));
}

/// A transform error is returned unchanged and nothing is written, whether
/// or not the key existed.
pub async fn update_transform_error_passes_through<S: Store>(store: &S) {
    let scope = scope(store).await;
    store.set(&scope, "up:err-existing", b"keep".to_vec(), Expiry::Never).await.expect("set");

    for key in ["up:err-existing", "up:err-absent"] {
        let err = store
            .update(&scope, key, Expiry::Never, |_| {
                Err(StoreError::transform(RefusedError(key.to_string())))
            })
            .await
            .expect_err("transform error must fail the update");

        let source = err.transform_source().expect("error should carry the transform source");
        assert_eq!(source.downcast_ref::<RefusedError>(), Some(&RefusedError(key.to_string())));
        assert_eq!(err.to_string(), format!("transform refused key {key}"));
    }

    let value = store.get(&scope, "up:err-existing").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"keep"));
    assert_not_found!(store.get(&scope, "up:err-absent").await);
}

/// Returning the old value unchanged succeeds and leaves the value in place.
pub async fn update_unchanged_value_is_noop<S: Store>(store: &S) {
    let scope = scope(store).await;
    store.set(&scope, "up:noop", b"same".to_vec(), Expiry::Never).await.expect("set");
    store
        .update(&scope, "up:noop", Expiry::Never, |old| Ok(old.unwrap_or_default().to_vec()))
        .await
        .expect("no-op update");
    let value = store.get(&scope, "up:noop").await.expect("get");
    assert_eq!(value, Bytes::from_static(b"same"));
}

// ============================================================================
// Concurrent: lost-update freedom (2 tests)
// ============================================================================

fn increment(old: Option<&[u8]>) -> Vec<u8> {
    let current = old.and_then(|v| v.first().copied()).unwrap_or(0);
    vec![current.wrapping_add(1)]
}

/// Two tasks each increment a one-byte counter 100 times through `update`.
/// Every transform sleeps briefly to widen the race window. The final
/// counter must be exactly 200.
///
/// Each task opens its own scope, since a backend may serialize calls made
/// through one scope. Register with a multi-threaded runtime so the tasks
/// truly overlap.
pub async fn update_concurrent_increments<S: Store + 'static>(store: Arc<S>) {
    const LOOPS: usize = 100;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..2 {
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let scope = store.scope(Context::background()).await.expect("scope");
            for _ in 0..LOOPS {
                store
                    .update(&scope, "cc:counter", Expiry::Never, |old| {
                        std::thread::sleep(Duration::from_millis(1));
                        Ok(increment(old))
                    })
                    .await
                    .expect("concurrent update should succeed");
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("increment task panicked");
    }

    let scope = scope(store.as_ref()).await;
    let value = store.get(&scope, "cc:counter").await.expect("get");
    assert_eq!(value.as_ref(), &[200u8], "lost update detected");
}

/// Many tasks race `set_key_once` on one key; exactly one wins.
pub async fn set_key_once_single_winner<S: Store + 'static>(store: Arc<S>) {
    const TASKS: usize = 8;
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..TASKS {
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let scope = store.scope(Context::background()).await.expect("scope");
            set_key_once(store.as_ref(), &scope, "cc:once", vec![i as u8], Expiry::Never).await
        });
    }

    let mut winners = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(()) => winners += 1,
            Err(err) => assert!(err.is_duplicate_key(), "losers must see DuplicateKey: {err}"),
        }
    }
    assert_eq!(winners, 1, "exactly one set_key_once must win");
}

// ============================================================================
// Scope: cancellation and key enumeration (2 tests)
// ============================================================================

/// `update` under a cancelled context fails with "cannot update key" without
/// calling the transform.
pub async fn update_cancelled_context_fails<S: Store>(store: &S) {
    let ctx = Context::background();
    ctx.cancel();
    let scope = store.scope(ctx).await.expect("scope");

    let mut calls = 0;
    let err = store
        .update(&scope, "scope:cancelled", Expiry::Never, |_| {
            calls += 1;
            Ok(b"never".to_vec())
        })
        .await
        .expect_err("cancelled update must fail");

    assert!(err.is_cancelled(), "expected Cancelled, got: {err:?}");
    assert!(err.to_string().starts_with("cannot update key scope:cancelled"), "{err}");
    assert_eq!(calls, 0);
}

/// `keys` lists written keys in lexicographic order.
pub async fn keys_lists_written_keys<S: Store>(store: &S) {
    let scope = scope(store).await;
    for key in ["keys:c", "keys:a", "keys:b"] {
        store.set(&scope, key, b"v".to_vec(), Expiry::Never).await.expect("set");
    }
    store
        .update(&scope, "keys:d", Expiry::after(Duration::from_secs(3600)), |_| Ok(b"v".to_vec()))
        .await
        .expect("update");

    let keys: Vec<String> = store
        .keys(&scope)
        .await
        .expect("keys")
        .into_iter()
        .filter(|k| k.starts_with("keys:"))
        .collect();
    assert_eq!(keys, vec!["keys:a", "keys:b", "keys:c", "keys:d"]);
}

// ============================================================================
// Runner
// ============================================================================

/// Runs every conformance test sequentially against one store.
///
/// Keys are namespaced per test, so a single instance can host the whole
/// suite. Use a multi-threaded runtime:
///
/// ```no_run
/// use std::sync::Arc;
///
/// use simplekv::{MemoryStore, conformance};
///
/// #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
/// async fn memory_store_conformance() {
///     conformance::run_all(Arc::new(MemoryStore::new())).await;
/// }
/// ```
pub async fn run_all<S: Store + 'static>(store: Arc<S>) {
    // Read/write
    set_then_get_returns_value(store.as_ref()).await;
    set_overwrites_existing(store.as_ref()).await;
    binary_value_roundtrip(store.as_ref()).await;
    get_missing_key_is_not_found(store.as_ref()).await;

    // Once
    set_key_once_writes_absent_key(store.as_ref()).await;
    set_key_once_rejects_duplicate(store.as_ref()).await;

    // Update
    update_sees_existing_value(store.as_ref()).await;
    update_absent_key_passes_none(store.as_ref()).await;
    set_empty_updates_as_empty(store.as_ref()).await;
    update_empty_result_updates_as_empty(store.as_ref()).await;
    update_transform_error_passes_through(store.as_ref()).await;
    update_unchanged_value_is_noop(store.as_ref()).await;

    // Concurrent
    update_concurrent_increments(Arc::clone(&store)).await;
    set_key_once_single_winner(Arc::clone(&store)).await;

    // Scope
    update_cancelled_context_fails(store.as_ref()).await;
    keys_lists_written_keys(store.as_ref()).await;
}
