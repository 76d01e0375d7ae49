//! Update-loop behaviour driven through `MemoryCollection` hooks.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use chrono::Utc;
use simplekv::{Expiry, RetryPolicy, Store, StoreError, assert_not_found, testutil::background_scope};
use simplekv_mongo::{
    MongoStore, StoredDocument,
    testutil::{MemoryCollection, fast_retry},
};

async fn store_over(collection: &MemoryCollection) -> MongoStore<MemoryCollection> {
    MongoStore::new(collection.clone()).await.unwrap().with_retry_policy(fast_retry())
}

fn past() -> Expiry {
    Expiry::at(Utc::now() - chrono::Duration::seconds(30))
}

// ============================================================================
// Contention
// ============================================================================

#[tokio::test]
async fn lost_conditional_update_is_retried_with_fresh_value() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;
    let scope = background_scope(&store).await;
    store.set(&scope, "k", b"a".to_vec(), Expiry::Never).await.unwrap();

    collection.interfere_with(StoredDocument::new("k", b"b".to_vec(), Expiry::Never));

    let mut seen = Vec::new();
    store
        .update(&scope, "k", Expiry::Never, |old| {
            let old = old.unwrap().to_vec();
            seen.push(old.clone());
            let mut new = old;
            new.push(b'!');
            Ok(new)
        })
        .await
        .unwrap();

    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(store.get(&scope, "k").await.unwrap().as_ref(), b"b!");
}

/// Increments `counter` `loops` times through a scope of its own.
async fn increment_loop(store: &MongoStore<MemoryCollection>, calls: &AtomicUsize, loops: usize) {
    let scope = background_scope(store).await;
    for _ in 0..loops {
        store
            .update(&scope, "counter", Expiry::Never, |old| {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(vec![old.map_or(0, |v| v[0]) + 1])
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn separate_scopes_race_on_one_key() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;
    let calls = AtomicUsize::new(0);

    tokio::join!(increment_loop(&store, &calls, 10), increment_loop(&store, &calls, 10));

    let scope = background_scope(&store).await;
    assert_eq!(store.get(&scope, "counter").await.unwrap().as_ref(), &[20]);
    assert!(calls.load(Ordering::Relaxed) > 20, "interleaved updates never hit the retry path");
}

#[tokio::test]
async fn endless_contention_exhausts_retries() {
    let collection = MemoryCollection::new();
    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_micros(10))
        .max_delay(Duration::from_micros(100))
        .max_attempts(5)
        .build()
        .unwrap();
    let store = MongoStore::new(collection.clone()).await.unwrap().with_retry_policy(policy);
    let scope = background_scope(&store).await;
    store.set(&scope, "hot", vec![0], Expiry::Never).await.unwrap();

    for i in 1..=5u8 {
        collection.interfere_with(StoredDocument::new("hot", vec![i], Expiry::Never));
    }

    let err = store
        .update(&scope, "hot", Expiry::Never, |old| Ok(vec![old.unwrap()[0] + 100]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RetriesExhausted { attempts: 5, .. }), "{err:?}");
    assert_eq!(err.to_string(), "too many retry attempts trying to update key hot");
}

#[tokio::test]
async fn engine_errors_are_not_retried() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;
    let scope = background_scope(&store).await;

    collection.fail_next(1);
    let mut calls = 0;
    let err = store
        .update(&scope, "k", Expiry::Never, |_| {
            calls += 1;
            Ok(b"v".to_vec())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Connection { .. }), "{err:?}");
    assert_eq!(calls, 0);
    assert_eq!(collection.writes(), 0);
}

#[tokio::test]
async fn unchanged_value_skips_write() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;
    let scope = background_scope(&store).await;
    store.set(&scope, "k", b"same".to_vec(), Expiry::Never).await.unwrap();
    let writes = collection.writes();

    store.update(&scope, "k", Expiry::Never, |old| Ok(old.unwrap().to_vec())).await.unwrap();
    assert_eq!(collection.writes(), writes);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn expired_document_reads_as_absent() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;
    let scope = background_scope(&store).await;

    collection.put(StoredDocument::new("old", b"v".to_vec(), past()));
    assert_not_found!(store.get(&scope, "old").await);
    assert!(store.keys(&scope).await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_document_is_replaced_conditionally() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;
    let scope = background_scope(&store).await;
    collection.put(StoredDocument::new("once", b"stale".to_vec(), past()));

    simplekv::set_key_once(&store, &scope, "once", b"fresh".to_vec(), Expiry::Never)
        .await
        .unwrap();

    let doc = collection.document("once").unwrap();
    assert_eq!(doc.value, b"fresh");
    assert_eq!(doc.expire, Expiry::Never);
}

#[tokio::test]
async fn set_with_never_clears_previous_expiry() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;
    let scope = background_scope(&store).await;

    store.set(&scope, "k", b"v".to_vec(), Expiry::after(Duration::from_secs(60))).await.unwrap();
    store.set(&scope, "k", b"v".to_vec(), Expiry::Never).await.unwrap();
    assert_eq!(collection.document("k").unwrap().expire, Expiry::Never);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn each_scope_starts_a_session() {
    let collection = MemoryCollection::new();
    let store = store_over(&collection).await;

    let first = background_scope(&store).await;
    let second = background_scope(&store).await;
    assert_eq!(collection.sessions(), 2);

    store.set(&first, "k", b"v".to_vec(), Expiry::Never).await.unwrap();
    assert_eq!(store.get(&second, "k").await.unwrap().as_ref(), b"v");
    first.close();
    second.close();
}

#[tokio::test]
async fn new_fails_when_index_cannot_be_created() {
    let collection = MemoryCollection::new();
    collection.fail_next(1);
    let err = MongoStore::new(collection).await.unwrap_err();
    assert!(err.to_string().contains("injected failure"), "{err}");
}
