//! In-memory store implementation.
//!
//! [`MemoryStore`] keeps every entry in a [`BTreeMap`] behind a single
//! [`parking_lot::Mutex`]. `update` holds that mutex for its whole
//! read-transform-write cycle, so updates never contend and never retry. This
//! also blocks every other call, on any key, while a transform runs; the store
//! targets tests and small deployments where that is acceptable.
//!
//! # Example
//!
//! ```
//! use simplekv::{Context, Expiry, MemoryStore, Store};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let scope = store.scope(Context::background()).await.unwrap();
//!
//!     store.set(&scope, "greeting", b"hello".to_vec(), Expiry::Never).await.unwrap();
//!     let value = store.get(&scope, "greeting").await.unwrap();
//!
//!     assert_eq!(value.as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Expired entries are hidden on read and purged by the next write, so memory is only reclaimed
//!   when the store is written to. Writes find expired entries through an expiry-ordered index, so a
//!   purge costs `O(log n)` per removed entry rather than a scan of the map

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    codec::Expiry,
    context::{Context, Scope},
    error::{StoreError, StoreResult},
    store::Store,
};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expire: Expiry,
}

impl MemoryEntry {
    fn live_value(&self, now: DateTime<Utc>) -> Option<&Bytes> {
        (!self.expire.has_passed(now)).then_some(&self.value)
    }
}

/// Entries plus an index of the ones that expire, ordered by expiry.
#[derive(Debug, Default)]
struct Entries {
    map: BTreeMap<String, MemoryEntry>,
    by_expiry: BTreeSet<(DateTime<Utc>, String)>,
}

impl Entries {
    fn insert(&mut self, key: &str, entry: MemoryEntry) {
        if let Some(at) = self.map.get(key).and_then(|old| old.expire.instant()) {
            self.by_expiry.remove(&(at, key.to_owned()));
        }
        if let Some(at) = entry.expire.instant() {
            self.by_expiry.insert((at, key.to_owned()));
        }
        self.map.insert(key.to_owned(), entry);
    }

    /// Removes every entry expired at `now`, earliest first.
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        while let Some((at, _)) = self.by_expiry.first() {
            if *at > now {
                break;
            }
            if let Some((_, key)) = self.by_expiry.pop_first() {
                self.map.remove(&key);
            }
        }
    }
}

/// In-memory store using a mutex-guarded [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryStore` is cheaply cloneable via [`Arc`]. All clones share the same
/// entries.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().map.is_empty()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("entries", &self.len()).finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Session = ();

    async fn scope(&self, ctx: Context) -> StoreResult<Scope<()>> {
        Ok(Scope::new(ctx, ()))
    }

    #[tracing::instrument(skip(self, _scope))]
    async fn get(&self, _scope: &Scope<()>, key: &str) -> StoreResult<Bytes> {
        let entries = self.entries.lock();
        entries
            .map
            .get(key)
            .and_then(|entry| entry.live_value(Utc::now()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    #[tracing::instrument(skip(self, _scope, value), fields(value_len = value.len()))]
    async fn set(
        &self,
        _scope: &Scope<()>,
        key: &str,
        value: Vec<u8>,
        expire: Expiry,
    ) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        entries.purge_expired(Utc::now());
        entries.insert(key, MemoryEntry { value: Bytes::from(value), expire });
        Ok(())
    }

    #[tracing::instrument(skip(self, scope, transform))]
    async fn update<F>(
        &self,
        scope: &Scope<()>,
        key: &str,
        expire: Expiry,
        mut transform: F,
    ) -> StoreResult<()>
    where
        F: FnMut(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send,
    {
        if let Some(err) = scope.context().err() {
            return Err(StoreError::cancelled("update", key, err));
        }

        let mut entries = self.entries.lock();
        let now = Utc::now();
        let old = entries.map.get(key).and_then(|entry| entry.live_value(now)).cloned();
        let new = transform(old.as_deref())?;

        if old.as_deref() == Some(new.as_slice()) {
            tracing::trace!("value unchanged, skipping write");
            return Ok(());
        }

        entries.purge_expired(now);
        entries.insert(key, MemoryEntry { value: Bytes::from(new), expire });
        Ok(())
    }

    #[tracing::instrument(skip(self, _scope))]
    async fn keys(&self, _scope: &Scope<()>) -> StoreResult<Vec<String>> {
        let now = Utc::now();
        let entries = self.entries.lock();
        Ok(entries
            .map
            .iter()
            .filter(|(_, entry)| entry.live_value(now).is_some())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn scoped() -> (MemoryStore, Scope<()>) {
        let store = MemoryStore::new();
        let scope = store.scope(Context::background()).await.unwrap();
        (store, scope)
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let (store, scope) = scoped().await;

        store.set(&scope, "key1", b"value1".to_vec(), Expiry::Never).await.unwrap();
        let value = store.get(&scope, "key1").await.unwrap();
        assert_eq!(value, Bytes::from("value1"));

        let err = store.get(&scope, "key2").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let (store, scope) = scoped().await;
        let past = Expiry::at(Utc::now() - chrono::Duration::seconds(1));
        store.set(&scope, "stale", b"v".to_vec(), past).await.unwrap();

        assert!(store.get(&scope, "stale").await.unwrap_err().is_not_found());
        assert!(store.keys(&scope).await.unwrap().is_empty());

        let mut seen = Vec::new();
        store
            .update(&scope, "stale", Expiry::Never, |old| {
                seen.push(old.map(<[u8]>::to_vec));
                Ok(b"fresh".to_vec())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![None]);
        assert_eq!(store.get(&scope, "stale").await.unwrap(), Bytes::from("fresh"));
    }

    #[tokio::test]
    async fn test_writes_purge_expired_entries() {
        let (store, scope) = scoped().await;
        let past = Expiry::at(Utc::now() - chrono::Duration::seconds(1));
        store.set(&scope, "a", b"1".to_vec(), past).await.unwrap();
        store.set(&scope, "b", b"2".to_vec(), Expiry::after(Duration::from_secs(60))).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.keys(&scope).await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_purge_skips_entries_whose_expiry_was_replaced() {
        let (store, scope) = scoped().await;
        store.set(&scope, "a", b"1".to_vec(), Expiry::after(Duration::from_millis(20))).await.unwrap();
        store.set(&scope, "a", b"2".to_vec(), Expiry::Never).await.unwrap();
        store.set(&scope, "b", b"3".to_vec(), Expiry::after(Duration::from_millis(20))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        store.set(&scope, "c", b"4".to_vec(), Expiry::Never).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&scope, "a").await.unwrap(), Bytes::from("2"));
        assert!(store.get(&scope, "b").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_purge_stops_at_first_live_entry() {
        let now = Utc::now();
        let mut entries = Entries::default();
        for (key, offset) in [("old", -10), ("older", -20), ("later", 10)] {
            let expire = Expiry::at(now + chrono::Duration::seconds(offset));
            entries.insert(key, MemoryEntry { value: Bytes::new(), expire });
        }
        entries.insert("forever", MemoryEntry { value: Bytes::new(), expire: Expiry::Never });

        entries.purge_expired(now);

        assert_eq!(entries.map.keys().collect::<Vec<_>>(), vec!["forever", "later"]);
        assert_eq!(entries.by_expiry.len(), 1);
    }

    #[tokio::test]
    async fn test_update_cancelled_context_skips_transform() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        ctx.cancel();
        let scope = store.scope(ctx).await.unwrap();

        let mut calls = 0;
        let err = store
            .update(&scope, "k", Expiry::Never, |_| {
                calls += 1;
                Ok(Vec::new())
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "cannot update key k: context canceled");
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let (store, scope) = scoped().await;
        let clone = store.clone();
        clone.set(&scope, "shared", b"x".to_vec(), Expiry::Never).await.unwrap();
        assert_eq!(store.get(&scope, "shared").await.unwrap(), Bytes::from("x"));
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_sorted() {
        let (store, scope) = scoped().await;
        for key in ["c", "a", "b"] {
            store.set(&scope, key, Vec::new(), Expiry::Never).await.unwrap();
        }
        assert_eq!(store.keys(&scope).await.unwrap(), vec!["a", "b", "c"]);
    }
}
