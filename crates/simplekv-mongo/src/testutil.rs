//! In-process [`DocumentCollection`] for tests.
//!
//! [`MemoryCollection`] follows the server's single-document semantics:
//! inserts fail on an existing `_id`, conditional updates match on the stored
//! value, and expired documents stay until something removes them. Every call
//! yields to the scheduler first so concurrent updates interleave.
//!
//! Two hooks drive the retry paths deterministically:
//! - [`MemoryCollection::interfere_with`] rewrites a key just before the next
//!   conditional update, so that update fails to match
//! - [`MemoryCollection::fail_next`] makes the next calls fail as unavailable

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use simplekv::RetryPolicy;

use crate::{
    MongoStore,
    collection::{DocumentCollection, StoredDocument},
    error::{DocResult, DocumentError},
};

/// Retry policy with millisecond-scale backoff.
///
/// # Panics
///
/// Never; the values are valid.
#[must_use]
#[allow(clippy::expect_used)]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .initial_delay(Duration::from_micros(50))
        .max_delay(Duration::from_millis(5))
        .build()
        .expect("valid retry policy")
}

/// A [`MongoStore`] over a fresh [`MemoryCollection`] with [`fast_retry`].
///
/// # Panics
///
/// Panics if the collection rejects the index, which it never does unless
/// failures were injected.
#[allow(clippy::expect_used)]
pub async fn memory_store() -> MongoStore<MemoryCollection> {
    MongoStore::new(MemoryCollection::new())
        .await
        .expect("memory collection accepts the index")
        .with_retry_policy(fast_retry())
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, StoredDocument>,
    interference: VecDeque<StoredDocument>,
    failures: u32,
}

/// Thread-safe in-memory document collection.
///
/// Cheaply cloneable; clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    inner: Arc<Mutex<Inner>>,
    writes: Arc<AtomicU64>,
    sessions: Arc<AtomicU64>,
}

impl MemoryCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `doc` to be written just before the next conditional update.
    pub fn interfere_with(&self, doc: StoredDocument) {
        self.inner.lock().interference.push_back(doc);
    }

    /// Makes the next `count` calls fail with [`DocumentError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.inner.lock().failures = count;
    }

    /// Stores `doc` directly, bypassing the store.
    pub fn put(&self, doc: StoredDocument) {
        self.inner.lock().docs.insert(doc.key.clone(), doc);
    }

    /// Returns the stored document for `key`, expired or not.
    #[must_use]
    pub fn document(&self, key: &str) -> Option<StoredDocument> {
        self.inner.lock().docs.get(key).cloned()
    }

    /// Number of successful writes.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of sessions started.
    #[must_use]
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    async fn enter(&self) -> DocResult<()> {
        tokio::task::yield_now().await;
        let mut inner = self.inner.lock();
        if inner.failures > 0 {
            inner.failures -= 1;
            return Err(DocumentError::Unavailable { message: "injected failure".to_owned() });
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    type Session = ();

    async fn start_session(&self) -> DocResult<()> {
        self.enter().await?;
        self.sessions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn ensure_expiry_index(&self) -> DocResult<()> {
        self.enter().await
    }

    async fn find(&self, _session: &mut (), key: &str) -> DocResult<Option<StoredDocument>> {
        self.enter().await?;
        Ok(self.inner.lock().docs.get(key).cloned())
    }

    async fn insert(&self, _session: &mut (), doc: &StoredDocument) -> DocResult<()> {
        self.enter().await?;
        let mut inner = self.inner.lock();
        if inner.docs.contains_key(&doc.key) {
            return Err(DocumentError::DuplicateKey { key: doc.key.clone() });
        }
        inner.docs.insert(doc.key.clone(), doc.clone());
        self.record_write();
        Ok(())
    }

    async fn update_if_value(
        &self,
        _session: &mut (),
        expected: &[u8],
        doc: &StoredDocument,
    ) -> DocResult<bool> {
        self.enter().await?;
        let mut inner = self.inner.lock();
        if let Some(interloper) = inner.interference.pop_front() {
            inner.docs.insert(interloper.key.clone(), interloper);
        }
        match inner.docs.get_mut(&doc.key) {
            Some(stored) if stored.value == expected => {
                stored.value.clone_from(&doc.value);
                stored.expire = doc.expire;
                self.record_write();
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn upsert(&self, _session: &mut (), doc: &StoredDocument) -> DocResult<()> {
        self.enter().await?;
        self.inner.lock().docs.insert(doc.key.clone(), doc.clone());
        self.record_write();
        Ok(())
    }

    async fn keys(
        &self,
        _session: &mut (),
        now: chrono::DateTime<chrono::Utc>,
    ) -> DocResult<Vec<String>> {
        self.enter().await?;
        Ok(self
            .inner
            .lock()
            .docs
            .values()
            .filter(|doc| !doc.expire.has_passed(now))
            .map(|doc| doc.key.clone())
            .collect())
    }
}
