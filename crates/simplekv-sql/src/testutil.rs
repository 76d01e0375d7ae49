//! Test fixtures for the SQL store.
//!
//! [`TestDatabase`] opens a [`SqlStore`] on a fresh database file inside a
//! temporary directory that is removed when the fixture is dropped.

use std::{path::PathBuf, sync::Arc, time::Duration};

use simplekv::RetryPolicy;
use tempfile::TempDir;

use crate::{SqlStore, SqlStoreConfig};

/// A [`SqlStore`] on a throwaway database file.
pub struct TestDatabase {
    _dir: TempDir,
    path: PathBuf,
    store: Arc<SqlStore>,
}

impl TestDatabase {
    /// Opens a store with the default table and a fast retry policy.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory or the database cannot be created.
    pub async fn new() -> Self {
        Self::with_table("simplekv").await
    }

    /// Opens a store over `table`.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory or the database cannot be created.
    pub async fn with_table(table: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("simplekv.db");
        let config = SqlStoreConfig::builder()
            .path(path.clone())
            .table(table)
            .max_connections(8)
            .retry(fast_retry())
            .build()
            .expect("valid config");
        let store = SqlStore::open(&config).await.expect("open test database");
        Self { _dir: dir, path, store: Arc::new(store) }
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &SqlStore {
        &self.store
    }

    /// Returns a shared handle for tests that spawn tasks.
    #[must_use]
    pub fn shared(&self) -> Arc<SqlStore> {
        Arc::clone(&self.store)
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Retry policy with millisecond-scale backoff.
///
/// # Panics
///
/// Never; the values are valid.
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .initial_delay(Duration::from_micros(50))
        .max_delay(Duration::from_millis(5))
        .build()
        .expect("valid retry policy")
}
