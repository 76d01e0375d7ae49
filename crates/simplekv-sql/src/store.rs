//! [`Store`] implementation over a SQLite table.
//!
//! # Update cycle
//!
//! ```text
//! BEGIN IMMEDIATE ── SELECT value, expire ──┬── row ──── transform ── UPDATE ── COMMIT
//!                                           │
//!                                           └── none ─── ROLLBACK ── transform ── INSERT
//!                                                                                  │
//!                                       unique violation: another writer won ──────┘ retry
//! ```
//!
//! `BEGIN IMMEDIATE` takes the database write lock before the read, so an
//! existing row cannot change between the read and the write. An absent row
//! cannot be locked; the insert relies on the primary key instead and the
//! loser of an insert race goes round again under the [`RetryPolicy`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use fail::fail_point;
use rusqlite::{Connection, OptionalExtension, params};
use simplekv::{Context, Expiry, RetryPolicy, Scope, Store, StoreError, StoreResult};

use crate::{
    config::SqlStoreConfig,
    error::{Result, SqlStoreError, sqlite_failure},
    pool::{ConnectionPool, PooledConnection},
    schema::{Queries, validate_table_name},
};

/// Key reported by operations that are not about a single key.
const ALL_KEYS: &str = "*";

/// SQLite-backed [`Store`].
///
/// Cheaply cloneable; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use simplekv::{Context, Expiry, Store};
/// use simplekv_sql::{SqlStore, SqlStoreConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SqlStoreConfig::builder().path("/var/lib/app/kv.db").build()?;
/// let store = SqlStore::open(&config).await?;
/// let scope = store.scope(Context::background()).await?;
/// store.set(&scope, "greeting", b"hello".to_vec(), Expiry::Never).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: ConnectionPool,
    queries: Arc<Queries>,
    retry: RetryPolicy,
}

impl SqlStore {
    /// Creates a store over `table` in the pool's database, creating the
    /// table, its expiry index, and its expiry trigger if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if `table` is not a plain identifier or the schema
    /// cannot be created.
    pub async fn new(pool: ConnectionPool, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let queries = Arc::new(Queries::new(table));

        let init = Arc::clone(&queries);
        let (conn, created) = pool.acquire().await?.run(move |c| c.execute_batch(&init.init)).await?;
        created?;
        conn.release();

        tracing::debug!(path = %pool.path().display(), table, "sql store ready");
        Ok(Self { pool, queries, retry: RetryPolicy::default() })
    }

    /// Opens the database described by `config` and creates the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn open(config: &SqlStoreConfig) -> Result<Self> {
        config.validate()?;
        let pool =
            ConnectionPool::open(config.path(), config.max_connections(), config.busy_timeout())
                .await?;
        Ok(Self::new(pool, config.table()).await?.with_retry_policy(config.retry().clone()))
    }

    /// Replaces the backoff used for insert races.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the connection pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn acquire(
        &self,
        ctx: &Context,
        operation: &'static str,
        key: &str,
    ) -> StoreResult<PooledConnection> {
        ctx.run(self.pool.acquire())
            .await
            .map_err(|err| StoreError::cancelled(operation, key, err))?
            .map_err(|err| err.into_store_error(operation, key))
    }

    /// Runs a single statement outside any transaction.
    async fn call<T, F>(
        &self,
        ctx: &Context,
        operation: &'static str,
        key: &str,
        f: F,
    ) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.acquire(ctx, operation, key).await?;
        let (conn, result) = step(ctx, conn, operation, key, f).await?;
        conn.release();
        result.map_err(|err| SqlStoreError::from(err).into_store_error(operation, key))
    }

    /// Runs one update cycle. Returns `Ok(false)` if another writer got in
    /// first and the cycle should be retried.
    async fn update_once<F>(
        &self,
        ctx: &Context,
        key: &str,
        expire: &Expiry,
        transform: &mut F,
    ) -> StoreResult<bool>
    where
        F: FnMut(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send,
    {
        let conn = self.acquire(ctx, "update", key).await?;
        let queries = Arc::clone(&self.queries);
        let owned_key = key.to_owned();
        let (conn, row) = step(ctx, conn, "update", key, move |c| {
            c.execute_batch("BEGIN IMMEDIATE")?;
            c.query_row(&queries.select_locked, [&owned_key], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<i64>>(1)?))
            })
            .optional()
        })
        .await?;
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                return Err(abort(conn, SqlStoreError::from(err).into_store_error("update", key))
                    .await);
            },
        };

        let Some((stored, stored_expire)) = row else {
            return self.insert_absent(ctx, conn, key, expire, transform).await;
        };

        let old = (!Expiry::from_unix_millis(stored_expire).has_passed(Utc::now())).then_some(stored);
        let new = match transform(old.as_deref()) {
            Ok(new) => new,
            Err(err) => return Err(abort(conn, err).await),
        };
        if old.as_deref() == Some(new.as_slice()) {
            tracing::trace!("value unchanged, skipping write");
            rollback(conn).await.map_err(|err| err.into_store_error("update", key))?;
            return Ok(true);
        }

        let queries = Arc::clone(&self.queries);
        let owned_key = key.to_owned();
        let expire_ms = expire.unix_millis();
        let (conn, written) = step(ctx, conn, "update", key, move |c| {
            if c.execute(&queries.update, params![owned_key, new, expire_ms])? == 0 {
                return Ok(false);
            }
            fail_point!("sql-before-commit", |_| {
                Err(sqlite_failure(rusqlite::ffi::SQLITE_IOERR, "injected commit failure"))
            });
            c.execute_batch("COMMIT")?;
            Ok(true)
        })
        .await?;

        match written {
            Ok(true) => {
                conn.release();
                Ok(true)
            },
            Ok(false) => {
                rollback(conn).await.map_err(|err| err.into_store_error("update", key))?;
                Ok(false)
            },
            Err(err) => Err(abort(conn, SqlStoreError::from(err).into_store_error("update", key)).await),
        }
    }

    /// Releases the write lock, then inserts `transform(None)` relying on
    /// the primary key to detect a concurrent insert.
    async fn insert_absent<F>(
        &self,
        ctx: &Context,
        conn: PooledConnection,
        key: &str,
        expire: &Expiry,
        transform: &mut F,
    ) -> StoreResult<bool>
    where
        F: FnMut(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send,
    {
        rollback(conn).await.map_err(|err| err.into_store_error("update", key))?;
        let new = transform(None)?;

        let queries = Arc::clone(&self.queries);
        let owned_key = key.to_owned();
        let expire_ms = expire.unix_millis();
        let inserted = self
            .call(ctx, "update", key, move |c| {
                c.execute(&queries.insert, params![owned_key, new, expire_ms]).map(|_| ())
            })
            .await;
        match inserted {
            Ok(()) => Ok(true),
            Err(err) if err.is_conflict() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Runs one blocking step on `conn`, bounded by `ctx`.
///
/// If `ctx` finishes first the step keeps running on the blocking pool and
/// the connection is closed when it completes, rolling back any open
/// transaction.
async fn step<T, F>(
    ctx: &Context,
    conn: PooledConnection,
    operation: &'static str,
    key: &str,
    f: F,
) -> StoreResult<(PooledConnection, rusqlite::Result<T>)>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    ctx.run(conn.run(f))
        .await
        .map_err(|err| StoreError::cancelled(operation, key, err))?
        .map_err(|err| err.into_store_error(operation, key))
}

/// Rolls back any open transaction and returns the connection to the pool.
async fn rollback(conn: PooledConnection) -> Result<()> {
    if conn.is_autocommit() {
        conn.release();
        return Ok(());
    }
    let (conn, result) = conn
        .run(|c| {
            fail_point!("sql-before-rollback", |_| {
                Err(sqlite_failure(rusqlite::ffi::SQLITE_IOERR, "injected rollback failure"))
            });
            c.execute_batch("ROLLBACK")
        })
        .await?;
    result?;
    conn.release();
    Ok(())
}

/// Rolls back after `err`, attaching the rollback failure if there is one.
async fn abort(conn: PooledConnection, err: StoreError) -> StoreError {
    match rollback(conn).await {
        Ok(()) => err,
        Err(rollback_err) => {
            tracing::warn!(error = %rollback_err, "rollback failed");
            err.with_rollback_failure(rollback_err)
        },
    }
}

#[async_trait]
impl Store for SqlStore {
    type Session = ();

    #[tracing::instrument(skip(self, ctx))]
    async fn scope(&self, ctx: Context) -> StoreResult<Scope<()>> {
        Ok(Scope::new(ctx, ()))
    }

    #[tracing::instrument(skip(self, scope))]
    async fn get(&self, scope: &Scope<()>, key: &str) -> StoreResult<Bytes> {
        let queries = Arc::clone(&self.queries);
        let owned_key = key.to_owned();
        let now = Utc::now().timestamp_millis();
        let value = self
            .call(scope.context(), "get", key, move |c| {
                c.query_row(&queries.get, params![owned_key, now], |row| row.get::<_, Vec<u8>>(0))
                    .optional()
            })
            .await?;
        value.map(Bytes::from).ok_or_else(|| StoreError::not_found(key))
    }

    #[tracing::instrument(skip(self, scope, value), fields(value_len = value.len()))]
    async fn set(
        &self,
        scope: &Scope<()>,
        key: &str,
        value: Vec<u8>,
        expire: Expiry,
    ) -> StoreResult<()> {
        let queries = Arc::clone(&self.queries);
        let owned_key = key.to_owned();
        let expire_ms = expire.unix_millis();
        self.call(scope.context(), "set", key, move |c| {
            c.execute(&queries.upsert, params![owned_key, value, expire_ms]).map(|_| ())
        })
        .await
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
        let ctx = scope.context();
        let mut attempts = self.retry.start(ctx);
        loop {
            attempts.next().await.map_err(|stop| stop.into_update_error(key))?;
            if self.update_once(ctx, key, &expire, &mut transform).await? {
                return Ok(());
            }
            tracing::debug!(attempt = attempts.attempt(), "key inserted concurrently");
        }
    }

    #[tracing::instrument(skip(self, scope))]
    async fn keys(&self, scope: &Scope<()>) -> StoreResult<Vec<String>> {
        let queries = Arc::clone(&self.queries);
        let now = Utc::now().timestamp_millis();
        self.call(scope.context(), "list", ALL_KEYS, move |c| {
            let mut stmt = c.prepare_cached(&queries.keys)?;
            let keys = stmt
                .query_map([now], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>();
            keys
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use simplekv::{Expiry, Store, StoreError, testutil::background_scope};

    use crate::testutil::TestDatabase;

    #[tokio::test]
    async fn test_set_get() {
        let db = TestDatabase::new().await;
        let store = db.store();
        let scope = background_scope(store).await;

        store.set(&scope, "a", b"1".to_vec(), Expiry::Never).await.unwrap();
        assert_eq!(store.get(&scope, "a").await.unwrap().as_ref(), b"1");
        let err = store.get(&scope, "b").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_releases_connections() {
        let db = TestDatabase::new().await;
        let store = db.store();
        let scope = background_scope(store).await;

        for _ in 0..3 {
            store.update(&scope, "n", Expiry::Never, |old| {
                let n = old.map_or(0, |v| v[0]);
                Ok(vec![n + 1])
            })
            .await
            .unwrap();
        }
        assert_eq!(store.get(&scope, "n").await.unwrap().as_ref(), &[3]);
        assert!(store.pool().idle_connections() >= 1);
    }
}
