//! Connection pool for a SQLite database file.
//!
//! `rusqlite` is synchronous, so every statement runs on the blocking thread
//! pool via [`tokio::task::spawn_blocking`]. A [`PooledConnection`] is moved
//! into the blocking task and handed back with the result, which lets one
//! transaction span several blocking calls with async work (the caller's
//! transform) in between.
//!
//! Connections go back to the pool only through [`PooledConnection::release`],
//! and only outside a transaction. A connection dropped any other way (error
//! path, cancelled task, panic) is closed, and SQLite rolls back whatever
//! transaction it still had open.

use std::{path::PathBuf, sync::Arc, time::Duration};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, SqlStoreError};

struct PoolInner {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
}

/// A bounded set of connections to one SQLite database file.
///
/// Cheaply cloneable; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool of at most `max_connections` connections to `path`.
    ///
    /// Opens one connection eagerly so a bad path fails here rather than on
    /// first use, and switches the database to WAL journaling.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn open(
        path: impl Into<PathBuf>,
        max_connections: usize,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let inner = Arc::new(PoolInner {
            path: path.into(),
            busy_timeout,
            idle: Mutex::new(Vec::with_capacity(max_connections)),
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        });
        let pool = Self { inner };
        let conn = pool.acquire().await?;
        let (conn, mode) = conn
            .run(|c| c.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0)))
            .await?;
        let mode = mode?;
        tracing::debug!(path = %pool.inner.path.display(), journal_mode = %mode, "opened sqlite pool");
        conn.release();
        Ok(pool)
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.inner.path
    }

    /// Number of idle connections currently held.
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Waits for a free slot and returns a connection.
    pub(crate) async fn acquire(&self) -> Result<PooledConnection> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| crate::error::sqlite_failure(rusqlite::ffi::SQLITE_MISUSE, "pool closed"))?;

        let idle = self.inner.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let path = self.inner.path.clone();
                let busy_timeout = self.inner.busy_timeout;
                tokio::task::spawn_blocking(move || open_connection(&path, busy_timeout)).await??
            },
        };
        Ok(PooledConnection { conn, pool: Arc::clone(&self.inner), _permit: permit })
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.inner.path)
            .field("idle", &self.idle_connections())
            .finish()
    }
}

fn open_connection(path: &std::path::Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// A connection checked out of a [`ConnectionPool`].
pub(crate) struct PooledConnection {
    conn: Connection,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Runs `f` against the connection on the blocking thread pool.
    ///
    /// The connection comes back alongside `f`'s result so the caller can
    /// continue, roll back, or release it.
    pub(crate) async fn run<T, F>(self, f: F) -> Result<(Self, rusqlite::Result<T>)>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let result = f(&self.conn);
            (self, result)
        })
        .await
        .map_err(SqlStoreError::from)
    }

    /// Returns `true` if no transaction is open on the connection.
    pub(crate) fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// Returns the connection to the pool, or closes it if a transaction is
    /// still open.
    pub(crate) fn release(self) {
        if self.conn.is_autocommit() {
            self.pool.idle.lock().push(self.conn);
        } else {
            tracing::warn!("closing connection released inside a transaction");
        }
    }
}
