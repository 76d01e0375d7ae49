//! SQLite-backed [`simplekv`] store.
//!
//! Entries live in a single table keyed by `key`, with the value as a `BLOB`
//! and the expiry as Unix milliseconds. Updates take the database write lock
//! (`BEGIN IMMEDIATE`) around the read-transform-write cycle; only the race
//! between two inserts of the same absent key is resolved by retrying.
//!
//! # Example
//!
//! ```no_run
//! use simplekv::{Context, Expiry, Store, set_key_once};
//! use simplekv_sql::{SqlStore, SqlStoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SqlStoreConfig::builder().path("kv.db").table("sessions").build()?;
//! let store = SqlStore::open(&config).await?;
//! let scope = store.scope(Context::background()).await?;
//!
//! set_key_once(&store, &scope, "session:1", b"token".to_vec(), Expiry::Never).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: [`testutil::TestDatabase`], a store on a temporary file.
//! - **`failpoints`**: Activates `sql-before-commit` and `sql-before-rollback`.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod pool;
pub mod schema;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use config::SqlStoreConfig;
pub use error::{Result, SqlStoreError};
pub use pool::ConnectionPool;
pub use store::SqlStore;
