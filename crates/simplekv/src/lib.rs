//! Minimal key-value store abstraction with an atomic update primitive.
//!
//! This crate provides the [`Store`] trait, the error taxonomy every backend
//! maps onto, and the pieces backends share: the expiry model, the
//! [`Context`]/[`Scope`] pair, and the [`RetryPolicy`] backoff driver.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Callers                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                simplekv::Store trait                        │
//! │        (scope, get, set, update, keys) + set_key_once       │
//! ├──────────────┬──────────────┬───────────────┬───────────────┤
//! │ MemoryStore  │  SqlStore    │  MongoStore   │  EtcdStore    │
//! │ (one mutex)  │ (write lock  │ (conditional  │ (revision     │
//! │              │  + insert    │  update +     │  fenced txn + │
//! │              │  race retry) │  backoff)     │  backoff)     │
//! └──────────────┴──────────────┴───────────────┴───────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use simplekv::{Context, Expiry, MemoryStore, Store, StoreError, set_key_once};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StoreError> {
//!     let store = MemoryStore::new();
//!     let scope = store.scope(Context::background()).await?;
//!
//!     store.set(&scope, "user:123", b"Alice".to_vec(), Expiry::Never).await?;
//!     assert_eq!(store.get(&scope, "user:123").await?.as_ref(), b"Alice");
//!
//!     // Atomic read-modify-write
//!     store
//!         .update(&scope, "user:123", Expiry::Never, |old| {
//!             let mut name = old.unwrap_or_default().to_vec();
//!             name.extend_from_slice(b" Smith");
//!             Ok(name)
//!         })
//!         .await?;
//!
//!     // Write-if-absent
//!     let err = set_key_once(&store, &scope, "user:123", b"Bob".to_vec(), Expiry::Never)
//!         .await
//!         .unwrap_err();
//!     assert!(err.is_duplicate_key());
//!
//!     scope.close();
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Crate | Concurrency mechanism |
//! |---------|-------|-----------------------|
//! | [`MemoryStore`] | `simplekv` | Process-wide mutex held for the whole update |
//! | `SqlStore` | `simplekv-sql` | Transaction write lock; unique-violation retry on insert |
//! | `MongoStore` | `simplekv-mongo` | Conditional update on the remembered value, with backoff |
//! | `EtcdStore` | `simplekv-etcd` | Revision-fenced transaction, with backoff |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the [`conformance`] suite and the `testutil` module (key/value
//!   generators, assertion macros). Enable it in `[dev-dependencies]` of backend crates.
//! - **`failpoints`**: Activates `fail` injection points (`retry-before-sleep`).

#![deny(unsafe_code)]

pub mod codec;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod context;
pub mod error;
pub mod memory;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use codec::{Expiry, normalize_value};
pub use context::{Context, ContextError, Scope};
pub use error::{BoxError, ConfigError, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use retry::{Attempts, RetryPolicy, RetryStop};
pub use store::{Store, set_key_once};
