//! etcd v3 [`simplekv`] adapter.
//!
//! Talks to etcd through its JSON gateway (`/v3/kv/*`, `/v3/lease/*`), so no
//! gRPC toolchain is needed. Updates read the key with its `mod_revision`,
//! run the transform, and write inside a transaction guarded by that
//! revision; a failed guard means another writer got there first and the
//! cycle is retried under the configured backoff.
//!
//! Expiry maps to leases: a value written with [`simplekv::Expiry::At`] is
//! attached to a lease whose TTL is the remaining time rounded up to whole
//! seconds, and etcd deletes it when the lease lapses.
//!
//! Keys are stored under [`EtcdConfig::prefix`], and `keys` lists only that
//! prefix, with the prefix stripped.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod wire;

pub use client::EtcdClient;
pub use config::EtcdConfig;
pub use error::{EtcdError, Result};
pub use store::EtcdStore;
