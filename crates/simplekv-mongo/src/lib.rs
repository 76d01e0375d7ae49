//! Document-store [`simplekv`] adapter.
//!
//! Each entry is one document keyed by `_id`. Updates are optimistic: read
//! the document, transform its value, then write conditionally on the value
//! read. Losing a race costs one more cycle under an exponential backoff
//! (1µs doubling to 500ms, jittered, by default).
//!
//! Storage is reached through the [`DocumentCollection`] trait.
//! [`MongoCollection`] implements it on the official MongoDB driver; with the
//! `testutil` feature, `testutil::MemoryCollection` implements it in process.
//!
//! A scope holds a causally consistent session, so reads through the same
//! scope observe its earlier writes.

#![deny(unsafe_code)]

pub mod collection;
pub mod error;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use collection::{DocumentCollection, MongoCollection, StoredDocument};
pub use error::{DocResult, DocumentError};
pub use store::MongoStore;
