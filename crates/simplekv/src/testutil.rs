//! Shared test utilities for store testing.
//!
//! Key and value generators, a pre-populated [`MemoryStore`] factory, and
//! assertion macros over [`StoreResult`](crate::StoreResult) values. Feature-gated
//! behind `testutil` so it never leaks into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! simplekv = { path = "../simplekv", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use simplekv::testutil::{make_key, populated_store};
//! ```

use crate::{Context, Expiry, MemoryStore, Scope, Store};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"`. The zero-padding keeps lexicographic
/// order equal to numeric order, which `keys` tests rely on.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> String {
    format!("{prefix}:{idx:06}")
}

/// Create a test value of the given size filled with `0xAB` bytes.
#[must_use]
pub fn make_value(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

/// Acquire a scope with a background context.
///
/// # Panics
///
/// Panics if the store cannot open a session.
pub async fn background_scope<S: Store>(store: &S) -> Scope<S::Session> {
    store.scope(Context::background()).await.expect("scope should be acquired")
}

/// Create a [`MemoryStore`] pre-populated with `count` keys.
///
/// Keys are formatted by [`make_key`] with values of `value_size` bytes.
///
/// # Panics
///
/// Panics if any `set` fails (should not happen with `MemoryStore`).
pub async fn populated_store(prefix: &str, count: usize, value_size: usize) -> MemoryStore {
    let store = MemoryStore::new();
    let scope = background_scope(&store).await;
    let value = make_value(value_size);
    for i in 0..count {
        store
            .set(&scope, &make_key(prefix, i), value.clone(), Expiry::Never)
            .await
            .expect("populate set failed");
    }
    store
}

/// Assert that a [`StoreResult`](crate::StoreResult) is a [`StoreError::NotFound`](crate::StoreError::NotFound).
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use simplekv::{StoreError, StoreResult, assert_not_found};
///
/// let result: StoreResult<()> = Err(StoreError::not_found("missing"));
/// assert_not_found!(result);
/// ```
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err(err) if err.is_not_found()),
            "expected StoreError::NotFound, got: {:?}",
            result,
        );
    }};
    ($result:expr, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err(err) if err.is_not_found()),
            "{}: expected StoreError::NotFound, got: {:?}",
            $msg,
            result,
        );
    }};
}

/// Assert that a [`StoreResult`](crate::StoreResult) is a [`StoreError::DuplicateKey`](crate::StoreError::DuplicateKey).
#[macro_export]
macro_rules! assert_duplicate_key {
    ($result:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err(err) if err.is_duplicate_key()),
            "expected StoreError::DuplicateKey, got: {:?}",
            result,
        );
    }};
    ($result:expr, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err(err) if err.is_duplicate_key()),
            "{}: expected StoreError::DuplicateKey, got: {:?}",
            $msg,
            result,
        );
    }};
}

/// Assert that a [`StoreResult`](crate::StoreResult) is a [`StoreError::Cancelled`](crate::StoreError::Cancelled).
#[macro_export]
macro_rules! assert_cancelled {
    ($result:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err(err) if err.is_cancelled()),
            "expected StoreError::Cancelled, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`StoreResult`](crate::StoreResult) is `Ok`.
#[macro_export]
macro_rules! assert_store_ok {
    ($result:expr) => {{
        let result = &$result;
        assert!(result.is_ok(), "expected Ok, got: {:?}", result);
    }};
    ($result:expr, $msg:expr) => {{
        let result = &$result;
        assert!(result.is_ok(), "{}: expected Ok, got: {:?}", $msg, result);
    }};
}
