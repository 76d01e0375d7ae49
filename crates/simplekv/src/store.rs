//! Store trait definition.
//!
//! [`Store`] is the single contract every backend implements. It is
//! deliberately small:
//! - **Keys are strings, values are bytes**: no serialization format is assumed
//! - **Async by default**: every operation suspends the caller until it completes
//! - **One atomic primitive**: [`Store::update`] is a value-level compare-and-swap loop
//!
//! Helpers such as [`set_key_once`] are built only from the trait, so they
//! work against any backend.
//!
//! # Implementing a Backend
//!
//! 1. Pick the session type your engine needs for read-your-writes (or `()`)
//! 2. Implement [`Store`], checking the scope's context before each update cycle
//! 3. Map engine errors to [`StoreError`], classifying contention as
//!    [`StoreError::Conflict`] and everything else as fatal
//! 4. Run the [`conformance`](crate::conformance) suite against it
//!
//! See [`MemoryStore`](crate::MemoryStore) for the reference implementation.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    codec::Expiry,
    context::{Context, Scope},
    error::{StoreError, StoreResult},
};

/// Abstract key-value store with an atomic read-modify-write primitive.
///
/// Implementations are `Send + Sync` and safe for concurrent use from any
/// number of tasks.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`scope`](Store::scope) | Acquire a scoped session for a context |
/// | [`get`](Store::get) | Read the live value of a key |
/// | [`set`](Store::set) | Unconditionally write a key |
/// | [`update`](Store::update) | Atomically transform the value of a key |
/// | [`keys`](Store::keys) | List live keys |
///
/// # Example
///
/// ```
/// use simplekv::{Context, Expiry, MemoryStore, Store};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let scope = store.scope(Context::background()).await.unwrap();
///
/// store
///     .update(&scope, "visits", Expiry::Never, |old| {
///         let count = old.and_then(|v| v.first().copied()).unwrap_or(0);
///         Ok(vec![count + 1])
///     })
///     .await
///     .unwrap();
/// assert_eq!(store.get(&scope, "visits").await.unwrap().as_ref(), &[1]);
/// # });
/// ```
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend state pinned for the lifetime of a [`Scope`].
    type Session: Send + Sync + 'static;

    /// Acquires a scoped session for `ctx`.
    ///
    /// Calls made through the same scope observe each other's writes. The
    /// session is released when the scope is closed or dropped.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn scope(&self, ctx: Context) -> StoreResult<Scope<Self::Session>>;

    /// Returns the live value stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no entry exists or it has expired.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn get(&self, scope: &Scope<Self::Session>, key: &str) -> StoreResult<Bytes>;

    /// Writes `value` at `key`, replacing any existing entry and its expiry.
    ///
    /// An empty value is stored as empty bytes, never as "no entry".
    #[must_use = "store operations may fail and errors must be handled"]
    async fn set(
        &self,
        scope: &Scope<Self::Session>,
        key: &str,
        value: Vec<u8>,
        expire: Expiry,
    ) -> StoreResult<()>;

    /// Atomically replaces the value at `key` with `transform(old)`.
    ///
    /// `transform` receives `None` if the key has no live entry, and the
    /// stored bytes otherwise (empty bytes for an empty value). The write only
    /// lands if the entry is unchanged since it was read; on contention the
    /// backend re-reads and calls `transform` again. `transform` must
    /// therefore be free of side effects: it may run any number of times.
    ///
    /// If the new value equals the old value byte for byte, the backend may
    /// skip the write.
    ///
    /// # Errors
    ///
    /// - Whatever `transform` returns, unchanged and without retrying
    /// - [`StoreError::Cancelled`] if the scope's context finishes first
    /// - [`StoreError::RetriesExhausted`] if contention outlasts the retry budget
    /// - Engine errors, which are never retried
    #[must_use = "store operations may fail and errors must be handled"]
    async fn update<F>(
        &self,
        scope: &Scope<Self::Session>,
        key: &str,
        expire: Expiry,
        transform: F,
    ) -> StoreResult<()>
    where
        F: FnMut(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send;

    /// Lists the keys of live entries in lexicographic order.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn keys(&self, scope: &Scope<Self::Session>) -> StoreResult<Vec<String>>;
}

/// Writes `value` at `key` only if no live entry exists.
///
/// Built on [`Store::update`], so it is atomic on every backend.
///
/// # Errors
///
/// Returns [`StoreError::DuplicateKey`] if the key already holds a value.
#[tracing::instrument(skip(store, scope, value), fields(value_len = value.len()))]
pub async fn set_key_once<S: Store>(
    store: &S,
    scope: &Scope<S::Session>,
    key: &str,
    value: Vec<u8>,
    expire: Expiry,
) -> StoreResult<()> {
    store
        .update(scope, key, expire, |old| match old {
            Some(_) => Err(StoreError::duplicate_key(key)),
            None => Ok(value.clone()),
        })
        .await
}
