//! [`Store`] implementation over a [`DocumentCollection`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use simplekv::{Context, Expiry, RetryPolicy, Scope, Store, StoreError, StoreResult};
use tokio::sync::Mutex;

use crate::{
    collection::{DocumentCollection, StoredDocument},
    error::{DocResult, DocumentError},
};

/// Key reported by operations that are not about a single key.
const ALL_KEYS: &str = "*";

/// Outcome of one write attempt.
enum Attempt {
    Written,
    Contended,
}

/// Document-store [`Store`] using optimistic conditional updates.
///
/// `update` reads the document, runs the transform, and writes only if the
/// stored value is still the one it read (or, for an absent key, only if no
/// document has appeared). A lost race is retried under the [`RetryPolicy`].
///
/// # Example
///
/// ```no_run
/// use simplekv::{Context, Expiry, Store};
/// use simplekv_mongo::{MongoCollection, MongoStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let collection = MongoCollection::connect("mongodb://localhost:27017", "app", "kv").await?;
/// let store = MongoStore::new(collection).await?;
/// let scope = store.scope(Context::background()).await?;
/// store.set(&scope, "greeting", b"hello".to_vec(), Expiry::Never).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MongoStore<C> {
    collection: C,
    retry: RetryPolicy,
}

impl<C: DocumentCollection> MongoStore<C> {
    /// Creates a store over `collection`, ensuring its TTL index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be created.
    pub async fn new(collection: C) -> DocResult<Self> {
        collection.ensure_expiry_index().await?;
        Ok(Self { collection, retry: RetryPolicy::default() })
    }

    /// Replaces the update backoff.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the underlying collection.
    #[must_use]
    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Runs one READ → TRANSFORM → WRITE-ATTEMPT cycle.
    async fn attempt<F>(
        &self,
        scope: &Scope<Mutex<C::Session>>,
        key: &str,
        expire: &Expiry,
        transform: &mut F,
    ) -> StoreResult<Attempt>
    where
        F: FnMut(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send,
    {
        let ctx = scope.context();
        let mut session = scope.session().lock().await;
        let found = run(ctx, "update", key, self.collection.find(&mut session, key)).await?;

        let Some(stored) = found else {
            let doc = StoredDocument::new(key, transform(None)?, *expire);
            return match run(ctx, "update", key, self.collection.insert(&mut session, &doc)).await {
                Ok(()) => Ok(Attempt::Written),
                Err(err) if err.is_conflict() => Ok(Attempt::Contended),
                Err(err) => Err(err),
            };
        };

        // An expired document still occupies the `_id` until the TTL monitor
        // removes it, so it is replaced conditionally like a live one.
        let live = !stored.expire.has_passed(Utc::now());
        let old = live.then_some(stored.value.as_slice());
        let new = transform(old)?;
        if old == Some(new.as_slice()) {
            tracing::trace!("value unchanged, skipping write");
            return Ok(Attempt::Written);
        }

        let doc = StoredDocument::new(key, new, *expire);
        let matched = run(
            ctx,
            "update",
            key,
            self.collection.update_if_value(&mut session, &stored.value, &doc),
        )
        .await?;
        Ok(if matched { Attempt::Written } else { Attempt::Contended })
    }
}

/// Awaits a collection call bounded by `ctx`.
async fn run<T>(
    ctx: &Context,
    operation: &'static str,
    key: &str,
    fut: impl Future<Output = DocResult<T>>,
) -> StoreResult<T> {
    ctx.run(fut)
        .await
        .map_err(|err| StoreError::cancelled(operation, key, err))?
        .map_err(|err: DocumentError| err.into_store_error(operation, key))
}

#[async_trait]
impl<C: DocumentCollection> Store for MongoStore<C> {
    type Session = Mutex<C::Session>;

    #[tracing::instrument(skip(self, ctx))]
    async fn scope(&self, ctx: Context) -> StoreResult<Scope<Self::Session>> {
        let session = self
            .collection
            .start_session()
            .await
            .map_err(|err| err.into_store_error("scope", ALL_KEYS))?;
        Ok(Scope::new(ctx, Mutex::new(session)))
    }

    #[tracing::instrument(skip(self, scope))]
    async fn get(&self, scope: &Scope<Self::Session>, key: &str) -> StoreResult<Bytes> {
        let mut session = scope.session().lock().await;
        let found = run(scope.context(), "get", key, self.collection.find(&mut session, key)).await?;
        found
            .filter(|doc| !doc.expire.has_passed(Utc::now()))
            .map(|doc| Bytes::from(doc.value))
            .ok_or_else(|| StoreError::not_found(key))
    }

    #[tracing::instrument(skip(self, scope, value), fields(value_len = value.len()))]
    async fn set(
        &self,
        scope: &Scope<Self::Session>,
        key: &str,
        value: Vec<u8>,
        expire: Expiry,
    ) -> StoreResult<()> {
        let doc = StoredDocument::new(key, value, expire);
        let mut session = scope.session().lock().await;
        run(scope.context(), "set", key, self.collection.upsert(&mut session, &doc)).await
    }

    #[tracing::instrument(skip(self, scope, transform))]
    async fn update<F>(
        &self,
        scope: &Scope<Self::Session>,
        key: &str,
        expire: Expiry,
        mut transform: F,
    ) -> StoreResult<()>
    where
        F: FnMut(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send,
    {
        let mut attempts = self.retry.start(scope.context());
        loop {
            attempts.next().await.map_err(|stop| stop.into_update_error(key))?;
            match self.attempt(scope, key, &expire, &mut transform).await? {
                Attempt::Written => return Ok(()),
                Attempt::Contended => {
                    tracing::debug!(attempt = attempts.attempt(), "document changed concurrently");
                },
            }
        }
    }

    #[tracing::instrument(skip(self, scope))]
    async fn keys(&self, scope: &Scope<Self::Session>) -> StoreResult<Vec<String>> {
        let mut session = scope.session().lock().await;
        run(scope.context(), "list", ALL_KEYS, self.collection.keys(&mut session, Utc::now())).await
    }
}
