//! [`Store`] implementation over the etcd v3 gateway.
//!
//! # Update cycle
//!
//! ```text
//! range(key) ── transform ── txn: if <fence> then put(key, new, lease)
//!                                    │
//!        not succeeded: key changed ─┘ back off, range again
//! ```
//!
//! The fence is `create_revision == 0` when the key was absent and
//! `mod_revision == <revision read>` otherwise, so a write lands only if
//! nothing touched the key since the read. Expiry is a lease granted once per
//! call and reused across retries; a lease that lapses before the write is
//! granted again, and one left unused when the call ends is revoked.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use simplekv::{Context, Expiry, RetryPolicy, Scope, Store, StoreError, StoreResult};

use crate::{
    client::EtcdClient,
    config::EtcdConfig,
    error::{EtcdError, Result},
    wire::{Compare, prefix_range_end},
};

/// Key reported by operations that are not about a single key.
const ALL_KEYS: &str = "*";

/// etcd-backed [`Store`].
///
/// # Example
///
/// ```no_run
/// use simplekv::{Context, Expiry, Store};
/// use simplekv_etcd::{EtcdConfig, EtcdStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = EtcdConfig::builder().endpoint("http://127.0.0.1:2379").prefix("app/").build()?;
/// let store = EtcdStore::new(&config)?;
/// let scope = store.scope(Context::background()).await?;
/// store.set(&scope, "greeting", b"hello".to_vec(), Expiry::Never).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: EtcdClient,
    prefix: String,
    retry: RetryPolicy,
}

impl EtcdStore {
    /// Creates a store for `config`.
    ///
    /// No request is made until the first operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &EtcdConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: EtcdClient::new(config)?,
            prefix: config.prefix().to_owned(),
            retry: config.retry().clone(),
        })
    }

    /// Returns the gateway client.
    #[must_use]
    pub fn client(&self) -> &EtcdClient {
        &self.client
    }

    fn full_key(&self, key: &str) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(self.prefix.as_bytes());
        full.extend_from_slice(key.as_bytes());
        full
    }

    /// Grants a lease for `expire`, or returns 0 (no lease) for
    /// [`Expiry::Never`].
    async fn lease_for(&self, expire: Expiry) -> Result<i64> {
        match expire.ttl_seconds(Utc::now()) {
            Some(ttl) => self.client.grant_lease(ttl).await,
            None => Ok(0),
        }
    }

    /// Revokes a lease granted for a write that never happened.
    async fn discard_lease(&self, lease: Option<i64>) {
        let Some(id) = lease.filter(|id| *id != 0) else {
            return;
        };
        if let Err(err) = self.client.revoke_lease(id).await {
            tracing::debug!(lease = id, error = %err, "failed to revoke unused lease");
        }
    }
}

/// Awaits a gateway call bounded by `ctx`.
async fn run<T>(
    ctx: &Context,
    operation: &'static str,
    key: &str,
    fut: impl Future<Output = Result<T>>,
) -> StoreResult<T> {
    ctx.run(fut)
        .await
        .map_err(|err| StoreError::cancelled(operation, key, err))?
        .map_err(|err: EtcdError| err.into_store_error(operation, key))
}

#[async_trait]
impl Store for EtcdStore {
    type Session = ();

    #[tracing::instrument(skip(self, ctx))]
    async fn scope(&self, ctx: Context) -> StoreResult<Scope<()>> {
        Ok(Scope::new(ctx, ()))
    }

    #[tracing::instrument(skip(self, scope))]
    async fn get(&self, scope: &Scope<()>, key: &str) -> StoreResult<Bytes> {
        let found = run(scope.context(), "get", key, self.client.get(&self.full_key(key))).await?;
        found.map(|kv| Bytes::from(kv.value)).ok_or_else(|| StoreError::not_found(key))
    }

    #[tracing::instrument(skip(self, scope, value), fields(value_len = value.len()))]
    async fn set(
        &self,
        scope: &Scope<()>,
        key: &str,
        value: Vec<u8>,
        expire: Expiry,
    ) -> StoreResult<()> {
        let ctx = scope.context();
        let lease = run(ctx, "set", key, self.lease_for(expire)).await?;
        run(ctx, "set", key, self.client.put(&self.full_key(key), &value, lease)).await
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
        let full_key = self.full_key(key);
        let mut lease = None;
        let mut attempts = self.retry.start(ctx);
        loop {
            attempts.next().await.map_err(|stop| stop.into_update_error(key))?;

            let current = run(ctx, "update", key, self.client.get(&full_key)).await?;
            let old = current.as_ref().map(|kv| kv.value.as_slice());
            let new = match transform(old) {
                Ok(new) => new,
                Err(err) => {
                    self.discard_lease(lease).await;
                    return Err(err);
                },
            };
            if old == Some(new.as_slice()) {
                tracing::trace!("value unchanged, skipping write");
                self.discard_lease(lease).await;
                return Ok(());
            }

            let lease_id = match lease {
                Some(id) => id,
                None => {
                    let id = run(ctx, "update", key, self.lease_for(expire)).await?;
                    *lease.insert(id)
                },
            };
            let fence = match &current {
                Some(kv) => Compare::modified_at(full_key.clone(), kv.mod_revision),
                None => Compare::absent(full_key.clone()),
            };
            let written = ctx
                .run(self.client.put_if(fence, &full_key, &new, lease_id))
                .await
                .map_err(|err| StoreError::cancelled("update", key, err))?;
            match written {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tracing::debug!(attempt = attempts.attempt(), "key modified concurrently");
                },
                Err(err) if err.is_lease_not_found() => {
                    tracing::debug!(
                        attempt = attempts.attempt(),
                        lease = lease_id,
                        "lease lapsed before write"
                    );
                    lease = None;
                },
                Err(err) => return Err(err.into_store_error("update", key)),
            }
        }
    }

    #[tracing::instrument(skip(self, scope))]
    async fn keys(&self, scope: &Scope<()>) -> StoreResult<Vec<String>> {
        let prefix = self.prefix.as_bytes();
        // An empty key is rejected; "\0" is the lowest key.
        let start = if prefix.is_empty() { vec![0] } else { prefix.to_vec() };
        let range_end = prefix_range_end(prefix);
        let kvs =
            run(scope.context(), "list", ALL_KEYS, self.client.range(&start, &range_end, true))
                .await?;
        kvs.into_iter()
            .map(|kv| {
                let suffix = kv.key.get(prefix.len()..).unwrap_or_default().to_vec();
                String::from_utf8(suffix).map_err(|err| {
                    StoreError::serialization_with_source("key is not valid UTF-8", err)
                })
            })
            .collect()
    }
}
