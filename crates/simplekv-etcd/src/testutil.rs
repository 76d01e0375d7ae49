//! In-process stand-in for the etcd v3 JSON gateway.
//!
//! [`MockEtcdServer`] serves `range`, `put`, `txn`, `lease/grant` and
//! `lease/revoke` on a loopback port with etcd's revision rules: every write
//! bumps the store revision, `create_revision` is kept across overwrites, and
//! a key attached to a lease is deleted when the lease expires.
//!
//! Hooks for driving failure paths:
//! - [`MockEtcdServer::interfere_with`] writes a key just before the next
//!   transaction is evaluated
//! - [`MockEtcdServer::fail_next`] answers the next requests with `503`
//! - [`MockEtcdServer::expire_leases`] expires every lease immediately
//! - [`MockEtcdServer::expire_leases_before_next_txn`] lets every lease lapse
//!   just before the next transaction is evaluated

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use parking_lot::Mutex;
use simplekv::RetryPolicy;
use tokio::{net::TcpListener, task::JoinHandle};

use crate::{
    EtcdConfig, EtcdStore,
    wire::{
        CompareTarget, GatewayError, KeyValue, LeaseGrantRequest, LeaseGrantResponse,
        LeaseRevokeRequest, LeaseRevokeResponse, PutRequest, PutResponse, RangeRequest,
        RangeResponse, ResponseHeader, TxnRequest, TxnResponse,
    },
};

type Reply<T> = Result<Json<T>, (StatusCode, Json<GatewayError>)>;

#[derive(Debug, Default)]
struct MockState {
    revision: i64,
    kvs: BTreeMap<Vec<u8>, KeyValue>,
    leases: HashMap<i64, Instant>,
    next_lease: i64,
    interference: VecDeque<(Vec<u8>, Vec<u8>)>,
    lapse_before_txn: bool,
    failures: u32,
    requests: u64,
}

impl MockState {
    fn header(&self) -> ResponseHeader {
        ResponseHeader { revision: self.revision }
    }

    fn expire_all(&mut self, now: Instant) {
        for deadline in self.leases.values_mut() {
            *deadline = now;
        }
        self.reap(now);
    }

    /// Drops expired leases and the keys attached to them.
    fn reap(&mut self, now: Instant) {
        let expired: Vec<i64> =
            self.leases.iter().filter(|(_, deadline)| **deadline <= now).map(|(id, _)| *id).collect();
        if expired.is_empty() {
            return;
        }
        for id in &expired {
            self.leases.remove(id);
        }
        let before = self.kvs.len();
        self.kvs.retain(|_, kv| !expired.contains(&kv.lease));
        if self.kvs.len() != before {
            self.revision += 1;
        }
    }

    fn enter(&mut self) -> Result<(), (StatusCode, Json<GatewayError>)> {
        self.requests += 1;
        self.reap(Instant::now());
        if self.failures > 0 {
            self.failures -= 1;
            return Err(gateway_error(StatusCode::SERVICE_UNAVAILABLE, 14, "etcdserver: injected failure"));
        }
        Ok(())
    }

    fn put(&mut self, request: &PutRequest) -> Result<(), (StatusCode, Json<GatewayError>)> {
        if request.lease != 0 && !self.leases.contains_key(&request.lease) {
            return Err(lease_not_found());
        }
        self.revision += 1;
        let revision = self.revision;
        let entry = self.kvs.entry(request.key.clone()).or_insert_with(|| KeyValue {
            key: request.key.clone(),
            create_revision: revision,
            ..KeyValue::default()
        });
        entry.value.clone_from(&request.value);
        entry.mod_revision = revision;
        entry.version += 1;
        entry.lease = request.lease;
        Ok(())
    }
}

fn gateway_error(status: StatusCode, code: i32, message: &str) -> (StatusCode, Json<GatewayError>) {
    (
        status,
        Json(GatewayError { error: message.to_owned(), code, message: message.to_owned() }),
    )
}

fn lease_not_found() -> (StatusCode, Json<GatewayError>) {
    gateway_error(StatusCode::NOT_FOUND, 5, "etcdserver: requested lease not found")
}

type Shared = Arc<Mutex<MockState>>;

async fn range(State(state): State<Shared>, Json(request): Json<RangeRequest>) -> Reply<RangeResponse> {
    let mut state = state.lock();
    state.enter()?;
    let kvs = if request.range_end.is_empty() {
        state.kvs.get(&request.key).cloned().into_iter().collect()
    } else {
        let all = request.range_end == [0];
        state
            .kvs
            .range(request.key.clone()..)
            .take_while(|(key, _)| all || **key < request.range_end)
            .map(|(_, kv)| kv.clone())
            .collect::<Vec<_>>()
    };
    let kvs = if request.keys_only {
        kvs.into_iter().map(|kv| KeyValue { value: Vec::new(), ..kv }).collect()
    } else {
        kvs
    };
    Ok(Json(RangeResponse { header: state.header(), kvs }))
}

async fn put(State(state): State<Shared>, Json(request): Json<PutRequest>) -> Reply<PutResponse> {
    let mut state = state.lock();
    state.enter()?;
    state.put(&request)?;
    Ok(Json(PutResponse { header: state.header() }))
}

async fn txn(State(state): State<Shared>, Json(request): Json<TxnRequest>) -> Reply<TxnResponse> {
    let mut state = state.lock();
    state.enter()?;
    if let Some((key, value)) = state.interference.pop_front() {
        state.put(&PutRequest { key, value, lease: 0 })?;
    }
    if std::mem::take(&mut state.lapse_before_txn) {
        state.expire_all(Instant::now());
    }
    let succeeded = request.compare.iter().all(|compare| {
        let kv = state.kvs.get(&compare.key);
        match compare.target {
            CompareTarget::Create => kv.map_or(0, |kv| kv.create_revision) == compare.create_revision,
            CompareTarget::Mod => kv.map_or(0, |kv| kv.mod_revision) == compare.mod_revision,
        }
    });
    let ops = if succeeded { &request.success } else { &request.failure };
    for op in ops {
        state.put(&op.request_put)?;
    }
    Ok(Json(TxnResponse { header: state.header(), succeeded }))
}

async fn grant(
    State(state): State<Shared>,
    Json(request): Json<LeaseGrantRequest>,
) -> Reply<LeaseGrantResponse> {
    let mut state = state.lock();
    state.enter()?;
    if request.ttl <= 0 {
        return Err(gateway_error(StatusCode::BAD_REQUEST, 3, "etcdserver: lease TTL must be positive"));
    }
    state.next_lease += 1;
    let id = state.next_lease;
    let ttl = Duration::from_secs(request.ttl.unsigned_abs());
    state.leases.insert(id, Instant::now() + ttl);
    Ok(Json(LeaseGrantResponse { header: state.header(), id, ttl: request.ttl }))
}

async fn revoke(
    State(state): State<Shared>,
    Json(request): Json<LeaseRevokeRequest>,
) -> Reply<LeaseRevokeResponse> {
    let mut state = state.lock();
    state.enter()?;
    if state.leases.remove(&request.id).is_none() {
        return Err(lease_not_found());
    }
    let before = state.kvs.len();
    state.kvs.retain(|_, kv| kv.lease != request.id);
    if state.kvs.len() != before {
        state.revision += 1;
    }
    Ok(Json(LeaseRevokeResponse { header: state.header() }))
}

/// A fake etcd gateway on a loopback port. Stops when dropped.
pub struct MockEtcdServer {
    addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl MockEtcdServer {
    /// Binds a loopback port and starts serving.
    ///
    /// # Panics
    ///
    /// Panics if no loopback port can be bound.
    #[allow(clippy::expect_used)]
    pub async fn start() -> Self {
        let state = Shared::default();
        let router = Router::new()
            .route("/v3/kv/range", post(range))
            .route("/v3/kv/put", post(put))
            .route("/v3/kv/txn", post(txn))
            .route("/v3/lease/grant", post(grant))
            .route("/v3/lease/revoke", post(revoke))
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback port");
        let addr = listener.local_addr().expect("local address");
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!(error = %err, "mock etcd server stopped");
            }
        });
        Self { addr, state, task }
    }

    /// Base URL of the gateway.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A store pointed at this server with `prefix` and a fast retry policy.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be built.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn store(&self, prefix: &str) -> EtcdStore {
        let config = EtcdConfig::builder()
            .endpoint(self.endpoint())
            .prefix(prefix)
            .timeout(Duration::from_secs(5))
            .retry(fast_retry())
            .build()
            .expect("valid config");
        EtcdStore::new(&config).expect("build store")
    }

    /// Queues a direct write of `value` at the raw `key`, applied just before
    /// the next transaction is evaluated.
    pub fn interfere_with(&self, key: &[u8], value: &[u8]) {
        self.state.lock().interference.push_back((key.to_vec(), value.to_vec()));
    }

    /// Answers the next `count` requests with `503 Service Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures = count;
    }

    /// Expires every granted lease now.
    pub fn expire_leases(&self) {
        self.state.lock().expire_all(Instant::now());
    }

    /// Expires every lease just before the next transaction is evaluated.
    pub fn expire_leases_before_next_txn(&self) {
        self.state.lock().lapse_before_txn = true;
    }

    /// Number of leases granted so far.
    #[must_use]
    pub fn leases_granted(&self) -> i64 {
        self.state.lock().next_lease
    }

    /// Returns the stored entry at the raw `key`.
    #[must_use]
    pub fn entry(&self, key: &[u8]) -> Option<KeyValue> {
        self.state.lock().kvs.get(key).cloned()
    }

    /// Returns the remaining TTL of `lease`, if it is still alive.
    #[must_use]
    pub fn lease_remaining(&self, lease: i64) -> Option<Duration> {
        let deadline = *self.state.lock().leases.get(&lease)?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Current store revision.
    #[must_use]
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// Number of requests served, including failed ones.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.state.lock().requests
    }
}

impl Drop for MockEtcdServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Retry policy with millisecond-scale backoff.
///
/// # Panics
///
/// Never; the values are valid.
#[allow(clippy::expect_used)]
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .initial_delay(Duration::from_micros(50))
        .max_delay(Duration::from_millis(5))
        .build()
        .expect("valid retry policy")
}
