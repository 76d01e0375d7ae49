//! Minimal client for the etcd v3 JSON gateway.
//!
//! Covers the calls the store needs:
//!
//! | Call | Path |
//! |------|------|
//! | [`EtcdClient::range`] | `POST /v3/kv/range` |
//! | [`EtcdClient::put`] | `POST /v3/kv/put` |
//! | [`EtcdClient::txn`] | `POST /v3/kv/txn` |
//! | [`EtcdClient::grant_lease`] | `POST /v3/lease/grant` |
//! | [`EtcdClient::revoke_lease`] | `POST /v3/lease/revoke` |

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::EtcdConfig,
    error::{EtcdError, Result},
    wire::{
        Compare, GatewayError, KeyValue, LeaseGrantRequest, LeaseGrantResponse,
        LeaseRevokeRequest, LeaseRevokeResponse, PutRequest, PutResponse, RangeRequest,
        RangeResponse, RequestOp, TxnRequest, TxnResponse,
    },
};

/// HTTP client bound to one gateway endpoint.
#[derive(Debug, Clone)]
pub struct EtcdClient {
    http: reqwest::Client,
    endpoint: String,
}

impl EtcdClient {
    /// Builds a client for `config`'s endpoint and timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &EtcdConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { http, endpoint: config.endpoint().to_owned() })
    }

    async fn call<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self.http.post(format!("{}{path}", self.endpoint)).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<GatewayError>(&body)
                .map(|err| if err.message.is_empty() { err.error } else { err.message })
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(EtcdError::Status { status: status.as_u16(), message });
        }
        serde_json::from_slice(&body).map_err(|err| EtcdError::Decode { message: err.to_string() })
    }

    /// Reads the single key `key`.
    pub async fn get(&self, key: &[u8]) -> Result<Option<KeyValue>> {
        let request = RangeRequest { key: key.to_vec(), ..RangeRequest::default() };
        let response: RangeResponse = self.call("/v3/kv/range", &request).await?;
        Ok(response.kvs.into_iter().next())
    }

    /// Reads keys in `[key, range_end)`.
    pub async fn range(&self, key: &[u8], range_end: &[u8], keys_only: bool) -> Result<Vec<KeyValue>> {
        let request = RangeRequest { key: key.to_vec(), range_end: range_end.to_vec(), keys_only };
        let response: RangeResponse = self.call("/v3/kv/range", &request).await?;
        Ok(response.kvs)
    }

    /// Writes `value` at `key`, attached to `lease` if non-zero.
    pub async fn put(&self, key: &[u8], value: &[u8], lease: i64) -> Result<()> {
        let request = PutRequest { key: key.to_vec(), value: value.to_vec(), lease };
        let _: PutResponse = self.call("/v3/kv/put", &request).await?;
        Ok(())
    }

    /// Writes `value` at `key` if `compare` holds. Returns whether it did.
    pub async fn put_if(&self, compare: Compare, key: &[u8], value: &[u8], lease: i64) -> Result<bool> {
        let request = TxnRequest {
            compare: vec![compare],
            success: vec![RequestOp {
                request_put: PutRequest { key: key.to_vec(), value: value.to_vec(), lease },
            }],
            failure: Vec::new(),
        };
        let response = self.txn(&request).await?;
        Ok(response.succeeded)
    }

    /// Runs a transaction.
    pub async fn txn(&self, request: &TxnRequest) -> Result<TxnResponse> {
        self.call("/v3/kv/txn", request).await
    }

    /// Grants a lease of `ttl_seconds` and returns its id.
    pub async fn grant_lease(&self, ttl_seconds: i64) -> Result<i64> {
        let response: LeaseGrantResponse =
            self.call("/v3/lease/grant", &LeaseGrantRequest { ttl: ttl_seconds }).await?;
        tracing::trace!(lease = response.id, ttl = response.ttl, "lease granted");
        Ok(response.id)
    }

    /// Revokes `lease`, deleting any keys attached to it.
    pub async fn revoke_lease(&self, lease: i64) -> Result<()> {
        let _: LeaseRevokeResponse =
            self.call("/v3/lease/revoke", &LeaseRevokeRequest { id: lease }).await?;
        Ok(())
    }
}
