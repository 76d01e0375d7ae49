//! JSON shapes of the etcd v3 gateway.
//!
//! The gateway encodes `bytes` fields as standard base64 and `int64` fields
//! as decimal strings, and omits fields holding their default value (so an
//! empty value, a zero revision, or `succeeded: false` may be missing).

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde adapter for base64-encoded byte fields.
pub(crate) mod b64 {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for int64 fields, written as strings and read from either
/// strings or numbers.
pub(crate) mod int64 {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    pub(crate) fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
            StringOrNumber::Number(n) => Ok(n),
        }
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// `etcdserverpb.ResponseHeader`, reduced to the store revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    #[serde(with = "int64", default, skip_serializing_if = "is_zero")]
    pub revision: i64,
}

/// `mvccpb.KeyValue`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(with = "b64", default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<u8>,
    #[serde(with = "int64", default, skip_serializing_if = "is_zero")]
    pub create_revision: i64,
    #[serde(with = "int64", default, skip_serializing_if = "is_zero")]
    pub mod_revision: i64,
    #[serde(with = "int64", default, skip_serializing_if = "is_zero")]
    pub version: i64,
    #[serde(with = "int64", default, skip_serializing_if = "is_zero")]
    pub lease: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(with = "b64", default, skip_serializing_if = "Vec::is_empty")]
    pub range_end: Vec<u8>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keys_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeResponse {
    #[serde(default)]
    pub header: ResponseHeader,
    #[serde(default)]
    pub kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(with = "b64", default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<u8>,
    #[serde(with = "int64", default, skip_serializing_if = "is_zero")]
    pub lease: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    #[serde(default)]
    pub header: ResponseHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareTarget {
    Create,
    Mod,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareResult {
    #[default]
    Equal,
}

/// `etcdserverpb.Compare` for the two revision targets the store uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    pub target: CompareTarget,
    #[serde(default)]
    pub result: CompareResult,
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(with = "int64", default)]
    pub create_revision: i64,
    #[serde(with = "int64", default)]
    pub mod_revision: i64,
}

impl Compare {
    /// Holds only if `key` does not exist.
    #[must_use]
    pub fn absent(key: Vec<u8>) -> Self {
        Self {
            target: CompareTarget::Create,
            result: CompareResult::Equal,
            key,
            create_revision: 0,
            mod_revision: 0,
        }
    }

    /// Holds only if `key` was last modified at `revision`.
    #[must_use]
    pub fn modified_at(key: Vec<u8>, revision: i64) -> Self {
        Self {
            target: CompareTarget::Mod,
            result: CompareResult::Equal,
            key,
            create_revision: 0,
            mod_revision: revision,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOp {
    pub request_put: PutRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRequest {
    #[serde(default)]
    pub compare: Vec<Compare>,
    #[serde(default)]
    pub success: Vec<RequestOp>,
    #[serde(default)]
    pub failure: Vec<RequestOp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    #[serde(default)]
    pub header: ResponseHeader,
    #[serde(default)]
    pub succeeded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrantRequest {
    #[serde(rename = "TTL", with = "int64")]
    pub ttl: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrantResponse {
    #[serde(default)]
    pub header: ResponseHeader,
    #[serde(rename = "ID", with = "int64")]
    pub id: i64,
    #[serde(rename = "TTL", with = "int64", default)]
    pub ttl: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRevokeRequest {
    #[serde(rename = "ID", with = "int64")]
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRevokeResponse {
    #[serde(default)]
    pub header: ResponseHeader,
}

/// Error body returned with a non-success status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayError {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Returns the smallest key greater than every key starting with `prefix`,
/// or `[0]` (all keys) for an empty prefix.
#[must_use]
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}
