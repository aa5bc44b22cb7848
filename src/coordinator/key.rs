//! Request keys: one key per logical operation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Bytes of the SHA-256 digest kept in the key (96 bits).
const DIGEST_BYTES: usize = 12;

/// Canonical identity of `(endpoint, normalized params)`.
///
/// Used for both deduplication and cache lookup. Two requests with the same
/// key are the same logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    endpoint: String,
    digest: String,
}

impl RequestKey {
    pub fn new(endpoint: &str, params: &Value) -> Self {
        let canonical = normalize(params).to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        Self {
            endpoint: endpoint.to_string(),
            digest: hex::encode(&digest[..DIGEST_BYTES]),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.endpoint, self.digest)
    }
}

/// Canonical form of request params: object keys sorted, null-valued
/// fields dropped, arrays kept in order.
pub fn normalize(params: &Value) -> Value {
    match params {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), normalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}
