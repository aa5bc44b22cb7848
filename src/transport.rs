//! Network transport collaborator.
//!
//! The core never serializes anything for the wire itself. Any HTTP or IPC
//! client that can answer single and batched calls plugs in here.

use serde_json::Value;
use thiserror::Error;

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("remote rejected {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },

    #[error("malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },
}

/// Outbound call surface consumed by the request coordinator.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Issue a single call.
    async fn call(&self, endpoint: &str, params: &Value) -> Result<Value, TransportError>;

    /// Issue one call carrying every member's params, in order.
    ///
    /// The default falls back to sequential single calls for transports
    /// without a native batch route.
    async fn call_batch(
        &self,
        endpoint: &str,
        params: &[Value],
    ) -> Result<Vec<Value>, TransportError> {
        let mut results = Vec::with_capacity(params.len());
        for p in params {
            results.push(self.call(endpoint, p).await?);
        }
        Ok(results)
    }
}
