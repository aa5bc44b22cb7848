//! Bridges scheduler workers to the network transport.

use std::sync::Arc;

use serde_json::Value;

use crate::scheduler::Executor;
use crate::transport::Transport;

/// Payload of a coordinator task.
#[derive(Debug, Clone)]
pub enum TransportCall {
    Single { endpoint: String, params: Value },
    Batch { endpoint: String, params: Vec<Value> },
}

impl TransportCall {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Single { endpoint, .. } | Self::Batch { endpoint, .. } => endpoint,
        }
    }
}

/// Result of a coordinator task, shaped like its call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportReply {
    Single(Value),
    Batch(Vec<Value>),
}

/// Executes [`TransportCall`]s on a worker.
pub struct TransportExecutor {
    transport: Arc<dyn Transport>,
}

impl TransportExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl Executor<TransportCall, TransportReply> for TransportExecutor {
    async fn execute(&self, call: TransportCall) -> Result<TransportReply, String> {
        match call {
            TransportCall::Single { endpoint, params } => self
                .transport
                .call(&endpoint, &params)
                .await
                .map(TransportReply::Single)
                .map_err(|e| e.to_string()),
            TransportCall::Batch { endpoint, params } => self
                .transport
                .call_batch(&endpoint, &params)
                .await
                .map(TransportReply::Batch)
                .map_err(|e| e.to_string()),
        }
    }
}
