//! Remote side effects of mutations.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::coordinator::{RequestCoordinator, RequestOptions};

pub type CustomEffect = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// What a mutation does on the server once applied locally.
#[derive(Clone)]
pub enum RemoteEffect {
    /// A coordinator request. Can be persisted in the offline queue.
    Request { endpoint: String, params: Value },
    /// Arbitrary async work. Lives in memory only.
    Custom(CustomEffect),
}

impl RemoteEffect {
    pub fn request(endpoint: impl Into<String>, params: Value) -> Self {
        Self::Request { endpoint: endpoint.into(), params }
    }

    pub fn custom<F, Fut>(effect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self::Custom(Arc::new(move || effect().boxed()))
    }

    pub fn is_persistable(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    pub(crate) async fn run(&self, executor: &dyn RemoteExecutor) -> Result<Value, String> {
        match self {
            Self::Request { endpoint, params } => executor.send(endpoint, params.clone()).await,
            Self::Custom(effect) => effect().await,
        }
    }
}

impl fmt::Debug for RemoteEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request { endpoint, params } => f
                .debug_struct("Request")
                .field("endpoint", endpoint)
                .field("params", params)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Sends request-style effects.
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn send(&self, endpoint: &str, params: Value) -> Result<Value, String>;
}

/// Writes bypass the cache and the in-flight map: two identical writes are
/// two operations.
#[async_trait::async_trait]
impl RemoteExecutor for RequestCoordinator {
    async fn send(&self, endpoint: &str, params: Value) -> Result<Value, String> {
        let options = RequestOptions::default().bypass_cache().bypass_dedup();
        self.request(endpoint, params, options).await.map_err(|e| e.to_string())
    }
}
