//! Request coordination: cache, deduplication, batching, then the scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::Instrument;

use super::batch::{BatchAccumulator, BatchMember, BatchPolicy, DeclaredBatchPolicy, JoinOutcome, PendingBatch};
use super::cache::ResponseCache;
use super::error::RequestError;
use super::executor::{TransportCall, TransportExecutor, TransportReply};
use super::key::RequestKey;
use crate::clock::{Clock, SystemClock};
use crate::scheduler::{
    Priority, SchedulerConfig, SchedulerError, SchedulerStats, TaskOptions, TaskScheduler,
};
use crate::telemetry::{self, RequestSpan, SpanExt};
use crate::transport::Transport;

/// Scheduler specialised for transport calls.
pub type TransportScheduler = TaskScheduler<TransportCall, TransportReply>;

type SharedReply = Shared<BoxFuture<'static, Result<Value, RequestError>>>;
type MemberTx = oneshot::Sender<Result<Value, RequestError>>;

/// Configuration for the request coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub cache_enabled: bool,
    pub dedup_enabled: bool,
    /// TTL for cached responses unless a request overrides it.
    #[serde(with = "crate::config::duration_ms")]
    pub cache_ttl: Duration,
    pub max_cache_entries: usize,
    /// Window anchored to a batch's first member.
    #[serde(with = "crate::config::duration_ms")]
    pub batch_window: Duration,
    pub max_batch_size: usize,
    /// Endpoints the default batch policy may merge.
    pub batchable_endpoints: Vec<String>,
    /// Period of the background cache sweep.
    #[serde(with = "crate::config::duration_ms")]
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            dedup_enabled: true,
            cache_ttl: Duration::from_secs(300),
            max_cache_entries: 1000,
            batch_window: Duration::from_millis(50),
            max_batch_size: 10,
            batchable_endpoints: Vec::new(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Skip the cache read. A successful result is still stored.
    pub skip_cache: bool,
    /// Always issue a fresh call, even if an identical one is in flight.
    pub skip_dedup: bool,
    /// Allow merging into a batch when the batch policy accepts the endpoint.
    pub batchable: bool,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    /// Overrides the configured cache TTL for this result.
    pub cache_ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self { priority, ..Default::default() }
    }

    pub fn batched(mut self) -> Self {
        self.batchable = true;
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn bypass_dedup(mut self) -> Self {
        self.skip_dedup = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn task_options(&self) -> TaskOptions {
        TaskOptions { priority: self.priority, timeout: self.timeout, retries: self.retries }
    }
}

/// Point-in-time coordinator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub dedup_joins: u64,
    pub batches_dispatched: u64,
    pub batched_requests: u64,
    pub single_requests: u64,
    pub failures: u64,
    pub inflight: usize,
    pub pending_batches: usize,
    pub cache_entries: usize,
    pub scheduler: SchedulerStats,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    dedup_joins: AtomicU64,
    batches_dispatched: AtomicU64,
    batched_requests: AtomicU64,
    single_requests: AtomicU64,
    failures: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

struct Inner {
    config: CoordinatorConfig,
    scheduler: TransportScheduler,
    cache: ResponseCache,
    inflight: Mutex<HashMap<RequestKey, SharedReply>>,
    batches: BatchAccumulator,
    policy: Arc<dyn BatchPolicy>,
    counters: Counters,
}

/// Front door for outbound calls.
///
/// Cheap to clone; clones share the cache, in-flight map and scheduler.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

/// Builder for [`RequestCoordinator`].
pub struct RequestCoordinatorBuilder {
    transport: Arc<dyn Transport>,
    config: CoordinatorConfig,
    scheduler_config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    policy: Option<Arc<dyn BatchPolicy>>,
}

impl RequestCoordinatorBuilder {
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default [`DeclaredBatchPolicy`] built from
    /// `batchable_endpoints`.
    pub fn batch_policy(mut self, policy: Arc<dyn BatchPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Must be called inside a Tokio runtime; the scheduler spawns its workers.
    pub fn build(self) -> RequestCoordinator {
        let policy = self.policy.unwrap_or_else(|| {
            Arc::new(DeclaredBatchPolicy::new(self.config.batchable_endpoints.iter().cloned()))
        });
        let executor = Arc::new(TransportExecutor::new(self.transport));
        let scheduler = TaskScheduler::new(self.scheduler_config, executor);
        let cache = ResponseCache::new(self.config.max_cache_entries, self.clock);
        let batches = BatchAccumulator::new(self.config.max_batch_size, self.config.batch_window);
        tracing::info!(
            cache = self.config.cache_enabled,
            dedup = self.config.dedup_enabled,
            batch_window_ms = self.config.batch_window.as_millis() as u64,
            max_batch_size = self.config.max_batch_size,
            "request coordinator started"
        );
        RequestCoordinator {
            inner: Arc::new(Inner {
                config: self.config,
                scheduler,
                cache,
                inflight: Mutex::new(HashMap::new()),
                batches,
                policy,
                counters: Counters::default(),
            }),
        }
    }
}

impl RequestCoordinator {
    pub fn builder(transport: Arc<dyn Transport>) -> RequestCoordinatorBuilder {
        RequestCoordinatorBuilder {
            transport,
            config: CoordinatorConfig::default(),
            scheduler_config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
            policy: None,
        }
    }

    pub fn new(
        transport: Arc<dyn Transport>,
        config: CoordinatorConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self::builder(transport).config(config).scheduler_config(scheduler_config).build()
    }

    /// Issue `endpoint` with `params`, going through the cache, the in-flight
    /// map and the batcher before the scheduler.
    pub async fn request(
        &self,
        endpoint: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let started = Instant::now();
        let key = RequestKey::new(endpoint, &params);
        let span = RequestSpan::new(endpoint, &key.to_string());
        let result = self
            .inner
            .request(key, endpoint, params, options)
            .instrument(span.clone())
            .await;
        span.record_result(&result, started);
        result
    }

    /// Drop the cached response for one request. Returns whether one existed.
    pub fn invalidate(&self, endpoint: &str, params: &Value) -> bool {
        self.inner.cache.invalidate(&RequestKey::new(endpoint, params))
    }

    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let removed = self.inner.cache.invalidate_endpoint(endpoint);
        tracing::debug!(endpoint, removed, "endpoint invalidated");
        removed
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Remove expired cache entries. Returns the number removed.
    pub fn sweep_cache(&self) -> usize {
        self.inner.cache.sweep()
    }

    /// Whether a live cached response exists for this request.
    pub fn is_cached(&self, endpoint: &str, params: &Value) -> bool {
        self.inner.cache.get(&RequestKey::new(endpoint, params)).is_some()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &TransportScheduler {
        &self.inner.scheduler
    }

    pub fn stats(&self) -> CoordinatorStats {
        let inner = &self.inner;
        let c = &inner.counters;
        CoordinatorStats {
            requests: c.requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            dedup_joins: c.dedup_joins.load(Ordering::Relaxed),
            batches_dispatched: c.batches_dispatched.load(Ordering::Relaxed),
            batched_requests: c.batched_requests.load(Ordering::Relaxed),
            single_requests: c.single_requests.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            inflight: inner.inflight.lock().len(),
            pending_batches: inner.batches.open_batches(),
            cache_entries: inner.cache.len(),
            scheduler: inner.scheduler.stats(),
        }
    }

    /// Fail open batches with `Abandoned` and shut the scheduler down.
    pub fn shutdown(&self) {
        for mut batch in self.inner.batches.drain() {
            batch.cancel_timer();
            for member in batch.members.drain(..) {
                let _ = member.tx.send(Err(RequestError::Abandoned));
            }
        }
        self.inner.scheduler.shutdown();
        tracing::info!("request coordinator shut down");
    }
}

impl Inner {
    async fn request(
        self: &Arc<Self>,
        key: RequestKey,
        endpoint: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        bump(&self.counters.requests, 1);

        if self.config.cache_enabled && !options.skip_cache {
            if let Some(value) = self.cache.get(&key) {
                bump(&self.counters.cache_hits, 1);
                telemetry::record_cache_lookup(true);
                tracing::trace!("cache hit");
                return Ok(value);
            }
            bump(&self.counters.cache_misses, 1);
            telemetry::record_cache_lookup(false);
        }

        if !self.config.dedup_enabled || options.skip_dedup {
            return self.fetch(key, endpoint.to_string(), params, options).await;
        }

        let reply = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(existing) => {
                    bump(&self.counters.dedup_joins, 1);
                    telemetry::record_dedup_join();
                    tracing::debug!("joined in-flight request");
                    existing.clone()
                }
                None => {
                    let reply = self.spawn_fetch(key.clone(), endpoint.to_string(), params, options);
                    inflight.insert(key, reply.clone());
                    reply
                }
            }
        };
        reply.await
    }

    /// Run the fetch on its own task so that dropping the first caller does
    /// not cancel it for the joiners. The key leaves the in-flight map once
    /// the result is known.
    fn spawn_fetch(
        self: &Arc<Self>,
        key: RequestKey,
        endpoint: String,
        params: Value,
        options: RequestOptions,
    ) -> SharedReply {
        let me = Arc::clone(self);
        let handle = tokio::spawn(
            async move {
                let result = me.fetch(key.clone(), endpoint, params, options).await;
                me.inflight.lock().remove(&key);
                result
            }
            .in_current_span(),
        );
        async move { handle.await.unwrap_or(Err(RequestError::Abandoned)) }
            .boxed()
            .shared()
    }

    async fn fetch(
        self: &Arc<Self>,
        key: RequestKey,
        endpoint: String,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let batch_key = if options.batchable {
            self.policy.batch_key(&endpoint, &params)
        } else {
            None
        };

        let result = match batch_key {
            Some(batch_key) => self.enqueue_batched(batch_key, endpoint, params, options).await,
            None => self.execute_single(endpoint, params, options).await,
        };

        match &result {
            Ok(value) if self.config.cache_enabled => {
                let ttl = options.cache_ttl.unwrap_or(self.config.cache_ttl);
                self.cache.insert(key, value.clone(), ttl);
            }
            Ok(_) => {}
            Err(_) => bump(&self.counters.failures, 1),
        }
        result
    }

    async fn execute_single(
        &self,
        endpoint: String,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        bump(&self.counters.single_requests, 1);
        let call = TransportCall::Single { endpoint: endpoint.clone(), params };
        match self.scheduler.execute(call, options.task_options()).await? {
            TransportReply::Single(value) => Ok(value),
            TransportReply::Batch(_) => Err(RequestError::MalformedReply { endpoint }),
        }
    }

    async fn enqueue_batched(
        self: &Arc<Self>,
        batch_key: String,
        endpoint: String,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let (tx, rx) = oneshot::channel();
        let member = BatchMember { params, options: options.task_options(), tx };

        match self.batches.join(&batch_key, &endpoint, member) {
            JoinOutcome::Opened { batch_id } => {
                let timer = self.arm_window(Arc::downgrade(self), batch_key.clone(), batch_id);
                self.batches.set_timer(&batch_key, batch_id, timer);
                tracing::trace!(batch_id, "batch opened");
            }
            JoinOutcome::Joined => {}
            JoinOutcome::Full(batch) => self.flush(batch, "size"),
        }
        rx.await.unwrap_or(Err(RequestError::Abandoned))
    }

    fn arm_window(
        &self,
        me: Weak<Self>,
        batch_key: String,
        batch_id: u64,
    ) -> tokio::task::AbortHandle {
        let window = self.batches.window();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(inner) = me.upgrade() else {
                return;
            };
            if let Some(batch) = inner.batches.take(&batch_key, batch_id) {
                inner.flush(batch, "window");
            }
        })
        .abort_handle()
    }

    /// Dispatch a closed batch as one scheduler task.
    fn flush(&self, mut batch: PendingBatch, trigger: &'static str) {
        batch.cancel_timer();
        let options = batch.task_options();
        let members = batch.members.len();
        let (senders, params): (Vec<MemberTx>, Vec<Value>) =
            batch.members.drain(..).map(|m| (m.tx, m.params)).unzip();

        bump(&self.counters.batches_dispatched, 1);
        bump(&self.counters.batched_requests, members as u64);
        telemetry::record_batch_dispatch(members);
        tracing::debug!(
            batch_id = batch.id,
            endpoint = %batch.endpoint,
            members,
            trigger,
            waited_ms = batch.opened_at.elapsed().as_millis() as u64,
            priority = %options.priority,
            "batch flushed"
        );

        let scheduler = self.scheduler.clone();
        let endpoint = batch.endpoint;
        tokio::spawn(async move {
            let call = TransportCall::Batch { endpoint: endpoint.clone(), params };
            let outcome = scheduler.execute(call, options).await;
            distribute(&endpoint, senders, outcome);
        });
    }
}

/// Hand each member its slice of the batch result, in join order.
/// Any failure fails every member.
fn distribute(
    endpoint: &str,
    senders: Vec<MemberTx>,
    outcome: Result<TransportReply, SchedulerError>,
) {
    let members = senders.len();
    let error = match outcome {
        Ok(TransportReply::Batch(values)) if values.len() == members => {
            for (tx, value) in senders.into_iter().zip(values) {
                let _ = tx.send(Ok(value));
            }
            return;
        }
        Ok(TransportReply::Batch(values)) => RequestError::BatchLengthMismatch {
            endpoint: endpoint.to_string(),
            expected: members,
            actual: values.len(),
        },
        Ok(TransportReply::Single(_)) => {
            RequestError::MalformedReply { endpoint: endpoint.to_string() }
        }
        Err(source) => RequestError::Batch { endpoint: endpoint.to_string(), members, source },
    };
    tracing::warn!(endpoint, members, error = %error, "batch failed");
    for tx in senders {
        let _ = tx.send(Err(error.clone()));
    }
}

#[cfg(test)]
#[path = "requests_tests.rs"]
mod tests;
