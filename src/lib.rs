//! Presage core
//!
//! Speculative execution and consistency for interactive clients: a bounded
//! task scheduler, a request coordinator that deduplicates, batches and caches
//! outbound calls, a predictive prefetcher that warms the cache from learned
//! access patterns, and an optimistic mutation manager with rollback,
//! undo/redo and offline replay.
//!
//! # Data flow
//!
//! - Reads: `RequestCoordinator::request` → cache / in-flight join / batch →
//!   `TaskScheduler` worker → `Transport`.
//! - Writes: `OptimisticMutationManager::update` applies locally, then sends
//!   the remote effect through the coordinator, bypassing cache and dedup.
//! - Speculation: `PredictivePrefetcher::on_access` records the access,
//!   predicts likely followers and fetches them at low priority.
//!
//! Every collaborator (transport, persistence, clock, connectivity) is
//! injected, so [`Core`] holds no ambient global state.

pub mod cli;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod health;
pub mod mutation;
pub mod persistence;
pub mod prefetch;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use clock::{Clock, SystemClock};
use config::CoreConfig;
use connectivity::ConnectivitySignal;
use coordinator::{
    spawn_cache_sweeper, BatchPolicy, CoordinatorStats, RequestCoordinator,
};
use health::{HealthChecker, HealthConfig, HealthReport};
use mutation::{ConflictPolicy, MutationError, MutationStats, OptimisticMutationManager};
use persistence::{Persistence, PersistenceError};
use prefetch::{PredictivePrefetcher, PrefetchStats, ResourceResolver};
use shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use transport::Transport;

/// Errors from starting the core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to restore persisted state: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Statistics from every component at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoreStats {
    pub online: bool,
    pub shutdown: ShutdownState,
    /// Includes the scheduler's statistics.
    pub coordinator: CoordinatorStats,
    pub prefetch: PrefetchStats,
    pub mutation: MutationStats,
}

/// What `start()` found in persistence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub history_events: usize,
    pub offline_mutations: usize,
}

/// Treats a resource id as the endpoint itself, with no params.
fn endpoint_resolver(resource_id: &str) -> Option<(String, Value)> {
    Some((resource_id.to_string(), Value::Null))
}

/// Builder for [`Core`].
pub struct CoreBuilder {
    transport: Arc<dyn Transport>,
    conflict_policy: Arc<dyn ConflictPolicy>,
    config: CoreConfig,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
    connectivity: ConnectivitySignal,
    resolver: Arc<dyn ResourceResolver>,
    batch_policy: Option<Arc<dyn BatchPolicy>>,
}

impl CoreBuilder {
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn persistence(mut self, store: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn connectivity(mut self, signal: ConnectivitySignal) -> Self {
        self.connectivity = signal;
        self
    }

    /// Maps predicted resource ids to requests. Defaults to using the id as
    /// the endpoint.
    pub fn resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn batch_policy(mut self, policy: Arc<dyn BatchPolicy>) -> Self {
        self.batch_policy = Some(policy);
        self
    }

    /// Must be called inside a Tokio runtime; the scheduler spawns its
    /// workers immediately.
    pub fn build(self) -> Core {
        let config = self.config;

        let mut coordinator = RequestCoordinator::builder(self.transport)
            .config(config.coordinator.clone())
            .scheduler_config(config.scheduler.clone())
            .clock(Arc::clone(&self.clock));
        if let Some(policy) = self.batch_policy {
            coordinator = coordinator.batch_policy(policy);
        }
        let coordinator = coordinator.build();

        let mut prefetcher = PredictivePrefetcher::builder(coordinator.clone(), self.resolver)
            .config(config.prefetch.clone())
            .clock(Arc::clone(&self.clock));
        if let Some(store) = &self.persistence {
            prefetcher = prefetcher.persistence(Arc::clone(store));
        }

        let shutdown = Arc::new(ShutdownCoordinator::new());
        let mut mutations =
            OptimisticMutationManager::builder(Arc::new(coordinator.clone()), self.conflict_policy)
                .config(config.mutation.clone())
                .connectivity(self.connectivity.clone())
                .clock(self.clock)
                .shutdown(Arc::clone(&shutdown));
        if let Some(store) = &self.persistence {
            mutations = mutations.persistence(Arc::clone(store));
        }

        let health = HealthChecker::new(HealthConfig {
            max_queue_depth: config.scheduler.max_pending,
            ..HealthConfig::default()
        });

        Core {
            coordinator,
            prefetcher: prefetcher.build(),
            mutations: mutations.build(),
            connectivity: self.connectivity,
            shutdown,
            health,
            background: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }
}

/// The four components wired together with shared collaborators.
pub struct Core {
    config: CoreConfig,
    coordinator: RequestCoordinator,
    prefetcher: PredictivePrefetcher,
    mutations: OptimisticMutationManager,
    connectivity: ConnectivitySignal,
    shutdown: Arc<ShutdownCoordinator>,
    health: HealthChecker,
    background: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    /// The conflict policy is required; there is no implicit default.
    pub fn builder(
        transport: Arc<dyn Transport>,
        conflict_policy: Arc<dyn ConflictPolicy>,
    ) -> CoreBuilder {
        CoreBuilder {
            transport,
            conflict_policy,
            config: CoreConfig::default(),
            clock: Arc::new(SystemClock),
            persistence: None,
            connectivity: ConnectivitySignal::default(),
            resolver: Arc::new(endpoint_resolver),
            batch_policy: None,
        }
    }

    /// Restore persisted state and spawn the background tasks.
    ///
    /// Loads the access history and the offline queue, starts the cache
    /// sweeper and the connectivity watcher, and replays the queue right away
    /// when already online.
    pub async fn start(&self) -> Result<StartReport, CoreError> {
        let report = StartReport {
            history_events: self.prefetcher.load_history().await?,
            offline_mutations: self.mutations.restore_offline_queue().await?,
        };

        let mut tasks = Vec::with_capacity(2);
        tasks.push(spawn_cache_sweeper(
            self.coordinator.clone(),
            self.config.coordinator.sweep_interval,
            self.background.child_token(),
        ));
        tasks.push(self.mutations.spawn_connectivity_watcher(self.background.child_token()));
        self.tasks.lock().extend(tasks);

        if self.connectivity.is_online() && self.mutations.offline_queue_len() > 0 {
            self.mutations.drain_offline_queue().await;
        }
        tracing::info!(
            history_events = report.history_events,
            offline_mutations = report.offline_mutations,
            pool_size = self.coordinator.scheduler().pool_size(),
            "core started"
        );
        Ok(report)
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn prefetcher(&self) -> &PredictivePrefetcher {
        &self.prefetcher
    }

    pub fn mutations(&self) -> &OptimisticMutationManager {
        &self.mutations
    }

    pub fn connectivity(&self) -> &ConnectivitySignal {
        &self.connectivity
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn stats(&self) -> CoreStats {
        CoreStats {
            online: self.connectivity.is_online(),
            shutdown: self.shutdown.state(),
            coordinator: self.coordinator.stats(),
            prefetch: self.prefetcher.stats(),
            mutation: self.mutations.stats(),
        }
    }

    pub fn health(&self) -> HealthReport {
        self.health.report(&self.stats())
    }

    /// Shut down with the configured timeout.
    pub async fn shutdown_gracefully(&self) -> ShutdownResult {
        self.shutdown(self.config.shutdown_timeout).await
    }

    /// Stop background tasks, wait for in-flight updates, persist the
    /// offline queue and access history, then stop the scheduler.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        self.background.cancel();
        let result = self.mutations.shutdown(timeout).await;

        if let Err(e) = self.prefetcher.save_history().await {
            tracing::error!(error = %e, "failed to persist access history");
        }
        self.coordinator.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "background task ended abnormally");
                }
            }
        }
        tracing::info!(?result, "core stopped");
        result
    }
}
