//! Optimistic updates with rollback, undo/redo and offline replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::conflict::{Conflict, ConflictPolicy, ConflictResolution};
use super::error::MutationError;
use super::events::{EventBus, Listener, MutationEvent, SubscriptionId};
use super::history::HistoryStack;
use super::offline::{OfflineQueue, PersistedMutation, QueuedMutation};
use super::record::{MutationRecord, MutationStatus};
use super::remote::{RemoteEffect, RemoteExecutor};
use super::request::{ApplyFn, MutationOutcome, MutationRequest, RollbackFn};
use crate::clock::{elapsed_between, Clock, SystemClock};
use crate::connectivity::ConnectivitySignal;
use crate::persistence::{load_json, save_json, Persistence};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult};
use crate::telemetry::{self, MutationSpan, SpanExt};

/// Configuration for the mutation manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Remote-effect retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit. Attempt `n` waits `retry_delay * n` before retrying.
    #[serde(with = "crate::config::duration_ms")]
    pub retry_delay: Duration,
    /// Depth of the undo and redo stacks.
    pub undo_capacity: usize,
    /// Defer remote effects while offline instead of attempting them.
    pub offline_queue_enabled: bool,
    /// How long settled records stay queryable.
    #[serde(with = "crate::config::duration_ms")]
    pub terminal_grace: Duration,
    /// Persistence key for the offline queue.
    pub offline_queue_key: String,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            undo_capacity: 50,
            offline_queue_enabled: true,
            terminal_grace: Duration::from_secs(30),
            offline_queue_key: "presage.offline_queue".to_string(),
        }
    }
}

/// Point-in-time mutation statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationStats {
    pub updates: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub conflicts: u64,
    pub aborted: u64,
    pub retries: u64,
    pub queued: u64,
    pub replayed: u64,
    pub replay_failures: u64,
    pub undos: u64,
    pub redos: u64,
    /// Records still holding their entity.
    pub open: usize,
    /// Records indexed, including settled ones inside the grace period.
    pub tracked: usize,
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub offline_queue: usize,
    pub in_flight: u32,
}

/// Result of one pass over the offline queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub replayed: usize,
    pub failed: usize,
    /// Entries left in the queue afterwards.
    pub remaining: usize,
}

#[derive(Default)]
struct Counters {
    updates: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    conflicts: AtomicU64,
    aborted: AtomicU64,
    retries: AtomicU64,
    queued: AtomicU64,
    replayed: AtomicU64,
    replay_failures: AtomicU64,
    undos: AtomicU64,
    redos: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Entry {
    record: MutationRecord,
    /// `None` for mutations restored from persistence.
    apply: Option<ApplyFn>,
    rollback: Option<RollbackFn>,
    settled_at: Option<DateTime<Utc>>,
    /// Insertion order, for records created at the same instant.
    seq: u64,
}

/// A committed mutation that can be undone or redone.
struct UndoEntry {
    id: String,
    entity: String,
    snapshot: Value,
    apply: ApplyFn,
    rollback: Option<RollbackFn>,
}

struct State {
    records: HashMap<String, Entry>,
    undo: HistoryStack<UndoEntry>,
    redo: HistoryStack<UndoEntry>,
    offline: OfflineQueue,
    next_seq: u64,
}

struct Inner {
    config: MutationConfig,
    executor: Arc<dyn RemoteExecutor>,
    policy: Arc<dyn ConflictPolicy>,
    connectivity: ConnectivitySignal,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
    events: Arc<EventBus>,
    shutdown: Arc<ShutdownCoordinator>,
    state: Mutex<State>,
    counters: Counters,
    draining: AtomicBool,
}

/// Applies local changes immediately and reconciles them with the server.
///
/// Each `update()` runs `apply` synchronously, then delivers the remote
/// effect. A terminal remote failure reverts the local change through the
/// caller's rollback before the error is returned.
#[derive(Clone)]
pub struct OptimisticMutationManager {
    inner: Arc<Inner>,
}

/// Builder for [`OptimisticMutationManager`].
pub struct OptimisticMutationManagerBuilder {
    executor: Arc<dyn RemoteExecutor>,
    policy: Arc<dyn ConflictPolicy>,
    config: MutationConfig,
    connectivity: ConnectivitySignal,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
    shutdown: Option<Arc<ShutdownCoordinator>>,
}

impl OptimisticMutationManagerBuilder {
    pub fn config(mut self, config: MutationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connectivity(mut self, signal: ConnectivitySignal) -> Self {
        self.connectivity = signal;
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

    /// Share a shutdown coordinator with the host.
    pub fn shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> OptimisticMutationManager {
        let capacity = self.config.undo_capacity;
        OptimisticMutationManager {
            inner: Arc::new(Inner {
                executor: self.executor,
                policy: self.policy,
                connectivity: self.connectivity,
                clock: self.clock,
                persistence: self.persistence,
                events: Arc::new(EventBus::new()),
                shutdown: self.shutdown.unwrap_or_default(),
                state: Mutex::new(State {
                    records: HashMap::new(),
                    undo: HistoryStack::new(capacity),
                    redo: HistoryStack::new(capacity),
                    offline: OfflineQueue::new(),
                    next_seq: 0,
                }),
                counters: Counters::default(),
                draining: AtomicBool::new(false),
                config: self.config,
            }),
        }
    }
}

impl OptimisticMutationManager {
    /// The conflict policy has no default; callers decide between
    /// [`ProceedOnConflict`](super::ProceedOnConflict),
    /// [`AbortOnConflict`](super::AbortOnConflict) or their own.
    pub fn builder(
        executor: Arc<dyn RemoteExecutor>,
        policy: Arc<dyn ConflictPolicy>,
    ) -> OptimisticMutationManagerBuilder {
        OptimisticMutationManagerBuilder {
            executor,
            policy,
            config: MutationConfig::default(),
            connectivity: ConnectivitySignal::default(),
            clock: Arc::new(SystemClock),
            persistence: None,
            shutdown: None,
        }
    }

    /// Apply a mutation locally and deliver its remote effect.
    ///
    /// Resolves with `Committed` on remote success or `Queued` when deferred
    /// offline. Rejects with `RolledBack` after the local change has been
    /// reverted, or with `Conflict` when the policy aborts.
    pub async fn update(&self, request: MutationRequest) -> Result<MutationOutcome, MutationError> {
        let _guard = self.inner.shutdown.track().ok_or(MutationError::ShuttingDown)?;
        let started = Instant::now();
        let id = request.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = MutationSpan::new(&id, &request.entity);
        let result = Arc::clone(&self.inner).update(id, request).instrument(span.clone()).await;
        span.record_result(&result, started);
        result
    }

    /// Revert the most recent committed mutation. Local only.
    pub fn undo(&self) -> Result<String, MutationError> {
        self.inner.undo()
    }

    /// Re-apply the most recently undone mutation. Local only.
    pub fn redo(&self) -> Result<String, MutationError> {
        self.inner.redo()
    }

    pub fn can_undo(&self) -> bool {
        !self.inner.state.lock().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.inner.state.lock().redo.is_empty()
    }

    /// Whether `id` was undone and sits on the redo stack. Its record keeps
    /// the `Committed` status either way.
    pub fn is_undone(&self, id: &str) -> bool {
        self.inner.state.lock().redo.iter().any(|e| e.id == id)
    }

    /// Replay queued mutations once, in submission order.
    pub async fn drain_offline_queue(&self) -> DrainReport {
        self.inner.drain().await
    }

    /// Drain the offline queue whenever connectivity comes back.
    ///
    /// The starting state is read before the task is spawned, so a
    /// disconnect and reconnect that happen before its first poll still
    /// produce a change notification.
    pub fn spawn_connectivity_watcher(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let mut rx = self.inner.connectivity.subscribe();
        let mut online = *rx.borrow_and_update();
        tokio::spawn(async move {
            if online && manager.offline_queue_len() > 0 {
                manager.drain_offline_queue().await;
            }
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_online = *rx.borrow_and_update();
                        // Watch values coalesce, so an offline blip can be
                        // missed entirely; a non-empty queue is enough.
                        if now_online && (!online || manager.offline_queue_len() > 0) {
                            tracing::info!(
                                queued = manager.offline_queue_len(),
                                "connectivity restored, replaying offline queue"
                            );
                            manager.drain_offline_queue().await;
                        } else if !now_online && online {
                            tracing::info!("connectivity lost");
                        }
                        online = now_online;
                    }
                }
            }
            tracing::debug!("connectivity watcher stopped");
        })
    }

    /// Save the offline queue. A no-op without persistence.
    pub async fn persist_offline_queue(&self) -> Result<usize, MutationError> {
        self.inner.persist_queue().await
    }

    /// Load a persisted offline queue as replay-only mutations.
    ///
    /// Restored entries have no local apply or rollback; they only carry the
    /// remote effect. Returns how many entries were added.
    pub async fn restore_offline_queue(&self) -> Result<usize, MutationError> {
        let Some(store) = &self.inner.persistence else {
            return Ok(0);
        };
        let key = &self.inner.config.offline_queue_key;
        let Some(stored) = load_json::<Vec<PersistedMutation>>(store.as_ref(), key).await? else {
            return Ok(0);
        };

        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        let mut restored = 0;
        for persisted in stored {
            if state.records.contains_key(&persisted.id) || state.offline.contains(&persisted.id) {
                continue;
            }
            let mut record = MutationRecord::new(
                persisted.id.clone(),
                persisted.entity.clone(),
                Value::Null,
                persisted.queued_at,
            );
            record.transition(MutationStatus::Applied, now);
            record.offline = true;
            record.retry_count = persisted.attempts;
            state.next_seq += 1;
            let seq = state.next_seq;
            state.records.insert(
                persisted.id.clone(),
                Entry { record, apply: None, rollback: None, settled_at: None, seq },
            );
            state.offline.push_back(QueuedMutation::from_persisted(persisted));
            restored += 1;
        }
        telemetry::record_offline_queue_len(state.offline.len());
        tracing::info!(restored, queued = state.offline.len(), "offline queue restored");
        Ok(restored)
    }

    /// Look up a record. Settled records stay visible for the grace period.
    pub fn record(&self, id: &str) -> Option<MutationRecord> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        self.inner.prune_settled(&mut state, now);
        state.records.get(id).map(|e| e.record.clone())
    }

    pub fn offline_queue_len(&self) -> usize {
        self.inner.state.lock().offline.len()
    }

    /// Ids waiting for replay, oldest first.
    pub fn offline_queue_ids(&self) -> Vec<String> {
        self.inner.state.lock().offline.ids()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        self.inner.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn connectivity(&self) -> &ConnectivitySignal {
        &self.inner.connectivity
    }

    pub fn config(&self) -> &MutationConfig {
        &self.inner.config
    }

    pub fn in_flight(&self) -> u32 {
        self.inner.shutdown.in_flight_count()
    }

    pub fn stats(&self) -> MutationStats {
        let c = &self.inner.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let state = self.inner.state.lock();
        MutationStats {
            updates: load(&c.updates),
            committed: load(&c.committed),
            rolled_back: load(&c.rolled_back),
            conflicts: load(&c.conflicts),
            aborted: load(&c.aborted),
            retries: load(&c.retries),
            queued: load(&c.queued),
            replayed: load(&c.replayed),
            replay_failures: load(&c.replay_failures),
            undos: load(&c.undos),
            redos: load(&c.redos),
            open: state.records.values().filter(|e| e.record.status.is_open()).count(),
            tracked: state.records.len(),
            undo_depth: state.undo.len(),
            redo_depth: state.redo.len(),
            offline_queue: state.offline.len(),
            in_flight: self.inner.shutdown.in_flight_count(),
        }
    }

    /// Stop admitting updates, wait for in-flight ones, then persist the
    /// offline queue.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        let result = self.inner.shutdown.initiate(timeout).await;
        if let Err(e) = self.inner.persist_queue().await {
            tracing::error!(error = %e, "failed to persist offline queue on shutdown");
        }
        result
    }
}

impl Inner {
    async fn update(
        self: Arc<Self>,
        id: String,
        request: MutationRequest,
    ) -> Result<MutationOutcome, MutationError> {
        let MutationRequest { entity, apply, remote, rollback, snapshot, .. } = request;
        bump(&self.counters.updates);

        // The record goes into the index in the same critical section as the
        // conflict check, so a concurrent update on the entity sees it.
        let conflicting = self.reserve(&id, &entity, &apply, rollback)?;

        if let Some(conflicting_id) = conflicting {
            bump(&self.counters.conflicts);
            telemetry::record_mutation("conflict");
            tracing::warn!(entity = %entity, conflicting_id = %conflicting_id, "mutation conflict");
            self.events.emit(&MutationEvent::Conflict {
                id: id.clone(),
                entity: entity.clone(),
                conflicting_id: conflicting_id.clone(),
            });
            let conflict = Conflict { id: id.clone(), entity: entity.clone(), conflicting_id };
            if self.policy.resolve(&conflict) == ConflictResolution::Abort {
                self.state.lock().records.remove(&id);
                bump(&self.counters.aborted);
                return Err(MutationError::Conflict {
                    entity,
                    conflicting_id: conflict.conflicting_id,
                });
            }
        }

        let snapshot = match snapshot {
            Some(capture) => capture(),
            None => json!({ "mutation": id, "entity": entity }),
        };
        if let Some(entry) = self.state.lock().records.get_mut(&id) {
            entry.record.snapshot = snapshot;
        }

        // Runs outside the lock; it may read manager state.
        apply();
        self.transition(&id, MutationStatus::Applied);
        tracing::debug!("applied locally");

        if self.should_queue() {
            return Ok(self.enqueue_offline(&id, &entity, remote).await);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match remote.run(self.executor.as_ref()).await {
                Ok(value) => {
                    self.commit(&id, &entity);
                    return Ok(MutationOutcome::Committed { id, value });
                }
                Err(error) => {
                    self.fail(&id, &error);
                    if attempt > self.config.max_retries {
                        return Err(self.roll_back(&id, &entity, error));
                    }
                    bump(&self.counters.retries);
                    self.transition(&id, MutationStatus::Pending);
                    let delay = self.config.retry_delay * attempt;
                    tracing::warn!(attempt, ?delay, error = %error, "remote effect failed, retrying");
                    tokio::time::sleep(delay).await;

                    // The local change is still in place; only the remote
                    // effect is retried.
                    self.transition(&id, MutationStatus::Applied);
                    if self.should_queue() {
                        return Ok(self.enqueue_offline(&id, &entity, remote).await);
                    }
                }
            }
        }
    }

    /// Index a `Pending` record for `id` and return the oldest other open
    /// mutation on `entity`, if any. Rejects an id that is still open.
    fn reserve(
        &self,
        id: &str,
        entity: &str,
        apply: &ApplyFn,
        rollback: Option<RollbackFn>,
    ) -> Result<Option<String>, MutationError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.prune_settled(&mut state, now);
        if state.records.get(id).is_some_and(|e| e.record.status.is_open()) {
            return Err(MutationError::DuplicateId { id: id.to_string() });
        }
        let conflicting = state
            .records
            .values()
            .filter(|e| e.record.entity == entity && e.record.status.is_open())
            .min_by_key(|e| (e.record.created_at, e.seq))
            .map(|e| e.record.id.clone());
        state.next_seq += 1;
        let seq = state.next_seq;
        state.records.insert(
            id.to_string(),
            Entry {
                record: MutationRecord::new(id.to_string(), entity.to_string(), Value::Null, now),
                apply: Some(Arc::clone(apply)),
                rollback,
                settled_at: None,
                seq,
            },
        );
        Ok(conflicting)
    }

    fn should_queue(&self) -> bool {
        self.config.offline_queue_enabled && !self.connectivity.is_online()
    }

    fn transition(&self, id: &str, next: MutationStatus) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(entry) = state.records.get_mut(id) {
            if entry.record.transition(next, now) && next.is_terminal() {
                entry.settled_at = Some(now);
            }
        }
    }

    fn fail(&self, id: &str, error: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(entry) = state.records.get_mut(id) {
            entry.record.transition(MutationStatus::Failed, now);
            entry.record.retry_count += 1;
            entry.record.last_error = Some(error.to_string());
        }
    }

    async fn enqueue_offline(&self, id: &str, entity: &str, remote: RemoteEffect) -> MutationOutcome {
        let len = {
            let mut state = self.state.lock();
            if let Some(entry) = state.records.get_mut(id) {
                entry.record.offline = true;
            }
            state.offline.push_back(QueuedMutation {
                id: id.to_string(),
                entity: entity.to_string(),
                remote,
                queued_at: self.clock.now(),
                attempts: 0,
            });
            state.offline.len()
        };
        bump(&self.counters.queued);
        telemetry::record_mutation("queued");
        telemetry::record_offline_queue_len(len);
        tracing::info!(queue_len = len, "offline, remote effect queued");

        if let Err(e) = self.persist_queue().await {
            tracing::warn!(error = %e, "failed to persist offline queue");
        }
        self.events.emit(&MutationEvent::Queued { id: id.to_string(), entity: entity.to_string() });
        MutationOutcome::Queued { id: id.to_string(), offline: true }
    }

    /// Mark committed and make it undoable. Clears the redo stack.
    fn commit(&self, id: &str, entity: &str) {
        let now = self.clock.now();
        {
            let mut state = self.state.lock();
            let undo = state.records.get_mut(id).and_then(|entry| {
                if entry.record.transition(MutationStatus::Committed, now) {
                    entry.settled_at = Some(now);
                }
                entry.apply.clone().map(|apply| UndoEntry {
                    id: id.to_string(),
                    entity: entity.to_string(),
                    snapshot: entry.record.snapshot.clone(),
                    apply,
                    rollback: entry.rollback.clone(),
                })
            });
            if let Some(undo) = undo {
                if let Some(evicted) = state.undo.push(undo) {
                    tracing::debug!(evicted = %evicted.id, "undo history full, oldest dropped");
                }
                state.redo.clear();
            }
        }
        bump(&self.counters.committed);
        telemetry::record_mutation("committed");
        tracing::info!(mutation_id = %id, entity, "mutation committed");
        self.events.emit(&MutationEvent::Success { id: id.to_string(), entity: entity.to_string() });
    }

    fn roll_back(&self, id: &str, entity: &str, error: String) -> MutationError {
        let restore = {
            let state = self.state.lock();
            state
                .records
                .get(id)
                .map(|e| (e.rollback.clone(), e.record.snapshot.clone()))
        };
        match restore {
            Some((Some(rollback), snapshot)) => rollback(&snapshot),
            _ => tracing::warn!(mutation_id = %id, "no rollback supplied, local change kept"),
        }
        self.transition(id, MutationStatus::RolledBack);

        bump(&self.counters.rolled_back);
        telemetry::record_mutation("rolled_back");
        tracing::error!(mutation_id = %id, entity, error = %error, "mutation rolled back");
        self.events.emit(&MutationEvent::Failure {
            id: id.to_string(),
            entity: entity.to_string(),
            error: error.clone(),
        });
        self.events.emit(&MutationEvent::Rollback { id: id.to_string(), entity: entity.to_string() });
        MutationError::RolledBack { id: id.to_string(), reason: error }
    }

    fn undo(&self) -> Result<String, MutationError> {
        let entry = self.state.lock().undo.pop().ok_or(MutationError::NothingToUndo)?;
        let Some(rollback) = entry.rollback.clone() else {
            tracing::warn!(mutation_id = %entry.id, "mutation has no rollback, dropped from undo history");
            return Err(MutationError::NotReversible { id: entry.id });
        };
        rollback(&entry.snapshot);

        let (id, entity) = (entry.id.clone(), entry.entity.clone());
        self.state.lock().redo.push(entry);
        bump(&self.counters.undos);
        tracing::info!(mutation_id = %id, "mutation undone");
        self.events.emit(&MutationEvent::Undo { id: id.clone(), entity });
        Ok(id)
    }

    fn redo(&self) -> Result<String, MutationError> {
        let entry = self.state.lock().redo.pop().ok_or(MutationError::NothingToRedo)?;
        (entry.apply)();

        let (id, entity) = (entry.id.clone(), entry.entity.clone());
        self.state.lock().undo.push(entry);
        bump(&self.counters.redos);
        tracing::info!(mutation_id = %id, "mutation redone");
        self.events.emit(&MutationEvent::Redo { id: id.clone(), entity });
        Ok(id)
    }

    async fn drain(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::AcqRel) {
            tracing::debug!("offline queue drain already running");
            return DrainReport { remaining: self.state.lock().offline.len(), ..DrainReport::default() };
        }
        let _reset = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        // One pass: entries requeued during this pass wait for the next one.
        let pass = self.state.lock().offline.len();
        for _ in 0..pass {
            if !self.connectivity.is_online() {
                tracing::info!("connectivity lost during replay");
                break;
            }
            let Some(mut queued) = self.state.lock().offline.pop_front() else {
                break;
            };
            match queued.remote.run(self.executor.as_ref()).await {
                Ok(_) => {
                    report.replayed += 1;
                    bump(&self.counters.replayed);
                    telemetry::record_mutation("replayed");
                    tracing::info!(mutation_id = %queued.id, "queued mutation replayed");
                    self.events.emit(&MutationEvent::Replayed {
                        id: queued.id.clone(),
                        entity: queued.entity.clone(),
                    });
                    self.commit(&queued.id, &queued.entity);
                }
                Err(error) => {
                    report.failed += 1;
                    queued.attempts += 1;
                    bump(&self.counters.replay_failures);
                    tracing::warn!(
                        mutation_id = %queued.id,
                        attempts = queued.attempts,
                        error = %error,
                        "replay failed, requeued at tail"
                    );
                    let event = MutationEvent::Failure {
                        id: queued.id.clone(),
                        entity: queued.entity.clone(),
                        error: error.clone(),
                    };
                    {
                        let mut state = self.state.lock();
                        if let Some(entry) = state.records.get_mut(&queued.id) {
                            entry.record.retry_count += 1;
                            entry.record.last_error = Some(error);
                        }
                        state.offline.push_back(queued);
                    }
                    self.events.emit(&event);
                }
            }
        }

        report.remaining = self.state.lock().offline.len();
        telemetry::record_offline_queue_len(report.remaining);
        if let Err(e) = self.persist_queue().await {
            tracing::warn!(error = %e, "failed to persist offline queue");
        }
        tracing::info!(
            replayed = report.replayed,
            failed = report.failed,
            remaining = report.remaining,
            "offline queue drained"
        );
        report
    }

    async fn persist_queue(&self) -> Result<usize, MutationError> {
        let Some(store) = &self.persistence else {
            return Ok(0);
        };
        let entries = self.state.lock().offline.persisted();
        save_json(store.as_ref(), &self.config.offline_queue_key, &entries).await?;
        Ok(entries.len())
    }

    fn prune_settled(&self, state: &mut State, now: DateTime<Utc>) {
        let grace = self.config.terminal_grace;
        state.records.retain(|_, e| match e.settled_at {
            Some(at) => !e.record.status.is_terminal() || elapsed_between(at, now) < grace,
            None => true,
        });
    }
}

/// Clears the draining flag even if the drain future is dropped.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
