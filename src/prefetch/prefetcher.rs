//! Speculative fetching driven by learned access patterns.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::history::{AccessContext, AccessEvent, AccessHistory};
use super::models::PatternModels;
use super::predictor::{predict, PredictParams, Prediction, SignalThresholds};
use crate::clock::{elapsed_between, Clock, SystemClock};
use crate::coordinator::{RequestCoordinator, RequestOptions};
use crate::persistence::{load_json, save_json, Persistence, PersistenceError};
use crate::scheduler::Priority;
use crate::telemetry;

/// Maps a predicted resource to the request that fetches it.
pub trait ResourceResolver: Send + Sync {
    /// `(endpoint, params)` for `resource_id`, or `None` to skip it.
    fn resolve(&self, resource_id: &str) -> Option<(String, Value)>;
}

impl<F> ResourceResolver for F
where
    F: Fn(&str) -> Option<(String, Value)> + Send + Sync,
{
    fn resolve(&self, resource_id: &str) -> Option<(String, Value)> {
        self(resource_id)
    }
}

/// Configuration for the prefetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Access events kept in the ring buffer.
    pub history_capacity: usize,
    /// Preceding accesses counted as co-occurring with a new one.
    pub cooccurrence_window: usize,
    /// Predictions below this confidence are discarded.
    pub min_confidence: f64,
    pub max_predictions: usize,
    /// Prefetches in flight at once.
    pub max_concurrent: usize,
    /// How long a prefetched resource can still count as a hit.
    #[serde(with = "crate::config::duration_ms")]
    pub prefetched_ttl: Duration,
    pub thresholds: SignalThresholds,
    /// Persistence key for the access history.
    pub history_key: String,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            cooccurrence_window: 5,
            min_confidence: 0.3,
            max_predictions: 5,
            max_concurrent: 2,
            prefetched_ttl: Duration::from_secs(300),
            thresholds: SignalThresholds::default(),
            history_key: "presage.access_history".to_string(),
        }
    }
}

impl PrefetchConfig {
    fn predict_params(&self) -> PredictParams {
        PredictParams {
            min_confidence: self.min_confidence,
            max_predictions: self.max_predictions,
            thresholds: self.thresholds,
        }
    }
}

/// Point-in-time prefetcher statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefetchStats {
    pub history_len: usize,
    pub tracked_resources: usize,
    pub accesses: u64,
    pub predictions: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Accesses to a resource that had been prefetched.
    pub hits: u64,
    /// Accesses to a resource that had not been prefetched.
    pub misses: u64,
    /// Prefetched resources never accessed within the TTL.
    pub wasted: u64,
    pub queued: usize,
    pub in_flight: usize,
    /// `hits / (hits + misses)`.
    pub hit_rate: f64,
    /// `hits / (hits + wasted)`.
    pub precision: f64,
}

#[derive(Default)]
struct Counters {
    accesses: u64,
    predictions: u64,
    dispatched: u64,
    completed: u64,
    failed: u64,
    skipped: u64,
    hits: u64,
    misses: u64,
    wasted: u64,
}

struct State {
    history: AccessHistory,
    models: PatternModels,
    queue: VecDeque<String>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    prefetched: HashMap<String, DateTime<Utc>>,
    counters: Counters,
}

struct Inner {
    config: PrefetchConfig,
    coordinator: RequestCoordinator,
    resolver: Arc<dyn ResourceResolver>,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
    state: Mutex<State>,
}

/// Learns access patterns and warms the coordinator cache ahead of use.
///
/// Prefetches run at low priority through the coordinator, so they queue
/// behind every user-initiated request.
#[derive(Clone)]
pub struct PredictivePrefetcher {
    inner: Arc<Inner>,
}

/// Builder for [`PredictivePrefetcher`].
pub struct PredictivePrefetcherBuilder {
    coordinator: RequestCoordinator,
    resolver: Arc<dyn ResourceResolver>,
    config: PrefetchConfig,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn Persistence>>,
}

impl PredictivePrefetcherBuilder {
    pub fn config(mut self, config: PrefetchConfig) -> Self {
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

    pub fn build(self) -> PredictivePrefetcher {
        let state = State {
            history: AccessHistory::new(self.config.history_capacity),
            models: PatternModels::new(self.config.cooccurrence_window),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            prefetched: HashMap::new(),
            counters: Counters::default(),
        };
        PredictivePrefetcher {
            inner: Arc::new(Inner {
                config: self.config,
                coordinator: self.coordinator,
                resolver: self.resolver,
                clock: self.clock,
                persistence: self.persistence,
                state: Mutex::new(state),
            }),
        }
    }
}

impl PredictivePrefetcher {
    pub fn builder(
        coordinator: RequestCoordinator,
        resolver: Arc<dyn ResourceResolver>,
    ) -> PredictivePrefetcherBuilder {
        PredictivePrefetcherBuilder {
            coordinator,
            resolver,
            config: PrefetchConfig::default(),
            clock: Arc::new(SystemClock),
            persistence: None,
        }
    }

    /// Record an access and update the models incrementally.
    ///
    /// A hit is an access to a prefetched resource whose response is still
    /// in the coordinator cache. One that was prefetched but has since left
    /// the cache counts as a miss and a wasted prefetch.
    pub fn record_access(&self, resource_id: &str, context: &AccessContext) {
        let clock = &self.inner.clock;
        let (hour, day_of_week) = clock.local_hour_and_weekday();
        let event = AccessEvent {
            resource_id: resource_id.to_string(),
            timestamp: clock.now(),
            hour,
            day_of_week,
            context_directory: context.directory.clone(),
        };
        let cached = self.inner.is_cached(resource_id);

        let mut state = self.inner.state.lock();
        self.inner.expire_prefetched(&mut state, event.timestamp);
        state.counters.accesses += 1;
        let was_prefetched = state.prefetched.remove(resource_id).is_some();
        if was_prefetched && cached {
            state.counters.hits += 1;
            telemetry::record_prefetch("hit");
            tracing::debug!(resource_id, "prefetch hit");
        } else {
            if was_prefetched {
                state.counters.wasted += 1;
                telemetry::record_prefetch("wasted");
                tracing::debug!(resource_id, "prefetched response no longer cached");
            }
            state.counters.misses += 1;
            telemetry::record_prefetch("miss");
        }

        let State { history, models, .. } = &mut *state;
        models.record(history, event);
    }

    /// Ranked candidates to follow `resource_id`. Pure over current state.
    pub fn predict(&self, resource_id: &str, context: &AccessContext) -> Vec<Prediction> {
        let (hour, _) = self.inner.clock.local_hour_and_weekday();
        let mut state = self.inner.state.lock();
        state.counters.predictions += 1;
        predict(&state.models, resource_id, context, hour, &self.inner.config.predict_params())
    }

    /// Queue predictions for prefetching. Returns how many were newly queued.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn prefetch(&self, predictions: &[Prediction]) -> usize {
        let queued = {
            let mut state = self.inner.state.lock();
            let mut queued = 0;
            for p in predictions {
                let id = &p.resource_id;
                if state.queued.contains(id)
                    || state.in_flight.contains(id)
                    || state.prefetched.contains_key(id)
                {
                    continue;
                }
                state.queued.insert(id.clone());
                state.queue.push_back(id.clone());
                queued += 1;
            }
            queued
        };
        Inner::pump(&self.inner);
        queued
    }

    /// Record the access, predict what follows and prefetch it.
    pub fn on_access(&self, resource_id: &str, context: &AccessContext) -> Vec<Prediction> {
        self.record_access(resource_id, context);
        let predictions = self.predict(resource_id, context);
        if !predictions.is_empty() {
            let queued = self.prefetch(&predictions);
            tracing::debug!(resource_id, predicted = predictions.len(), queued, "prefetch scheduled");
        }
        predictions
    }

    /// Whether `resource_id` was prefetched and not yet accessed.
    pub fn is_prefetched(&self, resource_id: &str) -> bool {
        self.inner.state.lock().prefetched.contains_key(resource_id)
    }

    /// Forget history, models and pending prefetches. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.history.clear();
        state.models = PatternModels::new(self.inner.config.cooccurrence_window);
        state.queue.clear();
        state.queued.clear();
        state.prefetched.clear();
        tracing::info!("prefetch history cleared");
    }

    /// Persist the access history. No-op without a persistence backend.
    pub async fn save_history(&self) -> Result<usize, PersistenceError> {
        let Some(store) = &self.inner.persistence else {
            return Ok(0);
        };
        let events = self.inner.state.lock().history.to_vec();
        save_json(store.as_ref(), &self.inner.config.history_key, &events).await?;
        tracing::debug!(events = events.len(), "access history saved");
        Ok(events.len())
    }

    /// Load persisted history and rebuild the models from it.
    pub async fn load_history(&self) -> Result<usize, PersistenceError> {
        let Some(store) = &self.inner.persistence else {
            return Ok(0);
        };
        let key = &self.inner.config.history_key;
        let Some(events) = load_json::<Vec<AccessEvent>>(store.as_ref(), key).await? else {
            return Ok(0);
        };

        let mut state = self.inner.state.lock();
        state.history.replace(events);
        state.models =
            PatternModels::rebuild(self.inner.config.cooccurrence_window, state.history.iter());
        let loaded = state.history.len();
        tracing::info!(events = loaded, "access history loaded");
        Ok(loaded)
    }

    pub fn stats(&self) -> PrefetchStats {
        let state = self.inner.state.lock();
        let c = &state.counters;
        PrefetchStats {
            history_len: state.history.len(),
            tracked_resources: state.models.tracked_resources(),
            accesses: c.accesses,
            predictions: c.predictions,
            dispatched: c.dispatched,
            completed: c.completed,
            failed: c.failed,
            skipped: c.skipped,
            hits: c.hits,
            misses: c.misses,
            wasted: c.wasted,
            queued: state.queue.len(),
            in_flight: state.in_flight.len(),
            hit_rate: ratio(c.hits, c.hits + c.misses),
            precision: ratio(c.hits, c.hits + c.wasted),
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.inner.config
    }
}

impl Inner {
    /// Whether the request `resource_id` resolves to has a live cache entry.
    fn is_cached(&self, resource_id: &str) -> bool {
        self.resolver
            .resolve(resource_id)
            .is_some_and(|(endpoint, params)| self.coordinator.is_cached(&endpoint, &params))
    }

    /// Start queued prefetches until `max_concurrent` are in flight.
    fn pump(this: &Arc<Self>) {
        loop {
            let id = {
                let mut state = this.state.lock();
                if state.in_flight.len() >= this.config.max_concurrent.max(1) {
                    return;
                }
                let Some(id) = state.queue.pop_front() else {
                    return;
                };
                state.queued.remove(&id);
                state.in_flight.insert(id.clone());
                id
            };

            let Some((endpoint, params)) = this.resolver.resolve(&id) else {
                let mut state = this.state.lock();
                state.in_flight.remove(&id);
                state.counters.skipped += 1;
                continue;
            };

            this.state.lock().counters.dispatched += 1;
            telemetry::record_prefetch("dispatched");
            tracing::debug!(resource_id = %id, endpoint = %endpoint, "prefetch dispatched");

            let me = Arc::clone(this);
            tokio::spawn(async move {
                let options = RequestOptions::with_priority(Priority::Low).batched();
                let result = me.coordinator.request(&endpoint, params, options).await;
                me.finish(&id, result.map(|_| ()).map_err(|e| e.to_string()));
                Inner::pump(&me);
            });
        }
    }

    fn finish(&self, id: &str, result: Result<(), String>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.in_flight.remove(id);
        match result {
            Ok(()) => {
                state.counters.completed += 1;
                state.prefetched.insert(id.to_string(), now);
            }
            Err(error) => {
                state.counters.failed += 1;
                telemetry::record_prefetch("failed");
                tracing::debug!(resource_id = id, %error, "prefetch failed");
            }
        }
    }

    /// Drop prefetched entries older than the TTL, counting them as wasted.
    fn expire_prefetched(&self, state: &mut State, now: DateTime<Utc>) {
        let ttl = self.config.prefetched_ttl;
        let before = state.prefetched.len();
        state.prefetched.retain(|_, at| elapsed_between(*at, now) < ttl);
        let expired = before - state.prefetched.len();
        for _ in 0..expired {
            telemetry::record_prefetch("wasted");
        }
        state.counters.wasted += expired as u64;
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
#[path = "prefetcher_tests.rs"]
mod tests;
