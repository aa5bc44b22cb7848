//! Bounded worker pool with priority dispatch, timeouts and retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use super::error::SchedulerError;
use super::priority::PriorityQueue;
use super::task::{ResultRx, Task, TaskOptions};
use super::worker::{spawn_worker, CompletionSink, Executor, Job};
use crate::telemetry;

/// Configuration for the task scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of workers (0 = one per CPU).
    pub pool_size: usize,
    /// Queued tasks beyond this bound are rejected with `QueueFull`.
    pub max_pending: usize,
    /// Timeout applied when a call does not set one.
    #[serde(with = "crate::config::duration_ms")]
    pub default_timeout: Duration,
    /// Retry budget applied when a call does not set one.
    pub default_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 0,
            max_pending: 256,
            default_timeout: Duration::from_secs(30),
            default_retries: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(count: usize) -> Self {
        Self { pool_size: count.max(1), ..Default::default() }
    }

    /// Worker count after resolving `0` to the CPU count.
    pub fn effective_pool_size(&self) -> usize {
        if self.pool_size == 0 {
            num_cpus::get().max(1)
        } else {
            self.pool_size
        }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub pool_size: usize,
    pub idle: usize,
    pub busy: usize,
    pub queue_depth: usize,
    pub queued_high: usize,
    pub queued_normal: usize,
    pub queued_low: usize,
    pub completed_per_worker: Vec<u64>,
    pub succeeded: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub rejected: u64,
    pub workers_recycled: u64,
}

struct Running<P, R> {
    task: Task<P, R>,
    started: Instant,
    timer: AbortHandle,
}

struct Slot<P, R> {
    generation: u64,
    tx: mpsc::UnboundedSender<Job<P>>,
    handle: JoinHandle<()>,
    running: Option<Running<P, R>>,
    completed: u64,
}

#[derive(Default)]
struct Counters {
    succeeded: u64,
    failed: u64,
    timeouts: u64,
    retries: u64,
    rejected: u64,
    recycled: u64,
}

struct State<P, R> {
    queue: PriorityQueue<Task<P, R>>,
    slots: Vec<Slot<P, R>>,
    counters: Counters,
    closed: bool,
}

struct Shared<P: Send + 'static, R: Send + 'static> {
    me: Weak<Shared<P, R>>,
    config: SchedulerConfig,
    executor: Arc<dyn Executor<P, R>>,
    state: Mutex<State<P, R>>,
    next_id: AtomicU64,
}

/// Fixed-size worker pool accepting prioritized tasks.
///
/// All bookkeeping lives behind one mutex; workers only touch it when
/// reporting a result. Must be created inside a Tokio runtime.
pub struct TaskScheduler<P: Send + 'static, R: Send + 'static> {
    shared: Arc<Shared<P, R>>,
}

impl<P: Send + 'static, R: Send + 'static> Clone for TaskScheduler<P, R> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<P, R> TaskScheduler<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    pub fn new(config: SchedulerConfig, executor: Arc<dyn Executor<P, R>>) -> Self {
        let pool_size = config.effective_pool_size();
        let shared = Arc::new_cyclic(|me: &Weak<Shared<P, R>>| {
            let slots = (0..pool_size)
                .map(|idx| {
                    let sink: Weak<dyn CompletionSink<R>> = me.clone();
                    let (tx, handle) = spawn_worker(idx, 0, Arc::clone(&executor), sink);
                    Slot { generation: 0, tx, handle, running: None, completed: 0 }
                })
                .collect();
            Shared {
                me: me.clone(),
                config,
                executor,
                state: Mutex::new(State {
                    queue: PriorityQueue::new(),
                    slots,
                    counters: Counters::default(),
                    closed: false,
                }),
                next_id: AtomicU64::new(1),
            }
        });
        tracing::info!(pool_size, "task scheduler started");
        Self { shared }
    }

    /// Run `payload` on the pool and wait for its terminal result.
    pub async fn execute(&self, payload: P, options: TaskOptions) -> Result<R, SchedulerError> {
        let rx = self.submit(payload, options)?;
        rx.await.unwrap_or(Err(SchedulerError::Shutdown))
    }

    /// Enqueue without waiting. Fails fast with `QueueFull` under backpressure.
    pub fn submit(&self, payload: P, options: TaskOptions) -> Result<ResultRx<R>, SchedulerError> {
        self.shared.submit(payload, options)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    pub fn pool_size(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Reject queued and running tasks with `Shutdown` and stop all workers.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl<P, R> Shared<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    fn submit(&self, payload: P, options: TaskOptions) -> Result<ResultRx<R>, SchedulerError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SchedulerError::Shutdown);
        }
        let depth = state.queue.len();
        if depth >= self.config.max_pending {
            state.counters.rejected += 1;
            telemetry::record_queue_rejection();
            return Err(SchedulerError::QueueFull { depth, max: self.config.max_pending });
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let retries = options.retries.unwrap_or(self.config.default_retries);
        let task = Task::new(id, payload, options.priority, timeout, retries, tx);
        tracing::debug!(task_id = id, priority = %options.priority, "task enqueued");
        state.queue.push(task, options.priority);

        self.pump(&mut state);
        Ok(rx)
    }

    /// Hand queued tasks to idle workers until one side runs out.
    fn pump(&self, state: &mut State<P, R>) {
        while !state.queue.is_empty() {
            let Some(idx) = state.slots.iter().position(|s| s.running.is_none()) else {
                break;
            };
            let Some(task) = state.queue.pop() else {
                break;
            };
            if !task.has_waiter() {
                tracing::debug!(task_id = task.id, "dropping task with no waiter");
                continue;
            }
            self.dispatch(state, idx, task);
        }
        telemetry::record_queue_depth(state.queue.len());
    }

    fn dispatch(&self, state: &mut State<P, R>, idx: usize, mut task: Task<P, R>) {
        task.attempt += 1;
        let job = Job { task_id: task.id, payload: task.payload.clone() };
        if let Err(mpsc::error::SendError(job)) = state.slots[idx].tx.send(job) {
            // Worker died (executor panicked); replace it and retry the handoff.
            tracing::warn!(slot = idx, "worker channel closed, replacing worker");
            self.replace_worker(state, idx);
            let _ = state.slots[idx].tx.send(job);
        }

        let slot = &mut state.slots[idx];
        let timer = self.arm_timeout(idx, slot.generation, task.id, task.timeout);
        tracing::debug!(
            task_id = task.id,
            slot = idx,
            attempt = task.attempt,
            priority = %task.priority,
            "task dispatched"
        );
        slot.running = Some(Running { task, started: Instant::now(), timer });
    }

    fn arm_timeout(&self, idx: usize, generation: u64, task_id: u64, timeout: Duration) -> AbortHandle {
        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = me.upgrade() {
                shared.on_timeout(idx, generation, task_id);
            }
        })
        .abort_handle()
    }

    fn on_timeout(&self, idx: usize, generation: u64, task_id: u64) {
        let mut state = self.state.lock();
        let Some(running) = take_running(&mut state.slots[idx], generation, task_id) else {
            return;
        };
        let timeout_ms = running.task.timeout.as_millis() as u64;
        tracing::warn!(task_id, slot = idx, timeout_ms, "task timed out, recycling worker");

        self.replace_worker(&mut state, idx);
        state.counters.timeouts += 1;
        telemetry::record_task_timeout();

        self.fail(&mut state, running.task, SchedulerError::Timeout { task_id, timeout_ms });
        self.pump(&mut state);
    }

    /// Abort the worker in `idx` and install a fresh one in the same slot.
    fn replace_worker(&self, state: &mut State<P, R>, idx: usize) {
        let slot = &mut state.slots[idx];
        slot.handle.abort();
        slot.generation += 1;
        let sink: Weak<dyn CompletionSink<R>> = self.me.clone();
        let (tx, handle) = spawn_worker(idx, slot.generation, Arc::clone(&self.executor), sink);
        slot.tx = tx;
        slot.handle = handle;
        state.counters.recycled += 1;
        telemetry::record_worker_recycled();
    }

    /// Retry a failed task if its budget allows, otherwise settle it.
    fn fail(&self, state: &mut State<P, R>, mut task: Task<P, R>, error: SchedulerError) {
        if error.is_retryable() && task.take_retry() {
            state.counters.retries += 1;
            telemetry::record_task_retry();
            tracing::debug!(
                task_id = task.id,
                retries_remaining = task.retries_remaining,
                error = %error,
                "task requeued"
            );
            let priority = task.priority;
            state.queue.push(task, priority);
            return;
        }
        state.counters.failed += 1;
        telemetry::record_task_failure(&error);
        tracing::debug!(task_id = task.id, error = %error, "task failed");
        task.settle(Err(error));
    }

    fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        let busy = state.slots.iter().filter(|s| s.running.is_some()).count();
        let (queued_high, queued_normal, queued_low) = state.queue.depth_by_priority();
        SchedulerStats {
            pool_size: state.slots.len(),
            idle: state.slots.len() - busy,
            busy,
            queue_depth: state.queue.len(),
            queued_high,
            queued_normal,
            queued_low,
            completed_per_worker: state.slots.iter().map(|s| s.completed).collect(),
            succeeded: state.counters.succeeded,
            failed: state.counters.failed,
            timeouts: state.counters.timeouts,
            retries: state.counters.retries,
            rejected: state.counters.rejected,
            workers_recycled: state.counters.recycled,
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for task in state.queue.drain_ordered() {
            task.settle(Err(SchedulerError::Shutdown));
        }
        for slot in state.slots.iter_mut() {
            slot.handle.abort();
            if let Some(running) = slot.running.take() {
                running.timer.abort();
                running.task.settle(Err(SchedulerError::Shutdown));
            }
        }
        tracing::info!("task scheduler shut down");
    }
}

impl<P, R> CompletionSink<R> for Shared<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    fn complete(&self, idx: usize, generation: u64, task_id: u64, result: Result<R, String>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let Some(running) = take_running(&mut state.slots[idx], generation, task_id) else {
            // Late result from a recycled worker.
            return;
        };
        running.timer.abort();
        state.slots[idx].completed += 1;
        let latency = running.started.elapsed();

        match result {
            Ok(value) => {
                state.counters.succeeded += 1;
                telemetry::record_task_success(running.task.priority, latency);
                tracing::debug!(task_id, slot = idx, latency_ms = latency.as_millis() as u64, "task succeeded");
                running.task.settle(Ok(value));
            }
            Err(message) => {
                self.fail(&mut state, running.task, SchedulerError::Worker { task_id, message });
            }
        }
        self.pump(&mut state);
    }
}

impl<P: Send + 'static, R: Send + 'static> Drop for Shared<P, R> {
    fn drop(&mut self) {
        for slot in self.state.get_mut().slots.iter_mut() {
            slot.handle.abort();
            if let Some(running) = slot.running.as_ref() {
                running.timer.abort();
            }
        }
    }
}

/// Take the running task from `slot` if it is still the one identified by
/// `generation` and `task_id`.
fn take_running<P, R>(slot: &mut Slot<P, R>, generation: u64, task_id: u64) -> Option<Running<P, R>> {
    if slot.generation != generation {
        return None;
    }
    match &slot.running {
        Some(running) if running.task.id == task_id => slot.running.take(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
