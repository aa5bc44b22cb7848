//! Schedulable task type.

use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use super::error::SchedulerError;
use super::priority::Priority;

/// Channel delivering a task's terminal result back to its caller.
pub type ResultTx<R> = oneshot::Sender<Result<R, SchedulerError>>;
/// Receiver half awaited by `TaskScheduler::execute`.
pub type ResultRx<R> = oneshot::Receiver<Result<R, SchedulerError>>;

/// Per-call scheduling options. `None` fields take the scheduler defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

impl TaskOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self { priority, ..Default::default() }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// A unit of work owned by the scheduler from enqueue to settlement.
pub struct Task<P, R> {
    pub id: u64,
    pub payload: P,
    pub priority: Priority,
    pub timeout: Duration,
    pub retries_remaining: u32,
    pub attempt: u32,
    pub created_at: Instant,
    result_tx: Option<ResultTx<R>>,
}

impl<P, R> std::fmt::Debug for Task<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("timeout_ms", &self.timeout.as_millis())
            .field("retries_remaining", &self.retries_remaining)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl<P, R> Task<P, R> {
    pub fn new(
        id: u64,
        payload: P,
        priority: Priority,
        timeout: Duration,
        retries: u32,
        result_tx: ResultTx<R>,
    ) -> Self {
        Self {
            id,
            payload,
            priority,
            timeout,
            retries_remaining: retries,
            attempt: 0,
            created_at: Instant::now(),
            result_tx: Some(result_tx),
        }
    }

    /// Consume one retry. Returns false when the budget is exhausted.
    pub fn take_retry(&mut self) -> bool {
        if self.retries_remaining == 0 {
            return false;
        }
        self.retries_remaining -= 1;
        true
    }

    /// Whether the caller is still waiting for this task.
    pub fn has_waiter(&self) -> bool {
        self.result_tx.as_ref().map_or(false, |tx| !tx.is_closed())
    }

    /// Deliver the terminal result. A dropped receiver is a no-op.
    pub fn settle(mut self, result: Result<R, SchedulerError>) {
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(result);
        }
    }
}
