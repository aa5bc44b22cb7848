//! Graceful shutdown for optimistic updates.
//!
//! Every `update()` holds a [`ShutdownGuard`] while its remote effect is in
//! flight. Shutdown stops admitting new updates and waits for the guards to
//! drop before the offline queue is persisted.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    #[default]
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ShutdownResult {
    Complete,
    /// The timeout elapsed with `remaining` updates still in flight.
    Timeout { remaining: u32 },
}

/// Tracks in-flight updates and the shutdown state machine.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Register an in-flight update. `None` once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        // Hold the read lock across the increment so `initiate` cannot
        // observe a zero count between the check and the add.
        let state = self.state.read();
        if *state != ShutdownState::Running {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(ShutdownGuard {
            counter: Arc::clone(&self.in_flight),
            notify: Arc::clone(&self.notify),
        })
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting updates and wait up to `timeout` for in-flight ones.
    /// Calling it again after the first call returns immediately.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        {
            let mut state = self.state.write();
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
            }
        }
        tracing::info!(in_flight = self.in_flight_count(), "draining in-flight updates");

        let result = self.wait_for_drain(timeout).await;
        *self.state.write() = ShutdownState::Stopped;

        match &result {
            ShutdownResult::Complete => tracing::info!("all updates settled"),
            ShutdownResult::Timeout { remaining } => {
                tracing::warn!(remaining, "shutdown timed out with updates in flight")
            }
        }
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before reading the count so a guard dropped
            // in between still wakes us.
            let notified = self.notify.notified();
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let count = self.in_flight_count();
                return if count == 0 {
                    ShutdownResult::Complete
                } else {
                    ShutdownResult::Timeout { remaining: count }
                };
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop.
#[derive(Debug)]
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
