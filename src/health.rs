//! Health derived from the aggregated core statistics.
//!
//! Liveness is unconditional. Readiness requires the core to be running and
//! the scheduler queue below its limit. Being offline or carrying a long
//! offline queue degrades health without affecting readiness.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::shutdown::ShutdownState;
use crate::CoreStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_updates: bool,
    pub online: bool,
    pub queue_depth: usize,
    pub busy_workers: usize,
    pub pool_size: usize,
    pub offline_queue: usize,
    pub in_flight_updates: u32,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Scheduler queue depth at which the core stops reporting ready.
    pub max_queue_depth: usize,
    /// Offline queue length at which health degrades.
    pub max_offline_queue: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { max_queue_depth: 256, max_offline_queue: 1000 }
    }
}

pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self { config, start_time: Instant::now() }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    pub fn is_ready(&self, stats: &CoreStats) -> bool {
        stats.shutdown == ShutdownState::Running
            && stats.coordinator.scheduler.queue_depth < self.config.max_queue_depth
    }

    pub fn report(&self, stats: &CoreStats) -> HealthReport {
        let scheduler = &stats.coordinator.scheduler;
        HealthReport {
            state: self.compute_state(stats),
            ready: self.is_ready(stats),
            accepting_updates: stats.shutdown == ShutdownState::Running,
            online: stats.online,
            queue_depth: scheduler.queue_depth,
            busy_workers: scheduler.busy,
            pool_size: scheduler.pool_size,
            offline_queue: stats.mutation.offline_queue,
            in_flight_updates: stats.mutation.in_flight,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, stats: &CoreStats) -> HealthState {
        if stats.shutdown != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if !stats.online
            || stats.coordinator.scheduler.queue_depth >= self.config.max_queue_depth
            || stats.mutation.offline_queue >= self.config.max_offline_queue
        {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
