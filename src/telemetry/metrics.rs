//! Metric emission through the `metrics` facade.
//!
//! No recorder is installed by this crate; the host decides where counters go.

use std::time::Duration;

use ::metrics::{counter, gauge, histogram};

use crate::scheduler::{Priority, SchedulerError};

pub fn record_task_success(priority: Priority, latency: Duration) {
    counter!("presage_tasks_total", "outcome" => "success", "priority" => priority.as_str())
        .increment(1);
    histogram!("presage_task_latency_ms").record(latency.as_secs_f64() * 1000.0);
}

pub fn record_task_failure(error: &SchedulerError) {
    let reason = match error {
        SchedulerError::QueueFull { .. } => "queue_full",
        SchedulerError::Timeout { .. } => "timeout",
        SchedulerError::Worker { .. } => "worker",
        SchedulerError::Shutdown => "shutdown",
    };
    counter!("presage_tasks_total", "outcome" => "failure", "reason" => reason).increment(1);
}

pub fn record_task_timeout() {
    counter!("presage_task_timeouts_total").increment(1);
}

pub fn record_task_retry() {
    counter!("presage_task_retries_total").increment(1);
}

pub fn record_worker_recycled() {
    counter!("presage_workers_recycled_total").increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("presage_queue_depth").set(depth as f64);
}

pub fn record_queue_rejection() {
    counter!("presage_queue_rejections_total").increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("presage_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_dedup_join() {
    counter!("presage_dedup_joins_total").increment(1);
}

pub fn record_batch_dispatch(members: usize) {
    counter!("presage_batches_total").increment(1);
    histogram!("presage_batch_size").record(members as f64);
}

/// `outcome` is one of: dispatched, hit, miss, wasted, failed.
pub fn record_prefetch(outcome: &'static str) {
    counter!("presage_prefetch_total", "outcome" => outcome).increment(1);
}

/// `outcome` is one of: committed, rolled_back, queued, conflict, replayed.
pub fn record_mutation(outcome: &'static str) {
    counter!("presage_mutations_total", "outcome" => outcome).increment(1);
}

pub fn record_offline_queue_len(len: usize) {
    gauge!("presage_offline_queue_len").set(len as f64);
}
