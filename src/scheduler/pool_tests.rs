//! Tests for the worker pool: dispatch order, timeouts, retries, backpressure.

use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::*;
use crate::scheduler::worker::FnExecutor;
use crate::scheduler::Priority;

type Log = Arc<Mutex<Vec<String>>>;

/// Executor that logs payloads; "block" waits on the gate, "stall" never returns.
fn gated_executor(log: Log, gate: Arc<Notify>) -> Arc<dyn Executor<String, String>> {
    Arc::new(FnExecutor(move |payload: String| {
        let log = Arc::clone(&log);
        let gate = Arc::clone(&gate);
        async move {
            match payload.as_str() {
                "block" => gate.notified().await,
                "stall" => futures::future::pending::<()>().await,
                _ => {}
            }
            log.lock().push(payload.clone());
            Ok(payload)
        }
    }))
}

fn single_worker(max_pending: usize) -> SchedulerConfig {
    SchedulerConfig { pool_size: 1, max_pending, ..Default::default() }
}

#[tokio::test]
async fn dispatches_highest_priority_first() {
    let log: Log = Arc::default();
    let gate = Arc::new(Notify::new());
    let scheduler = TaskScheduler::new(single_worker(16), gated_executor(log.clone(), gate.clone()));

    let blocker = scheduler.submit("block".into(), TaskOptions::default()).unwrap();
    let low = scheduler.submit("low".into(), TaskOptions::with_priority(Priority::Low)).unwrap();
    let high = scheduler.submit("high".into(), TaskOptions::with_priority(Priority::High)).unwrap();
    let normal = scheduler.submit("normal".into(), TaskOptions::with_priority(Priority::Normal)).unwrap();
    assert_eq!(scheduler.queue_depth(), 3);

    gate.notify_one();
    for rx in [blocker, low, high, normal] {
        rx.await.unwrap().unwrap();
    }
    assert_eq!(*log.lock(), vec!["block", "high", "normal", "low"]);
}

#[tokio::test(start_paused = true)]
async fn stalled_task_times_out_after_one_retry() {
    let log: Log = Arc::default();
    let scheduler = TaskScheduler::new(
        SchedulerConfig::with_workers(2),
        gated_executor(log, Arc::new(Notify::new())),
    );
    let before = scheduler.pool_size();
    let start = tokio::time::Instant::now();

    let options = TaskOptions::with_priority(Priority::High)
        .timeout(Duration::from_millis(50))
        .retries(1);
    let err = scheduler.execute("stall".into(), options).await.unwrap_err();

    let elapsed = start.elapsed();
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150));

    let stats = scheduler.stats();
    assert_eq!(scheduler.pool_size(), before);
    assert_eq!(stats.pool_size, before);
    assert_eq!(stats.timeouts, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.workers_recycled, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.busy, 0);
}

#[tokio::test(start_paused = true)]
async fn recycled_worker_keeps_serving() {
    let log: Log = Arc::default();
    let scheduler = TaskScheduler::new(single_worker(16), gated_executor(log.clone(), Arc::new(Notify::new())));

    let options = TaskOptions::default().timeout(Duration::from_millis(20));
    assert!(scheduler.execute("stall".into(), options).await.is_err());

    let value = scheduler.execute("after".into(), TaskOptions::default()).await.unwrap();
    assert_eq!(value, "after");
    assert_eq!(scheduler.stats().completed_per_worker, vec![1]);
}

#[tokio::test]
async fn worker_error_is_retried_then_succeeds() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let executor: Arc<dyn Executor<u32, u32>> = Arc::new(FnExecutor(move |n: u32| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                Err("flaky".to_string())
            } else {
                Ok(n * 2)
            }
        }
    }));
    let scheduler = TaskScheduler::new(single_worker(4), executor);

    let value = scheduler.execute(21, TaskOptions::default().retries(2)).await.unwrap();
    assert_eq!(value, 42);
    assert_eq!(attempts.load(AtomicOrdering::SeqCst), 2);
    assert_eq!(scheduler.stats().retries, 1);
}

#[tokio::test]
async fn exhausted_retries_surface_worker_error() {
    let executor: Arc<dyn Executor<(), ()>> =
        Arc::new(FnExecutor(|_: ()| async { Err::<(), _>("boom".to_string()) }));
    let scheduler = TaskScheduler::new(single_worker(4), executor);

    let err = scheduler.execute((), TaskOptions::default().retries(1)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Worker { ref message, .. } if message == "boom"));
    let stats = scheduler.stats();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn full_queue_rejects_immediately() {
    let log: Log = Arc::default();
    let gate = Arc::new(Notify::new());
    let scheduler = TaskScheduler::new(single_worker(1), gated_executor(log, gate.clone()));

    let _running = scheduler.submit("block".into(), TaskOptions::default()).unwrap();
    let _queued = scheduler.submit("a".into(), TaskOptions::default()).unwrap();
    let err = scheduler.submit("b".into(), TaskOptions::default()).unwrap_err();

    assert_eq!(err, SchedulerError::QueueFull { depth: 1, max: 1 });
    assert_eq!(scheduler.stats().rejected, 1);
    gate.notify_one();
}

#[tokio::test]
async fn shutdown_rejects_waiting_tasks() {
    let log: Log = Arc::default();
    let gate = Arc::new(Notify::new());
    let scheduler = TaskScheduler::new(single_worker(8), gated_executor(log, gate));

    let running = scheduler.submit("block".into(), TaskOptions::default()).unwrap();
    let queued = scheduler.submit("later".into(), TaskOptions::default()).unwrap();
    scheduler.shutdown();

    assert_eq!(running.await.unwrap(), Err(SchedulerError::Shutdown));
    assert_eq!(queued.await.unwrap(), Err(SchedulerError::Shutdown));
    assert_eq!(
        scheduler.submit("new".into(), TaskOptions::default()).unwrap_err(),
        SchedulerError::Shutdown
    );
}

#[tokio::test]
async fn stats_report_idle_and_busy_workers() {
    let log: Log = Arc::default();
    let gate = Arc::new(Notify::new());
    let scheduler = TaskScheduler::new(SchedulerConfig::with_workers(3), gated_executor(log, gate.clone()));

    let rx = scheduler.submit("block".into(), TaskOptions::default()).unwrap();
    let stats = scheduler.stats();
    assert_eq!((stats.pool_size, stats.busy, stats.idle), (3, 1, 2));

    gate.notify_one();
    rx.await.unwrap().unwrap();
    let stats = scheduler.stats();
    assert_eq!((stats.busy, stats.idle, stats.succeeded), (0, 3, 1));
}
