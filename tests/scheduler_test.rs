//! Integration tests for the task scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use presage_core::scheduler::{
    Executor, FnExecutor, Priority, PriorityQueue, SchedulerConfig, SchedulerError, TaskOptions,
    TaskScheduler,
};
use tokio::sync::Notify;

fn recording(log: Arc<Mutex<Vec<&'static str>>>, gate: Arc<Notify>) -> Arc<dyn Executor<&'static str, ()>> {
    Arc::new(FnExecutor(move |name: &'static str| {
        let log = Arc::clone(&log);
        let gate = Arc::clone(&gate);
        async move {
            if name == "gate" {
                gate.notified().await;
            }
            log.lock().push(name);
            Ok(())
        }
    }))
}

#[test]
fn test_priority_queue_is_fifo_within_tier() {
    let mut queue = PriorityQueue::new();
    queue.push("low-1", Priority::Low);
    queue.push("normal-1", Priority::Normal);
    queue.push("high-1", Priority::High);
    queue.push("normal-2", Priority::Normal);
    queue.push("high-2", Priority::High);

    assert_eq!(queue.peek_priority(), Some(Priority::High));
    assert_eq!(
        queue.drain_ordered(),
        vec!["high-1", "high-2", "normal-1", "normal-2", "low-1"]
    );
}

#[tokio::test]
async fn test_low_high_normal_dispatch_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Notify::new());
    let config = SchedulerConfig { pool_size: 1, ..Default::default() };
    let scheduler = TaskScheduler::new(config, recording(log.clone(), gate.clone()));

    let busy = scheduler.submit("gate", TaskOptions::default()).unwrap();
    let receivers = [
        scheduler.submit("low", TaskOptions::with_priority(Priority::Low)).unwrap(),
        scheduler.submit("high", TaskOptions::with_priority(Priority::High)).unwrap(),
        scheduler.submit("normal", TaskOptions::with_priority(Priority::Normal)).unwrap(),
    ];
    gate.notify_one();
    busy.await.unwrap().unwrap();
    for rx in receivers {
        rx.await.unwrap().unwrap();
    }
    assert_eq!(*log.lock(), vec!["gate", "high", "normal", "low"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_pool_size_constant() {
    let executor: Arc<dyn Executor<(), ()>> = Arc::new(FnExecutor(|_: ()| async {
        futures::future::pending::<()>().await;
        Ok(())
    }));
    let scheduler = TaskScheduler::new(SchedulerConfig::with_workers(3), executor);
    let before = scheduler.stats().pool_size;
    let started = tokio::time::Instant::now();

    let options = TaskOptions::with_priority(Priority::High)
        .timeout(Duration::from_millis(50))
        .retries(1);
    let err = scheduler.execute((), options).await.unwrap_err();

    assert!(matches!(err, SchedulerError::Timeout { timeout_ms: 50, .. }));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_millis(150));
    let stats = scheduler.stats();
    assert_eq!(stats.pool_size, before);
    assert_eq!(stats.workers_recycled, 2);
}

#[tokio::test]
async fn test_every_task_settles_exactly_once_under_load() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let executor: Arc<dyn Executor<usize, usize>> = Arc::new(FnExecutor(move |n: usize| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if n % 7 == 0 {
                Err(format!("task {n} rejected"))
            } else {
                Ok(n)
            }
        }
    }));
    let config = SchedulerConfig { pool_size: 4, max_pending: 1000, ..Default::default() };
    let scheduler = TaskScheduler::new(config, executor);

    let results = futures::future::join_all(
        (0..200).map(|n| scheduler.execute(n, TaskOptions::default())),
    )
    .await;

    let failures = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(failures, (0..200).filter(|n| n % 7 == 0).count());
    assert_eq!(runs.load(Ordering::SeqCst), 200);
    let stats = scheduler.stats();
    assert_eq!(stats.succeeded + stats.failed, 200);
    assert_eq!(stats.queue_depth, 0);
}

#[tokio::test]
async fn test_backpressure_and_shutdown() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Notify::new());
    let config = SchedulerConfig { pool_size: 1, max_pending: 2, ..Default::default() };
    let scheduler = TaskScheduler::new(config, recording(log, gate));

    let _running = scheduler.submit("gate", TaskOptions::default()).unwrap();
    let queued = [
        scheduler.submit("a", TaskOptions::default()).unwrap(),
        scheduler.submit("b", TaskOptions::default()).unwrap(),
    ];
    let rejected = scheduler.submit("c", TaskOptions::default()).unwrap_err();
    assert_eq!(rejected, SchedulerError::QueueFull { depth: 2, max: 2 });
    assert!(!rejected.is_retryable());

    scheduler.shutdown();
    for rx in queued {
        assert_eq!(rx.await.unwrap().unwrap_err(), SchedulerError::Shutdown);
    }
    assert!(matches!(
        scheduler.submit("late", TaskOptions::default()),
        Err(SchedulerError::Shutdown)
    ));
}
