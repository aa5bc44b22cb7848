//! Scheduler throughput benchmarks.
//!
//! Measures priority queue operations and end-to-end task dispatch through
//! the worker pool.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use presage_core::scheduler::{
    FnExecutor, Priority, PriorityQueue, SchedulerConfig, TaskOptions, TaskScheduler,
};

fn bench_priority_queue_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_push");

    for (name, queue_size) in [("empty", 0u64), ("half_full", 128), ("near_full", 240)] {
        let mut queue: PriorityQueue<u64> = PriorityQueue::new();
        for i in 0..queue_size {
            queue.push(i, Priority::Normal);
        }

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("push", name), |b| {
            let mut id = queue_size;
            b.iter(|| {
                queue.push(black_box(id), Priority::Normal);
                id += 1;
                let _ = queue.pop();
            })
        });
    }

    group.finish();
}

fn bench_priority_queue_mixed_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_drain");
    let tiers = [Priority::Low, Priority::Normal, Priority::High];

    for size in [16usize, 64, 256] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("mixed", size), &size, |b, &size| {
            b.iter(|| {
                let mut queue: PriorityQueue<usize> = PriorityQueue::new();
                for i in 0..size {
                    queue.push(i, tiers[i % tiers.len()]);
                }
                black_box(queue.drain_ordered())
            })
        });
    }

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("runtime");
    let mut group = c.benchmark_group("scheduler_execute");

    for workers in [1usize, 4] {
        let scheduler: TaskScheduler<u64, u64> = rt.block_on(async {
            TaskScheduler::new(
                SchedulerConfig::with_workers(workers),
                Arc::new(FnExecutor(|n: u64| async move { Ok::<u64, String>(n * 2) })),
            )
        });

        group.throughput(Throughput::Elements(64));
        group.bench_function(BenchmarkId::new("burst_64", workers), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let calls = (0..64u64).map(|n| scheduler.execute(n, TaskOptions::default()));
                    black_box(futures::future::join_all(calls).await)
                })
            })
        });
        scheduler.shutdown();
    }

    group.finish();
}

criterion_group!(benches, bench_priority_queue_push, bench_priority_queue_mixed_drain, bench_execute);
criterion_main!(benches);
