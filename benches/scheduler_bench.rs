//! Benchmarks for the scheduler and its building blocks.
//!
//! Benchmarks cover:
//! - Ready queue operations (push/pop/priority ordering/removal)
//! - Scheduler throughput for independent tasks
//! - Dependency chains and fan-in
//! - Monitor polling passes over many records

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;

use task_warden::config::{MonitorConfig, SchedulerConfig};
use task_warden::core::{Monitor, ReadyQueue, Scheduler, TaskConfig};
use task_warden::util::serde::{Priority, TaskId};

use tokio::runtime::Runtime;

// ============================================================================
// Helper Functions
// ============================================================================

fn priority_for(i: u64) -> Priority {
    match i % 4 {
        0 => Priority::Critical,
        1 => Priority::High,
        2 => Priority::Normal,
        _ => Priority::Low,
    }
}

fn scheduler(max_concurrent: usize, monitored: bool) -> (Monitor, Scheduler<u64>) {
    let monitor = Monitor::new(MonitorConfig::default().with_check_interval_secs(0.05));
    let scheduler = Scheduler::new(
        SchedulerConfig::default()
            .with_max_concurrent(max_concurrent)
            .with_monitor(monitored),
        Some(monitor.clone()),
    )
    .unwrap();
    scheduler.start();
    (monitor, scheduler)
}

// ============================================================================
// Ready Queue Benchmarks
// ============================================================================

fn bench_ready_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_queue_push_pop");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let ids: Vec<TaskId> = (0..size).map(|_| TaskId::new()).collect();
            b.iter(|| {
                let mut q = ReadyQueue::new();
                for (seq, id) in (0_u64..).zip(&ids) {
                    q.push(*id, priority_for(seq), seq);
                }
                while let Some(id) = q.pop() {
                    black_box(id);
                }
            });
        });
    }
    group.finish();
}

fn bench_ready_queue_removal(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_queue_removal");

    for size in [100, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let ids: Vec<TaskId> = (0..size).map(|_| TaskId::new()).collect();
            b.iter(|| {
                let mut q = ReadyQueue::new();
                for (seq, id) in (0_u64..).zip(&ids) {
                    q.push(*id, Priority::Normal, seq);
                }
                // Cancel every other task, then drain past the stale entries.
                for id in ids.iter().step_by(2) {
                    q.remove(*id);
                }
                let mut count = 0;
                while q.pop().is_some() {
                    count += 1;
                }
                black_box(count);
            });
        });
    }
    group.finish();
}

// ============================================================================
// Scheduler Benchmarks (Async)
// ============================================================================

fn bench_scheduler_independent_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_independent_tasks");

    for task_count in [50, 200] {
        group.throughput(Throughput::Elements(task_count));
        for monitored in [false, true] {
            let label = if monitored { "monitored" } else { "unmonitored" };
            group.bench_with_input(
                BenchmarkId::new(label, task_count),
                &task_count,
                |b, &task_count| {
                    b.to_async(Runtime::new().unwrap()).iter(|| async move {
                        let (monitor, scheduler) = scheduler(8, monitored);
                        let mut ids = Vec::new();
                        for i in 0..task_count {
                            let id = scheduler
                                .submit(
                                    move || async move { Ok(i * 2) },
                                    None,
                                    TaskConfig::new().with_priority(priority_for(i)),
                                )
                                .unwrap();
                            ids.push(id);
                        }
                        for id in ids {
                            black_box(scheduler.wait_for(id, None).await.unwrap());
                        }
                        scheduler.stop(true).await;
                        monitor.stop();
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_scheduler_dependency_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_dependency_chain");

    for depth in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.to_async(Runtime::new().unwrap()).iter(|| async move {
                let (monitor, scheduler) = scheduler(4, true);
                let mut previous: Option<TaskId> = None;
                for i in 0..depth {
                    let deps: Vec<TaskId> = previous.into_iter().collect();
                    let id = scheduler
                        .submit(
                            move || async move { Ok(i) },
                            None,
                            TaskConfig::new().with_dependencies(deps),
                        )
                        .unwrap();
                    previous = Some(id);
                }
                if let Some(last) = previous {
                    black_box(scheduler.wait_for(last, None).await.unwrap());
                }
                scheduler.stop(true).await;
                monitor.stop();
            });
        });
    }
    group.finish();
}

fn bench_scheduler_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_fan_in");

    group.bench_function("fifty_prerequisites", |b| {
        b.to_async(Runtime::new().unwrap()).iter(|| async {
            let (monitor, scheduler) = scheduler(10, true);
            let roots: Vec<TaskId> = (0..50_u64)
                .map(|i| {
                    scheduler
                        .submit(move || async move { Ok(i) }, None, TaskConfig::new())
                        .unwrap()
                })
                .collect();
            let sink = scheduler
                .submit(
                    || async { Ok(0) },
                    Some("sink"),
                    TaskConfig::new()
                        .with_priority(Priority::Critical)
                        .with_dependencies(roots),
                )
                .unwrap();
            black_box(scheduler.wait_for(sink, None).await.unwrap());
            scheduler.stop(true).await;
            monitor.stop();
        });
    });
    group.finish();
}

// ============================================================================
// Monitor Benchmarks
// ============================================================================

fn bench_monitor_check_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("monitor_check_pass");
    let runtime = Runtime::new().unwrap();

    for records in [100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &records| {
            let _guard = runtime.enter();
            let monitor = Monitor::new(MonitorConfig::default());
            monitor.start();
            let units: Vec<_> = (0..records)
                .map(|_| {
                    monitor
                        .watch(
                            async {
                                tokio::time::sleep(Duration::from_secs(3600)).await;
                                Ok::<_, anyhow::Error>(())
                            },
                            None,
                            Some(Duration::from_secs(7200)),
                            None,
                        )
                        .unwrap()
                })
                .collect();

            b.iter(|| monitor.check_now());

            for (unit, _) in &units {
                unit.handle().cancel();
            }
            monitor.stop();
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_ready_queue_push_pop,
    bench_ready_queue_removal
);

criterion_group!(
    scheduler_benches,
    bench_scheduler_independent_tasks,
    bench_scheduler_dependency_chain,
    bench_scheduler_fan_in
);

criterion_group!(monitor_benches, bench_monitor_check_pass);

criterion_main!(queue_benches, scheduler_benches, monitor_benches);
