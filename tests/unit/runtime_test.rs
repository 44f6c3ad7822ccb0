//! Tests for runtime adapters and API models

use std::time::Duration;

use task_warden::builders::build_scheduler;
use task_warden::config::ConcurrencyConfig;
use task_warden::core::{TaskConfig, TaskState};
use task_warden::runtime::{health, stats_response, task_status, TokioSpawner};
use task_warden::util::serde::{Priority, TaskId};

#[test]
fn test_spawner_requires_runtime() {
    assert!(TokioSpawner::try_current().is_none());
}

#[tokio::test]
async fn test_spawner_spawns_on_current_runtime() {
    let spawner = TokioSpawner::try_current().expect("inside a runtime");
    let value = spawner.spawn(async { 21 * 2 }).await.unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_health_follows_scheduler_and_monitor() {
    let (monitor, scheduler) =
        build_scheduler::<u32>(&ConcurrencyConfig::default(), TokioSpawner::current()).unwrap();
    assert!(!health(&scheduler).ok);

    scheduler.start();
    let h = health(&scheduler);
    assert!(h.ok);
    assert!(h.scheduler_running);
    assert!(h.monitor_running);

    monitor.stop();
    assert!(!health(&scheduler).ok);
    scheduler.stop(true).await;
}

#[tokio::test]
async fn test_task_status_and_stats_response() {
    let (monitor, scheduler) =
        build_scheduler::<u32>(&ConcurrencyConfig::default(), TokioSpawner::current()).unwrap();
    scheduler.start();

    let id = scheduler
        .submit(
            || async { Ok(7) },
            Some("answer"),
            TaskConfig::new().with_priority(Priority::High),
        )
        .unwrap();
    assert_eq!(
        scheduler.wait_for(id, Some(Duration::from_secs(5))).await.unwrap(),
        7
    );

    let status = task_status(&scheduler, id).expect("known task");
    assert_eq!(status.name, "answer");
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.priority, Priority::High);
    assert_eq!(status.attempts, 1);
    assert!(status.error.is_none());
    assert!(task_status(&scheduler, TaskId::new()).is_none());

    let stats = stats_response(&scheduler);
    assert!(stats.running);
    assert_eq!(stats.scheduler.total_completed, 1);
    assert!(stats.monitor.is_some());

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["scheduler"]["total_submitted"], 1);

    scheduler.stop(false).await;
    monitor.stop();
}
