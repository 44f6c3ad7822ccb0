//! Tests for component builders

use task_warden::builders::{build_monitor, build_scheduler};
use task_warden::config::{ConcurrencyConfig, MonitorConfig, SchedulerConfig};
use task_warden::core::SchedulerError;
use task_warden::runtime::TokioSpawner;

#[tokio::test]
async fn test_build_scheduler_attaches_monitor() {
    let (monitor, scheduler) =
        build_scheduler::<u32>(&ConcurrencyConfig::default(), TokioSpawner::current()).unwrap();
    assert!(scheduler.monitor().is_some());
    assert!(!scheduler.is_running());
    assert!(!monitor.is_running());

    scheduler.start();
    assert!(monitor.is_running());
    scheduler.stop(true).await;
    monitor.stop();
}

#[tokio::test]
async fn test_build_scheduler_without_monitoring() {
    let cfg = ConcurrencyConfig {
        monitor: MonitorConfig::default(),
        scheduler: SchedulerConfig::default().with_monitor(false),
    };
    let (monitor, scheduler) = build_scheduler::<u32>(&cfg, TokioSpawner::current()).unwrap();
    assert!(scheduler.monitor().is_none());

    scheduler.start();
    assert!(!monitor.is_running());
    scheduler.stop(true).await;
}

#[tokio::test]
async fn test_build_scheduler_rejects_invalid_config() {
    let cfg = ConcurrencyConfig {
        monitor: MonitorConfig::default(),
        scheduler: SchedulerConfig::default().with_max_concurrent(0),
    };
    let err = build_scheduler::<u32>(&cfg, TokioSpawner::current()).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(msg) if msg.contains("max_concurrent")));
}

#[tokio::test]
async fn test_build_monitor_rejects_invalid_config() {
    let cfg = MonitorConfig::default().with_check_interval_secs(-1.0);
    let err = build_monitor(&cfg, TokioSpawner::current()).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(msg) if msg.starts_with("monitor:")));
}
