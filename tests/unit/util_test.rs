//! Tests for shared utilities

use std::collections::HashSet;
use std::time::Duration;

use task_warden::util::clock::{now_ms, secs_to_duration, secs_to_timeout, MAX_CONFIG_SECS};
use task_warden::util::serde::{Priority, RecordId, TaskId};
use task_warden::util::telemetry::init_tracing_with;

#[test]
fn test_task_ids_are_unique_and_prefixed() {
    let ids: HashSet<TaskId> = (0..100).map(|_| TaskId::new()).collect();
    assert_eq!(ids.len(), 100);

    let rendered = TaskId::new().to_string();
    assert!(rendered.starts_with("task-"));
    assert_eq!(rendered.len(), "task-".len() + 32);
    assert!(RecordId::new().to_string().starts_with("rec-"));
}

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_serialization() {
    assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
    let p: Priority = serde_json::from_str("\"critical\"").unwrap();
    assert_eq!(p, Priority::Critical);
    assert_eq!(Priority::Low.to_string(), "low");
}

#[test]
fn test_secs_to_timeout() {
    assert_eq!(secs_to_timeout(1.5), Some(Duration::from_millis(1500)));
    assert_eq!(secs_to_timeout(0.0), None);
    assert_eq!(secs_to_timeout(-3.0), None);
    assert_eq!(secs_to_timeout(f64::NAN), None);
    assert_eq!(secs_to_timeout(f64::INFINITY), None);
}

#[test]
fn test_secs_to_duration_clamps() {
    let cap = Duration::from_secs_f64(MAX_CONFIG_SECS);
    assert_eq!(secs_to_duration(2.0), Duration::from_secs(2));
    assert_eq!(secs_to_duration(-1.0), Duration::ZERO);
    assert_eq!(secs_to_duration(f64::NAN), Duration::ZERO);
    assert_eq!(secs_to_duration(1e20), cap);
    assert_eq!(secs_to_duration(f64::INFINITY), cap);
    assert_eq!(secs_to_timeout(1e20), Some(cap));
}

#[test]
fn test_now_ms_is_after_2020() {
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
    init_tracing_with("debug");
    init_tracing_with("not a [valid filter");
    tracing::info!("tracing initialised");
}
