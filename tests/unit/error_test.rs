//! Tests for error types

use std::sync::Arc;

use task_warden::core::{CancelReason, MonitorError, SchedulerError, WaitError};
use task_warden::util::serde::TaskId;

#[derive(Debug, thiserror::Error)]
#[error("model weights missing: {0}")]
struct WeightsMissing(String);

#[test]
fn test_not_running_error() {
    let err = SchedulerError::NotRunning;
    assert_eq!(format!("{}", err), "scheduler is not running");
}

#[test]
fn test_invalid_config_error() {
    let err = SchedulerError::InvalidConfig("max_concurrent must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_concurrent must be greater than 0"
    );
}

#[test]
fn test_unknown_dependency_error_names_the_task() {
    let id = TaskId::new();
    let err = SchedulerError::UnknownDependency(id);
    assert_eq!(format!("{}", err), format!("unknown dependency: {id}"));
}

#[test]
fn test_monitor_error_converts_into_scheduler_error() {
    let err: SchedulerError = MonitorError::NotRunning.into();
    assert_eq!(err, SchedulerError::Monitor(MonitorError::NotRunning));
    assert_eq!(format!("{}", err), "monitor error: monitor is not running");
}

#[test]
fn test_cancel_reason_serialization() {
    let json = serde_json::to_value(CancelReason::Requested).unwrap();
    assert_eq!(json, serde_json::json!({ "kind": "requested" }));

    let dep = TaskId::new();
    let json = serde_json::to_value(CancelReason::DependencyFailed(dep)).unwrap();
    assert_eq!(json["kind"], "dependency_failed");
    assert_eq!(json["task"], serde_json::to_value(dep).unwrap());

    let back: CancelReason = serde_json::from_value(json).unwrap();
    assert_eq!(back, CancelReason::DependencyFailed(dep));
}

#[test]
fn test_wait_error_keeps_original_task_error() {
    let err = WaitError::Failed(Arc::new(anyhow::Error::new(WeightsMissing(
        "llama-7b".to_string(),
    ))));
    let inner = err.task_error().expect("failed variant carries the error");
    let original = inner
        .downcast_ref::<WeightsMissing>()
        .expect("original error type is preserved");
    assert_eq!(original.0, "llama-7b");
    assert_eq!(format!("{}", err), "task failed: model weights missing: llama-7b");
}

#[test]
fn test_wait_error_without_task_error() {
    assert!(WaitError::Timeout.task_error().is_none());
    assert!(WaitError::Cancelled(CancelReason::Shutdown)
        .task_error()
        .is_none());
    assert_eq!(
        format!("{}", WaitError::Cancelled(CancelReason::TimedOut)),
        "task cancelled: cancelled after timeout"
    );
}
