//! Error types for monitor and scheduler operations.

use std::sync::Arc;

use thiserror::Error;

use crate::util::serde::TaskId;

/// Application-facing result used by task bodies.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Error raised by a task body, shared between every waiter and callback.
///
/// The original `anyhow::Error` is kept as-is so callers can downcast it.
pub type TaskError = Arc<anyhow::Error>;

/// Errors produced by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// The polling loop is not running and auto-start is disabled.
    #[error("monitor is not running")]
    NotRunning,
}

/// Errors produced by the scheduler's synchronous operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Operation requires a started scheduler.
    #[error("scheduler is not running")]
    NotRunning,
    /// A prerequisite named at submission does not exist.
    #[error("unknown dependency: {0}")]
    UnknownDependency(TaskId),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The attached monitor cannot accept the task.
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
}

/// Why a task ended up cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "task")]
pub enum CancelReason {
    /// A caller asked for it.
    Requested,
    /// The monitor reported a timeout and auto-cancel is enabled.
    TimedOut,
    /// A prerequisite failed or was cancelled.
    DependencyFailed(TaskId),
    /// The scheduler was stopped while the task was still pending or running.
    Shutdown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "cancelled by request"),
            Self::TimedOut => write!(f, "cancelled after timeout"),
            Self::DependencyFailed(dep) => write!(f, "dependency {dep} did not complete"),
            Self::Shutdown => write!(f, "cancelled at shutdown"),
        }
    }
}

/// Outcome of waiting on a task that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    /// The task exhausted its retries; carries the body's last error.
    #[error("task failed: {0}")]
    Failed(TaskError),
    /// The task was cancelled.
    #[error("task cancelled: {0}")]
    Cancelled(CancelReason),
    /// The wait timed out; the task itself is unaffected.
    #[error("timed out waiting for task")]
    Timeout,
    /// No task with this identifier was submitted.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
}

impl WaitError {
    /// The task body's error, if the task failed.
    pub fn task_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
