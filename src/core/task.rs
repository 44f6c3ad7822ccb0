//! Task configuration, lifecycle states and snapshots.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::error::{AppResult, CancelReason, TaskError};
use crate::core::unit::UnitHandle;
use crate::util::serde::{Metadata, Priority, RecordId, TaskId};

/// Boxed future produced by a task body.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'static>>;

/// Deferred unit of work. Called once per attempt.
pub type TaskWork<T> = Arc<dyn Fn() -> TaskFuture<T> + Send + Sync + 'static>;

/// Per-task scheduling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Queue priority.
    pub priority: Priority,
    /// Monitor timeout. `None` uses the monitor default, zero means unlimited.
    pub timeout: Option<Duration>,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Pause between a failed attempt and its re-queue.
    pub retry_delay: Duration,
    /// Tasks that must complete before this one may run.
    pub dependencies: Vec<TaskId>,
    /// Metadata forwarded to the monitor record.
    pub metadata: Metadata,
    /// Cancel this task when a dependency fails or is cancelled.
    pub cancel_on_dependency_failure: bool,
    /// Register attempts with the monitor.
    pub monitor_enabled: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            timeout: None,
            max_retries: 0,
            retry_delay: Duration::from_secs(1),
            dependencies: Vec::new(),
            metadata: Metadata::new(),
            cancel_on_dependency_failure: true,
            monitor_enabled: true,
        }
    }
}

impl TaskConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the monitor timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the prerequisite tasks.
    #[must_use]
    pub fn with_dependencies<I>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.dependencies = deps.into_iter().collect();
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Choose whether a failed dependency cancels this task.
    #[must_use]
    pub fn with_cancel_on_dependency_failure(mut self, cancel: bool) -> Self {
        self.cancel_on_dependency_failure = cancel;
        self
    }

    /// Choose whether attempts are registered with the monitor.
    #[must_use]
    pub fn with_monitor(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }
}

/// Scheduler-side lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready and waiting for a concurrency slot.
    Queued,
    /// Waiting on prerequisites.
    Waiting,
    /// Executing.
    Running,
    /// Finished with a value.
    Completed,
    /// Finished with an error after exhausting retries.
    Failed,
    /// Cancelled before finishing.
    Cancelled,
    /// Between a failed attempt and its re-queue.
    Retrying,
}

impl TaskState {
    /// `Completed`, `Failed` or `Cancelled`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// Scheduler-owned record of one submitted task.
pub(crate) struct ManagedTask<T> {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) work: TaskWork<T>,
    pub(crate) config: TaskConfig,
    pub(crate) state: TaskState,
    pub(crate) result: Option<T>,
    pub(crate) error: Option<TaskError>,
    pub(crate) cancel_reason: Option<CancelReason>,
    pub(crate) attempts: u32,
    pub(crate) seq: u64,
    pub(crate) record_id: Option<RecordId>,
    pub(crate) unit: Option<UnitHandle>,
    pub(crate) submitted_at: Instant,
    pub(crate) started_at: Option<Instant>,
    pub(crate) ended_at: Option<Instant>,
    pub(crate) state_tx: watch::Sender<TaskState>,
}

impl<T: Clone> ManagedTask<T> {
    pub(crate) fn new(
        id: TaskId,
        name: String,
        work: TaskWork<T>,
        config: TaskConfig,
        seq: u64,
    ) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Queued);
        Self {
            id,
            name,
            work,
            config,
            state: TaskState::Queued,
            result: None,
            error: None,
            cancel_reason: None,
            attempts: 0,
            seq,
            record_id: None,
            unit: None,
            submitted_at: Instant::now(),
            started_at: None,
            ended_at: None,
            state_tx,
        }
    }

    /// Move to `state` and wake anyone waiting on this task.
    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
        if state.is_terminal() {
            self.ended_at = Some(Instant::now());
            self.record_id = None;
            self.unit = None;
        }
        self.state_tx.send_replace(state);
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        Some(
            self.ended_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(start),
        )
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot<T> {
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            priority: self.config.priority,
            result: self.result.clone(),
            error: self.error.clone(),
            cancel_reason: self.cancel_reason,
            attempts: self.attempts,
            dependencies: self.config.dependencies.clone(),
            record_id: self.record_id,
            duration: self.duration(),
            queued_for: self
                .started_at
                .map(|s| s.saturating_duration_since(self.submitted_at)),
        }
    }
}

/// Read-only view of a managed task handed to callbacks and observers.
#[derive(Debug, Clone)]
pub struct TaskSnapshot<T> {
    /// Task identifier.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// State at the time of the snapshot.
    pub state: TaskState,
    /// Configured priority.
    pub priority: Priority,
    /// Result, present only when completed.
    pub result: Option<T>,
    /// Last error, present only when failed.
    pub error: Option<TaskError>,
    /// Why the task was cancelled.
    pub cancel_reason: Option<CancelReason>,
    /// Attempts started so far.
    pub attempts: u32,
    /// Prerequisites.
    pub dependencies: Vec<TaskId>,
    /// Monitor record of the running attempt.
    pub record_id: Option<RecordId>,
    /// Time since the latest attempt started, frozen at the terminal state.
    pub duration: Option<Duration>,
    /// Time between submission and the first admission.
    pub queued_for: Option<Duration>,
}
