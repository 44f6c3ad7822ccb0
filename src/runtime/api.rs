//! API-facing response models built from scheduler and monitor state.

use serde::{Deserialize, Serialize};

use crate::core::{CancelReason, Monitor, MonitorStats, Scheduler, SchedulerStats, TaskState};
use crate::util::serde::{Priority, TaskId};

/// Task status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Display name.
    pub name: String,
    /// Current state.
    pub state: TaskState,
    /// Configured priority.
    pub priority: Priority,
    /// Attempts started so far.
    pub attempts: u32,
    /// Rendered error for failed tasks.
    pub error: Option<String>,
    /// Why the task was cancelled.
    pub cancel_reason: Option<CancelReason>,
    /// Latest attempt duration in milliseconds.
    pub duration_ms: Option<u128>,
}

/// Combined counters for a scheduler and, when attached, its monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Whether the scheduler admits work.
    pub running: bool,
    /// Scheduler counters.
    pub scheduler: SchedulerStats,
    /// Monitor counters.
    pub monitor: Option<MonitorStats>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Scheduler running.
    pub scheduler_running: bool,
    /// Monitor running; `false` when none is attached.
    pub monitor_running: bool,
}

/// Status of one task, or `None` for unknown ids.
pub fn task_status<T>(scheduler: &Scheduler<T>, id: TaskId) -> Option<TaskStatusResponse>
where
    T: Clone + Send + Sync + 'static,
{
    let task = scheduler.task(id)?;
    Some(TaskStatusResponse {
        task_id: task.id,
        name: task.name,
        state: task.state,
        priority: task.priority,
        attempts: task.attempts,
        error: task.error.map(|e| format!("{e:#}")),
        cancel_reason: task.cancel_reason,
        duration_ms: task.duration.map(|d| d.as_millis()),
    })
}

/// Counters for `scheduler` and its attached monitor.
pub fn stats_response<T>(scheduler: &Scheduler<T>) -> StatsResponse
where
    T: Clone + Send + Sync + 'static,
{
    StatsResponse {
        running: scheduler.is_running(),
        scheduler: scheduler.stats(),
        monitor: scheduler.monitor().map(Monitor::stats),
    }
}

/// Return a health payload. Healthy while the scheduler runs and its
/// monitor, if any, runs too.
pub fn health<T>(scheduler: &Scheduler<T>) -> Health
where
    T: Clone + Send + Sync + 'static,
{
    let scheduler_running = scheduler.is_running();
    let monitor_running = scheduler.monitor().is_some_and(Monitor::is_running);
    let monitor_ok = scheduler.monitor().is_none() || monitor_running;
    Health {
        ok: scheduler_running && monitor_ok,
        scheduler_running,
        monitor_running,
    }
}
