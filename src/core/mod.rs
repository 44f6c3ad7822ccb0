//! Execution monitoring and dependency-aware scheduling.

pub(crate) mod callbacks;
pub mod error;
pub mod monitor;
pub mod ready_queue;
pub mod scheduler;
pub mod task;
pub mod unit;

pub use callbacks::HandlerId;
pub use error::{AppResult, CancelReason, MonitorError, SchedulerError, TaskError, WaitError};
pub use monitor::{Monitor, MonitorStats, RecordHandler, RecordStatus, TaskRecord};
pub use ready_queue::ReadyQueue;
pub use scheduler::{Scheduler, SchedulerStats, TaskHandler};
pub use task::{TaskConfig, TaskFuture, TaskSnapshot, TaskState, TaskWork};
pub use unit::{spawn_unit, Finished, SpawnedUnit, UnitHandle, UnitOutcome};
