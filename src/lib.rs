//! # Task Warden
//!
//! Supervision and scheduling for asynchronous work on a Tokio runtime.
//!
//! The crate has two cooperating halves:
//!
//! - **[`Monitor`](core::Monitor)**: watches spawned units of work, classifies
//!   how they ended, reports units that outlive their timeout, and purges
//!   finished records after a grace period. Observers subscribe to timeout,
//!   error and completion events.
//! - **[`Scheduler`](core::Scheduler)**: accepts deferred work with a priority,
//!   prerequisites, a retry budget and a timeout. It runs at most
//!   `max_concurrent` tasks at once, highest priority first, FIFO within a
//!   priority. Failed attempts are retried after a delay; a failed or
//!   cancelled prerequisite cancels its dependents transitively.
//!
//! The scheduler registers every running attempt with the monitor and reacts
//! to its timeout events, cancelling the attempt when configured to.
//!
//! ## Key Features
//!
//! - **Bounded concurrency**: admission stops at the configured cap
//! - **Priority + FIFO ordering**: four priority levels, stable within a level
//! - **Dependencies**: tasks wait for prerequisites, cascade on failure
//! - **Retries**: per-task budget and delay
//! - **Cooperative cancellation**: running work stops at its next `.await`
//! - **Result retrieval**: `wait_for` hands back the value or the original error
//!
//! ```rust,ignore
//! use task_warden::builders::build_scheduler;
//! use task_warden::config::ConcurrencyConfig;
//! use task_warden::core::TaskConfig;
//! use task_warden::runtime::TokioSpawner;
//! use task_warden::util::serde::Priority;
//!
//! let (monitor, scheduler) =
//!     build_scheduler::<u32>(&ConcurrencyConfig::from_env()?, TokioSpawner::current())?;
//! scheduler.start();
//!
//! let load = scheduler.submit(|| async { Ok(1) }, Some("load"), TaskConfig::new())?;
//! let train = scheduler.submit(
//!     || async { Ok(2) },
//!     Some("train"),
//!     TaskConfig::new()
//!         .with_priority(Priority::High)
//!         .with_max_retries(2)
//!         .with_dependencies([load]),
//! )?;
//! let value = scheduler.wait_for(train, None).await?;
//!
//! scheduler.stop(false).await;
//! monitor.stop();
//! ```
//!
//! For complete scenarios, see `tests/scheduler_scenarios.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Execution monitor, scheduler and their shared types.
pub mod core;
/// Configuration models for the monitor and the scheduler.
pub mod config;
/// Builders to construct wired components from configuration.
pub mod builders;
/// Runtime adapters and the serializable API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
