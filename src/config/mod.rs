//! Configuration models for the monitor and the scheduler.

pub mod concurrency;

pub use concurrency::{ConcurrencyConfig, MonitorConfig, SchedulerConfig, ENV_PREFIX};
