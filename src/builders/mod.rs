//! Builders that wire monitors and schedulers from configuration.

pub mod scheduler_builder;

pub use scheduler_builder::{build_monitor, build_scheduler};
