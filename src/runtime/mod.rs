//! Runtime adapters and the API surface for outer service layers.

pub mod api;
pub mod tokio_spawner;

pub use api::{health, stats_response, task_status, Health, StatsResponse, TaskStatusResponse};
pub use tokio_spawner::TokioSpawner;
