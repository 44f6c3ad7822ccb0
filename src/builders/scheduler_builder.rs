//! Builders to construct a monitor and a scheduler from configuration.

use crate::config::{ConcurrencyConfig, MonitorConfig};
use crate::core::{Monitor, Scheduler, SchedulerError};
use crate::runtime::TokioSpawner;

/// Build a monitor on `spawner`'s runtime. The polling loop is not started.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] when `cfg` fails validation.
pub fn build_monitor(cfg: &MonitorConfig, spawner: TokioSpawner) -> Result<Monitor, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("monitor: {e}")))?;
    Ok(Monitor::with_spawner(cfg.clone(), spawner))
}

/// Build a monitor and a scheduler wired to it.
///
/// The monitor is only attached when `scheduler.enable_monitor` is set.
/// Neither component is started.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] when either section fails validation.
pub fn build_scheduler<T>(
    cfg: &ConcurrencyConfig,
    spawner: TokioSpawner,
) -> Result<(Monitor, Scheduler<T>), SchedulerError>
where
    T: Clone + Send + Sync + 'static,
{
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let monitor = build_monitor(&cfg.monitor, spawner.clone())?;
    let attached = cfg.scheduler.enable_monitor.then(|| monitor.clone());
    let scheduler = Scheduler::with_spawner(cfg.scheduler.clone(), attached, spawner)?;
    Ok((monitor, scheduler))
}
