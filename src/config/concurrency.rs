//! Monitor and scheduler configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::clock::{secs_to_duration, secs_to_timeout, MAX_CONFIG_SECS};

/// Prefix for environment overrides read by [`ConcurrencyConfig::from_env`].
pub const ENV_PREFIX: &str = "TASK_WARDEN_";

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between polling ticks.
    pub check_interval_secs: f64,
    /// Timeout applied to records registered without one. `<= 0` disables it.
    pub default_timeout_secs: f64,
    /// Seconds a terminal record is kept before it is purged.
    pub grace_period_secs: f64,
    /// Whether the polling loop flags timed-out records at all.
    pub enable_timeout_check: bool,
    /// Start the polling loop on the first `register` instead of failing.
    pub auto_start: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 1.0,
            default_timeout_secs: 300.0,
            grace_period_secs: 60.0,
            enable_timeout_check: true,
            auto_start: false,
        }
    }
}

impl MonitorConfig {
    /// Validate monitor configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.check_interval_secs.is_finite() || self.check_interval_secs <= 0.0 {
            return Err("check_interval_secs must be a positive number".into());
        }
        if !self.grace_period_secs.is_finite() || self.grace_period_secs < 0.0 {
            return Err("grace_period_secs must be zero or positive".into());
        }
        if self.default_timeout_secs.is_nan() {
            return Err("default_timeout_secs must be a number".into());
        }
        check_upper_bound("check_interval_secs", self.check_interval_secs)?;
        check_upper_bound("grace_period_secs", self.grace_period_secs)?;
        if self.default_timeout_secs.is_finite() {
            check_upper_bound("default_timeout_secs", self.default_timeout_secs)?;
        }
        Ok(())
    }

    /// Polling interval.
    pub fn check_interval(&self) -> Duration {
        secs_to_duration(self.check_interval_secs.max(0.001))
    }

    /// Default per-record timeout, `None` when unlimited.
    pub fn default_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.default_timeout_secs)
    }

    /// Retention window for terminal records.
    pub fn grace_period(&self) -> Duration {
        secs_to_duration(self.grace_period_secs)
    }

    /// Set the polling interval.
    #[must_use]
    pub fn with_check_interval_secs(mut self, secs: f64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    /// Set the default record timeout.
    #[must_use]
    pub fn with_default_timeout_secs(mut self, secs: f64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Set the terminal-record grace period.
    #[must_use]
    pub fn with_grace_period_secs(mut self, secs: f64) -> Self {
        self.grace_period_secs = secs;
        self
    }

    /// Enable or disable timeout detection.
    #[must_use]
    pub fn with_timeout_check(mut self, enabled: bool) -> Self {
        self.enable_timeout_check = enabled;
        self
    }

    /// Enable or disable lazy start on first registration.
    #[must_use]
    pub fn with_auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = enabled;
        self
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks in `Running` at once.
    pub max_concurrent: usize,
    /// Cancel a task when the monitor reports it timed out.
    pub auto_cancel_on_timeout: bool,
    /// Register running tasks with the monitor (when one is attached).
    pub enable_monitor: bool,
    /// How long `stop(false)` waits for running tasks before cancelling them.
    pub shutdown_timeout_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            auto_cancel_on_timeout: false,
            enable_monitor: true,
            shutdown_timeout_secs: 30.0,
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".into());
        }
        if !self.shutdown_timeout_secs.is_finite() || self.shutdown_timeout_secs < 0.0 {
            return Err("shutdown_timeout_secs must be zero or positive".into());
        }
        check_upper_bound("shutdown_timeout_secs", self.shutdown_timeout_secs)?;
        Ok(())
    }

    /// Grace period granted to running tasks by a non-cancelling stop.
    pub fn shutdown_timeout(&self) -> Duration {
        secs_to_duration(self.shutdown_timeout_secs)
    }

    /// Set the concurrency cap.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Enable or disable cancellation on monitor timeout.
    #[must_use]
    pub fn with_auto_cancel_on_timeout(mut self, enabled: bool) -> Self {
        self.auto_cancel_on_timeout = enabled;
        self
    }

    /// Enable or disable monitor registration.
    #[must_use]
    pub fn with_monitor(mut self, enabled: bool) -> Self {
        self.enable_monitor = enabled;
        self
    }

    /// Set the shutdown wait.
    #[must_use]
    pub fn with_shutdown_timeout_secs(mut self, secs: f64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }
}

fn check_upper_bound(field: &str, secs: f64) -> Result<(), String> {
    if secs > MAX_CONFIG_SECS {
        return Err(format!("{field} must be at most {MAX_CONFIG_SECS} seconds"));
    }
    Ok(())
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Monitor settings.
    pub monitor: MonitorConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
}

impl ConcurrencyConfig {
    /// Validate both sections.
    pub fn validate(&self) -> Result<(), String> {
        self.monitor
            .validate()
            .map_err(|e| format!("monitor invalid: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overridden by environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Recognised variables (all prefixed with `TASK_WARDEN_`):
    /// `CHECK_INTERVAL_SECS`, `DEFAULT_TIMEOUT_SECS`, `GRACE_PERIOD_SECS`,
    /// `ENABLE_TIMEOUT_CHECK`, `AUTO_START`, `MAX_CONCURRENT`,
    /// `AUTO_CANCEL_ON_TIMEOUT`, `ENABLE_MONITOR`, `SHUTDOWN_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = get("CHECK_INTERVAL_SECS") {
            cfg.monitor.check_interval_secs = parse_value("CHECK_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("DEFAULT_TIMEOUT_SECS") {
            cfg.monitor.default_timeout_secs = parse_value("DEFAULT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("GRACE_PERIOD_SECS") {
            cfg.monitor.grace_period_secs = parse_value("GRACE_PERIOD_SECS", &v)?;
        }
        if let Some(v) = get("ENABLE_TIMEOUT_CHECK") {
            cfg.monitor.enable_timeout_check = parse_value("ENABLE_TIMEOUT_CHECK", &v)?;
        }
        if let Some(v) = get("AUTO_START") {
            cfg.monitor.auto_start = parse_value("AUTO_START", &v)?;
        }
        if let Some(v) = get("MAX_CONCURRENT") {
            cfg.scheduler.max_concurrent = parse_value("MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = get("AUTO_CANCEL_ON_TIMEOUT") {
            cfg.scheduler.auto_cancel_on_timeout = parse_value("AUTO_CANCEL_ON_TIMEOUT", &v)?;
        }
        if let Some(v) = get("ENABLE_MONITOR") {
            cfg.scheduler.enable_monitor = parse_value("ENABLE_MONITOR", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_TIMEOUT_SECS") {
            cfg.scheduler.shutdown_timeout_secs = parse_value("SHUTDOWN_TIMEOUT_SECS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| format!("{ENV_PREFIX}{name}: {e}"))
}
