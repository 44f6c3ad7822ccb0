//! Wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Largest seconds value accepted anywhere in configuration (100 years).
pub const MAX_CONFIG_SECS: f64 = 100.0 * 365.0 * 24.0 * 3600.0;

/// Milliseconds since the Unix epoch. Returns 0 if the system clock is set
/// before the epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Convert a seconds value from configuration into a `Duration`, clamped to
/// `0..=MAX_CONFIG_SECS`. NaN maps to zero.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_CONFIG_SECS)).unwrap_or(Duration::ZERO)
}

/// Convert a seconds value from configuration into an optional timeout.
///
/// Non-positive and non-finite values mean "no timeout".
pub fn secs_to_timeout(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(secs_to_duration(secs))
    } else {
        None
    }
}
