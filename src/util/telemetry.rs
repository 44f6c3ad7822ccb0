//! Telemetry helpers for structured logging.
//!
//! The monitor and scheduler only emit `tracing` events; installing a
//! subscriber is left to the embedding application. These helpers cover the
//! common case for binaries.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted for the default log filter.
pub const LOG_ENV: &str = "TASK_WARDEN_LOG";

/// Install an env-filtered `fmt` subscriber if none is set yet.
///
/// The filter comes from `TASK_WARDEN_LOG`, then `RUST_LOG`, then `info`.
pub fn init_tracing() {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    init_tracing_with(&filter);
}

/// Install a subscriber with an explicit filter directive. Invalid
/// directives fall back to `info`. Calling this more than once is harmless.
pub fn init_tracing_with(directives: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
