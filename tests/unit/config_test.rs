//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use task_warden::config::{ConcurrencyConfig, MonitorConfig, SchedulerConfig};
use task_warden::util::clock::MAX_CONFIG_SECS;

#[test]
fn test_monitor_config_validation() {
    assert!(MonitorConfig::default().validate().is_ok());
    assert!(MonitorConfig::default()
        .with_check_interval_secs(0.0)
        .validate()
        .is_err());
    assert!(MonitorConfig::default()
        .with_check_interval_secs(f64::NAN)
        .validate()
        .is_err());
    assert!(MonitorConfig::default()
        .with_grace_period_secs(-1.0)
        .validate()
        .is_err());
}

#[test]
fn test_scheduler_config_validation() {
    assert!(SchedulerConfig::default().validate().is_ok());
    assert!(SchedulerConfig::default()
        .with_max_concurrent(0)
        .validate()
        .is_err());
    assert!(SchedulerConfig::default()
        .with_shutdown_timeout_secs(-5.0)
        .validate()
        .is_err());
}

#[test]
fn test_huge_second_values_are_rejected() {
    let cases = [
        MonitorConfig::default().with_check_interval_secs(1e20),
        MonitorConfig::default().with_grace_period_secs(1e20),
        MonitorConfig::default().with_default_timeout_secs(1e20),
    ];
    for cfg in cases {
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("at most"), "unexpected error: {err}");
    }
    let err = SchedulerConfig::default()
        .with_shutdown_timeout_secs(1e20)
        .validate()
        .unwrap_err();
    assert!(err.contains("shutdown_timeout_secs"), "unexpected error: {err}");

    let err = ConcurrencyConfig::from_json_str(r#"{ "monitor": { "grace_period_secs": 1e20 } }"#)
        .unwrap_err();
    assert!(err.contains("grace_period_secs"), "unexpected error: {err}");
}

#[test]
fn test_infinite_default_timeout_means_unlimited() {
    let cfg = MonitorConfig::default().with_default_timeout_secs(f64::INFINITY);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.default_timeout(), None);
}

#[test]
fn test_duration_accessors_clamp_unvalidated_values() {
    let cap = Duration::from_secs_f64(MAX_CONFIG_SECS);
    let monitor = MonitorConfig::default()
        .with_check_interval_secs(1e20)
        .with_grace_period_secs(1e20)
        .with_default_timeout_secs(1e20);
    assert_eq!(monitor.check_interval(), cap);
    assert_eq!(monitor.grace_period(), cap);
    assert_eq!(monitor.default_timeout(), Some(cap));

    let scheduler = SchedulerConfig::default().with_shutdown_timeout_secs(1e20);
    assert_eq!(scheduler.shutdown_timeout(), cap);
    let scheduler = SchedulerConfig::default().with_shutdown_timeout_secs(f64::NAN);
    assert_eq!(scheduler.shutdown_timeout(), Duration::ZERO);
}

#[test]
fn test_zero_grace_period_is_allowed() {
    let cfg = MonitorConfig::default().with_grace_period_secs(0.0);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.grace_period(), Duration::ZERO);
}

#[test]
fn test_default_timeout_conversion() {
    let cfg = MonitorConfig::default();
    assert_eq!(cfg.default_timeout(), Some(Duration::from_secs(300)));
    let unlimited = cfg.with_default_timeout_secs(-1.0);
    assert_eq!(unlimited.default_timeout(), None);
}

#[test]
fn test_from_json_str_fills_missing_fields_with_defaults() {
    let cfg = ConcurrencyConfig::from_json_str(
        r#"{ "scheduler": { "max_concurrent": 2, "auto_cancel_on_timeout": true } }"#,
    )
    .unwrap();
    assert_eq!(cfg.scheduler.max_concurrent, 2);
    assert!(cfg.scheduler.auto_cancel_on_timeout);
    assert!(cfg.scheduler.enable_monitor);
    assert_eq!(cfg.monitor, MonitorConfig::default());
}

#[test]
fn test_from_json_str_rejects_invalid_values() {
    let err = ConcurrencyConfig::from_json_str(r#"{ "scheduler": { "max_concurrent": 0 } }"#)
        .unwrap_err();
    assert!(err.contains("max_concurrent"), "unexpected error: {err}");

    let err = ConcurrencyConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "unexpected error: {err}");
}

#[test]
fn test_from_lookup_reads_prefixed_variables() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("TASK_WARDEN_CHECK_INTERVAL_SECS", "0.25"),
        ("TASK_WARDEN_ENABLE_TIMEOUT_CHECK", "false"),
        ("TASK_WARDEN_MAX_CONCURRENT", " 4 "),
        ("MAX_CONCURRENT", "99"),
    ]);
    let cfg = ConcurrencyConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()))
        .unwrap();
    assert_eq!(cfg.monitor.check_interval(), Duration::from_millis(250));
    assert!(!cfg.monitor.enable_timeout_check);
    assert_eq!(cfg.scheduler.max_concurrent, 4);
}

#[test]
fn test_config_round_trips_through_json() {
    let cfg = ConcurrencyConfig {
        monitor: MonitorConfig::default().with_auto_start(true),
        scheduler: SchedulerConfig::default().with_monitor(false),
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(ConcurrencyConfig::from_json_str(&json).unwrap(), cfg);
}
