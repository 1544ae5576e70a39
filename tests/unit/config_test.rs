//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_control_plane::config::{
    ControlPlaneConfig, GatewayConfig, QueueBackendConfig, RouterConfig, MAX_WINDOW_SECS,
};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let config = ControlPlaneConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.scheduler.batch_limit, 50);
    assert_eq!(config.executor.min_interval_secs, 900);
    assert_eq!(config.router.cache_ttl_secs, 300);
    assert_eq!(config.router.rate_window_secs, 60);
    assert_eq!(config.lifecycle.queue_depth, 1024);
    assert!((1..=4).contains(&config.lifecycle.worker_count));
}

#[test]
fn test_partial_json_keeps_other_defaults() {
    let config = ControlPlaneConfig::from_json_str(
        r#"{"router": {"rate_limit": 5}, "gateway": {"timeout_secs": 10}}"#,
    )
    .unwrap();
    assert_eq!(config.router.rate_limit, 5);
    assert_eq!(config.router.poll_timeout_secs, 30);
    assert_eq!(config.gateway.timeout(), Duration::from_secs(10));
}

#[test]
fn test_invalid_json_reports_parse_error() {
    let err = ControlPlaneConfig::from_json_str("{not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_zero_rate_limit_is_rejected() {
    let err = ControlPlaneConfig::from_json_str(r#"{"router": {"rate_limit": 0}}"#).unwrap_err();
    assert!(err.contains("router invalid"));
}

#[test]
fn test_oversized_windows_are_rejected() {
    let window = RouterConfig {
        rate_window_secs: MAX_WINDOW_SECS + 1,
        ..RouterConfig::default()
    };
    assert!(window.validate().unwrap_err().contains("rate_window_secs"));

    let ttl = RouterConfig {
        cache_ttl_secs: u64::MAX,
        ..RouterConfig::default()
    };
    assert!(ttl.validate().unwrap_err().contains("cache_ttl_secs"));

    let at_bound = RouterConfig {
        rate_window_secs: MAX_WINDOW_SECS,
        cache_ttl_secs: MAX_WINDOW_SECS,
        ..RouterConfig::default()
    };
    assert!(at_bound.validate().is_ok());
}

#[test]
fn test_zero_prune_interval_is_rejected() {
    let config = RouterConfig {
        prune_interval_secs: 0,
        ..RouterConfig::default()
    };
    assert!(config.validate().unwrap_err().contains("prune_interval_secs"));
}

#[test]
fn test_env_overrides() {
    let config = ControlPlaneConfig::from_lookup(lookup(&[
        ("CONTROL_PLANE_SCHEDULER_BATCH_LIMIT", "10"),
        ("CONTROL_PLANE_ROUTER_RATE_LIMIT", "3"),
        ("CONTROL_PLANE_GATEWAY_TIMEOUT_SECS", "5"),
        ("CONTROL_PLANE_LIFECYCLE_QUEUE", "file"),
        ("CONTROL_PLANE_LIFECYCLE_QUEUE_PATH", "/tmp/lifecycle"),
    ]))
    .unwrap();
    assert_eq!(config.scheduler.batch_limit, 10);
    assert_eq!(config.router.rate_limit, 3);
    assert_eq!(config.gateway.timeout_secs, 5);
    assert_eq!(config.lifecycle.queue, QueueBackendConfig::File);
}

#[test]
fn test_env_parse_failure_names_variable() {
    let err = ControlPlaneConfig::from_lookup(lookup(&[("CONTROL_PLANE_EXECUTOR_DAILY_CAP", "many")]))
        .unwrap_err();
    assert!(err.contains("CONTROL_PLANE_EXECUTOR_DAILY_CAP"));
}

#[test]
fn test_router_settings_use_gateway_timeout() {
    let router = RouterConfig::default();
    let gateway = GatewayConfig { timeout_secs: 12 };
    let settings = router.settings(&gateway);
    assert_eq!(settings.forward_timeout, Duration::from_secs(12));
    assert_eq!(settings.backoff_initial, Duration::from_secs(1));
    assert_eq!(settings.backoff_max, Duration::from_secs(60));
}
