//! Tests for utility functions

use std::time::Duration;

use chrono::{TimeZone, Utc};
use prometheus_control_plane::util::{ms_to_utc, utc_to_ms, Backoff};

#[test]
fn test_backoff_resets_after_success() {
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
    assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    backoff.reset();
    assert_eq!(backoff.next_delay(), Duration::from_millis(100));
}

#[test]
fn test_initial_above_ceiling_is_clamped() {
    let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
    assert_eq!(backoff.next_delay(), Duration::from_secs(1));
}

#[test]
fn test_clock_conversion() {
    let at = Utc.with_ymd_and_hms(2026, 3, 8, 7, 30, 0).unwrap();
    assert_eq!(utc_to_ms(at), 1_772_955_000_000);
    assert_eq!(ms_to_utc(1_772_955_000_000), at);
}

#[test]
fn test_init_tracing_is_idempotent() {
    prometheus_control_plane::util::init_tracing();
    prometheus_control_plane::util::init_tracing_with("debug");
    tracing::info!(target: "prometheus_control_plane", "tracing ready");
}
