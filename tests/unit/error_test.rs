//! Tests for error types

use std::time::Duration;

use prometheus_control_plane::core::{ControlPlaneError, ErrorKind, GatewayError};

#[test]
fn test_validation_error_display() {
    let err = ControlPlaneError::Validation("bad timezone".to_string());
    assert_eq!(format!("{err}"), "validation error: bad timezone");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_limit_error_display() {
    let err = ControlPlaneError::Limit("daily cap".to_string());
    assert_eq!(format!("{err}"), "limit exceeded: daily cap");
}

#[test]
fn test_gateway_error_is_transparent() {
    let err = ControlPlaneError::from(GatewayError::RemoteError("boom".to_string()));
    assert_eq!(format!("{err}"), "remote error: boom");
    assert_eq!(err.kind(), ErrorKind::Execution);
}

#[test]
fn test_timeout_is_retryable_infra() {
    let err = ControlPlaneError::from(GatewayError::Timeout(Duration::from_secs(1)));
    assert_eq!(err.kind(), ErrorKind::TransientInfra);
    assert!(err.is_retryable());
}

#[test]
fn test_backend_error() {
    let err = ControlPlaneError::Backend("connection failed".to_string());
    assert_eq!(format!("{err}"), "backend error: connection failed");
    assert!(!err.is_retryable());
}
