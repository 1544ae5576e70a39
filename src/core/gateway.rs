//! Gateway client contract.
//!
//! Callers branch only on [`GatewayError`]; transport detail never leaks past
//! the implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::Result;
use crate::core::model::Tenant;

/// Provider name used when asking the token broker for gateway credentials.
pub const GATEWAY_TOKEN_PROVIDER: &str = "gateway";

/// Categorized gateway failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Resource could not be reached.
    #[error("resource unreachable: {0}")]
    Unreachable(String),
    /// Call did not finish within its bound. A refinement of `Unreachable`.
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
    /// Credential could not be obtained or was rejected.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Resource ran the operation and reported an error.
    #[error("remote error: {0}")]
    RemoteError(String),
}

/// Three-way taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCategory {
    /// Includes timeouts.
    Unreachable,
    /// Credential failures.
    Unauthenticated,
    /// Remote operation failures.
    RemoteError,
}

impl GatewayError {
    /// Category of this error.
    pub const fn category(&self) -> GatewayErrorCategory {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => GatewayErrorCategory::Unreachable,
            Self::Unauthenticated(_) => GatewayErrorCategory::Unauthenticated,
            Self::RemoteError(_) => GatewayErrorCategory::RemoteError,
        }
    }
}

/// Wire body of `POST /operations/invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Operation name.
    pub operation: String,
    /// Operation arguments.
    pub args: serde_json::Value,
}

/// Wire response of `POST /operations/invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Result when `ok`.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error message when not `ok`.
    #[serde(default)]
    pub error: Option<String>,
}

/// Short-lived credential source.
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Return a currently valid token for `tenant_id` and `provider`.
    async fn get_valid_token(&self, tenant_id: &str, provider: &str) -> Result<String>;
}

/// RPC client for a tenant's live resource.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Invoke `operation` on the tenant's resource.
    async fn invoke(
        &self,
        tenant: &Tenant,
        operation: &str,
        args: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, GatewayError>;
}

/// Invoke with a hard upper bound, mapping elapsed time to [`GatewayError::Timeout`].
///
/// # Errors
///
/// Propagates the client's error, or `Timeout` when `timeout` elapses first.
pub async fn invoke_with_timeout(
    client: &dyn GatewayClient,
    tenant: &Tenant,
    operation: &str,
    args: serde_json::Value,
    timeout: Duration,
) -> std::result::Result<serde_json::Value, GatewayError> {
    tokio::time::timeout(timeout, client.invoke(tenant, operation, args))
        .await
        .unwrap_or(Err(GatewayError::Timeout(timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct SlowClient;

    #[async_trait]
    impl GatewayClient for SlowClient {
        async fn invoke(
            &self,
            _tenant: &Tenant,
            _operation: &str,
            _args: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, GatewayError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_bound_becomes_timeout() {
        let tenant = Tenant::new("t1", "UTC", Utc::now());
        let err = invoke_with_timeout(
            &SlowClient,
            &tenant,
            "noop",
            serde_json::Value::Null,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err, GatewayError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.category(), GatewayErrorCategory::Unreachable);
    }
}
