//! Gateway client over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::core::gateway::{
    GatewayClient, GatewayError, InvokeRequest, InvokeResponse, TokenBroker,
    GATEWAY_TOKEN_PROVIDER,
};
use crate::core::model::Tenant;

/// Posts `{operation, args}` to `{endpoint}/operations/invoke` with a bearer token.
#[derive(Clone)]
pub struct HttpGatewayClient {
    client: reqwest::Client,
    broker: Arc<dyn TokenBroker>,
    timeout: Duration,
}

impl HttpGatewayClient {
    /// Client whose requests give up after `timeout`.
    pub fn new(broker: Arc<dyn TokenBroker>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            broker,
            timeout,
        }
    }

    fn invoke_url(endpoint: &str) -> String {
        format!("{}/operations/invoke", endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn invoke(
        &self,
        tenant: &Tenant,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let endpoint = tenant.resource_endpoint.as_deref().ok_or_else(|| {
            GatewayError::Unreachable(format!("tenant `{}` has no resource endpoint", tenant.id))
        })?;
        let token = self
            .broker
            .get_valid_token(&tenant.id, GATEWAY_TOKEN_PROVIDER)
            .await
            .map_err(|e| GatewayError::Unauthenticated(e.to_string()))?;

        debug!(tenant_id = %tenant.id, operation, "invoking gateway");
        let response = self
            .client
            .post(Self::invoke_url(endpoint))
            .bearer_auth(token)
            .json(&InvokeRequest {
                operation: operation.to_string(),
                args,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout)
                } else {
                    GatewayError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(GatewayError::Unauthenticated(format!(
                "gateway rejected credential ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::RemoteError(format!("gateway returned {status}: {body}")));
        }

        let body: InvokeResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.timeout)
            } else {
                GatewayError::RemoteError(format!("invalid gateway response: {e}"))
            }
        })?;
        if body.ok {
            Ok(body.result.unwrap_or(serde_json::Value::Null))
        } else {
            Err(GatewayError::RemoteError(
                body.error
                    .unwrap_or_else(|| "operation failed without a message".to_string()),
            ))
        }
    }
}
