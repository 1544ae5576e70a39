//! Token broker backed by a fixed map.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::error::{ControlPlaneError, Result};
use crate::core::gateway::TokenBroker;

/// Broker returning pre-registered tokens, keyed by `(tenant, provider)`.
#[derive(Default)]
pub struct StaticTokenBroker {
    tokens: RwLock<HashMap<(String, String), String>>,
}

impl StaticTokenBroker {
    /// Empty broker; every lookup fails until a token is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` for `tenant_id`/`provider`.
    pub fn insert(&self, tenant_id: &str, provider: &str, token: impl Into<String>) {
        self.tokens
            .write()
            .insert((tenant_id.to_string(), provider.to_string()), token.into());
    }

    /// Revoke the token of `tenant_id`/`provider`.
    pub fn revoke(&self, tenant_id: &str, provider: &str) {
        self.tokens
            .write()
            .remove(&(tenant_id.to_string(), provider.to_string()));
    }
}

#[async_trait]
impl TokenBroker for StaticTokenBroker {
    async fn get_valid_token(&self, tenant_id: &str, provider: &str) -> Result<String> {
        self.tokens
            .read()
            .get(&(tenant_id.to_string(), provider.to_string()))
            .cloned()
            .ok_or_else(|| {
                ControlPlaneError::Auth(format!("no valid `{provider}` token for tenant `{tenant_id}`"))
            })
    }
}
