//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prometheus_control_plane::core::{
    CallContext, GatewayClient, GatewayError, MessagingEndpoint, Result, Tenant, TenantStatus,
    TenantStore, Update,
};
use prometheus_control_plane::infra::InMemoryStore;

/// Gateway answering from a script, falling back to `{"reply": "ok"}`.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<std::result::Result<serde_json::Value, GatewayError>>>,
    calls: Mutex<Vec<(String, String, serde_json::Value)>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, outcome: std::result::Result<serde_json::Value, GatewayError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// `(tenant_id, operation, args)` per call.
    pub fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GatewayClient for ScriptedGateway {
    async fn invoke(
        &self,
        tenant: &Tenant,
        operation: &str,
        args: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, GatewayError> {
        self.calls
            .lock()
            .push((tenant.id.clone(), operation.to_string(), args));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(serde_json::json!({ "reply": "ok" })))
    }
}

/// Messaging endpoint serving queued batches and recording replies.
#[derive(Default)]
pub struct FakeEndpoint {
    batches: Mutex<VecDeque<Result<Vec<Update>>>>,
    offsets: Mutex<Vec<i64>>,
    replies: Mutex<Vec<(String, String)>>,
}

impl FakeEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_batch(&self, batch: Result<Vec<Update>>) {
        self.batches.lock().push_back(batch);
    }

    /// Offsets passed to each fetch.
    pub fn fetched_offsets(&self) -> Vec<i64> {
        self.offsets.lock().clone()
    }

    /// `(chat_id, text)` per reply.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().clone()
    }
}

#[async_trait]
impl MessagingEndpoint for FakeEndpoint {
    async fn fetch_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        self.offsets.lock().push(offset);
        let next = self.batches.lock().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                // Long poll with nothing to deliver.
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_reply(&self, chat_id: &str, text: &str) -> Result<()> {
        self.replies
            .lock()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    rfc3339.parse().unwrap()
}

pub fn message(update_id: i64, sender_id: &str, text: &str) -> Update {
    Update {
        update_id,
        chat_id: format!("chat-{sender_id}"),
        sender_id: sender_id.to_string(),
        text: text.to_string(),
    }
}

/// Insert an active tenant reachable at `http://resource.local/{id}`.
pub async fn active_tenant(store: &InMemoryStore, id: &str, sender_id: &str, timezone: &str) -> Tenant {
    let mut tenant = Tenant::new(id, timezone, Utc::now()).with_sender(sender_id);
    tenant.status = TenantStatus::Active;
    tenant.resource_id = Some(format!("compute-{id}"));
    tenant.resource_endpoint = Some(format!("http://resource.local/{id}"));
    tenant.storage_id = Some(format!("storage-{id}"));
    store
        .create_tenant(&CallContext::service(), tenant)
        .await
        .unwrap()
}
