//! Audit sink implementations.
//!
//! Lifecycle transitions, run outcomes and lifecycle retries are recorded here
//! so operators can reconstruct what happened to a tenant.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::util::clock::now_ms;

/// One audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Tenant identifier.
    pub tenant: String,
    /// Subject of the action (tenant id, run id, lifecycle job id).
    pub subject: String,
    /// Action taken (`provisioned`, `run_succeeded`, `lifecycle_retry`, ...).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Destination for audit events. Recording never fails the audited operation.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink for testing and single-instance deployments.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events with the given action, oldest first.
    pub fn events_with_action(&self, action: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink emitting each event as an `info!` on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            event_id = %event.event_id,
            tenant_id = %event.tenant,
            subject = %event.subject,
            action = %event.action,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit event"
        );
    }
}

/// Sink that drops everything; used when no audit trail is configured.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Event stamped with a fresh id and the current time.
pub fn build_audit_event(
    tenant: impl Into<String>,
    subject: impl Into<String>,
    action: impl Into<String>,
    detail: Option<String>,
) -> AuditEvent {
    let subject = subject.into();
    let action = action.into();
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{subject}-{action}-{created_at_ms}-{}", uuid::Uuid::new_v4().simple()),
        tenant: tenant.into(),
        subject,
        action,
        created_at_ms,
        detail,
    }
}
