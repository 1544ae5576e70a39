//! Explicit caller context threaded through every store and service call.

use uuid::Uuid;

use crate::core::error::{ControlPlaneError, Result};
use crate::core::model::TenantId;

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Internal service role (scheduler, router, lifecycle worker). Unrestricted.
    Service,
    /// A tenant acting on its own rows.
    Tenant(TenantId),
}

/// Per-call context.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Acting principal.
    pub actor: Actor,
    /// Correlation id for logs and audit events.
    pub request_id: String,
}

impl CallContext {
    /// Service-role context with a fresh request id.
    pub fn service() -> Self {
        Self {
            actor: Actor::Service,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Tenant-scoped context with a fresh request id.
    pub fn tenant(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            actor: Actor::Tenant(tenant_id.into()),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Check that the actor may touch rows belonging to `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Auth`] when a tenant reaches into another tenant's rows.
    pub fn authorize(&self, tenant_id: &str) -> Result<()> {
        match &self.actor {
            Actor::Service => Ok(()),
            Actor::Tenant(own) if own == tenant_id => Ok(()),
            Actor::Tenant(own) => Err(ControlPlaneError::Auth(format!(
                "tenant `{own}` may not access rows of tenant `{tenant_id}`"
            ))),
        }
    }

    /// True for the service role.
    pub const fn is_service(&self) -> bool {
        matches!(self.actor, Actor::Service)
    }
}
