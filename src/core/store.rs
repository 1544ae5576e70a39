//! Persistence collaborator contract.
//!
//! Plain get/create/update semantics over tenants, automation definitions,
//! runs and usage. The one hard requirement is that [`RunStore::get_or_create_run`]
//! enforces uniqueness of `Run::idempotency_key` inside the store itself, in a
//! single transaction; the executor's single-flight guarantee rests on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::context::CallContext;
use crate::core::error::Result;
use crate::core::model::{AutomationDefinition, Run, Tenant, TenantStatus, UsageEvent};

/// Orchestrator-owned tenant fields to overwrite. `None` leaves a field as stored;
/// `Some(None)` clears a handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantPatch {
    /// Compute resource identifier.
    pub resource_id: Option<Option<String>>,
    /// Gateway endpoint of the compute resource.
    pub resource_endpoint: Option<Option<String>>,
    /// Identity handle.
    pub identity_id: Option<Option<String>>,
    /// Storage handle.
    pub storage_id: Option<Option<String>>,
    /// Credential hash.
    pub credential_hash: Option<Option<String>>,
    /// Configuration version written to the resource.
    pub config_version: Option<u64>,
    /// Requested configuration version.
    pub pending_config_version: Option<u64>,
}

impl TenantPatch {
    /// Every resource handle as currently held by `tenant`.
    pub fn handles_of(tenant: &Tenant) -> Self {
        Self {
            resource_id: Some(tenant.resource_id.clone()),
            resource_endpoint: Some(tenant.resource_endpoint.clone()),
            identity_id: Some(tenant.identity_id.clone()),
            storage_id: Some(tenant.storage_id.clone()),
            credential_hash: Some(tenant.credential_hash.clone()),
            config_version: None,
            pending_config_version: None,
        }
    }

    /// Write the set fields onto `tenant`.
    pub fn apply(&self, tenant: &mut Tenant) {
        fn set<T: Clone>(slot: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                slot.clone_from(value);
            }
        }
        set(&mut tenant.resource_id, self.resource_id.as_ref());
        set(&mut tenant.resource_endpoint, self.resource_endpoint.as_ref());
        set(&mut tenant.identity_id, self.identity_id.as_ref());
        set(&mut tenant.storage_id, self.storage_id.as_ref());
        set(&mut tenant.credential_hash, self.credential_hash.as_ref());
        set(&mut tenant.config_version, self.config_version.as_ref());
        set(&mut tenant.pending_config_version, self.pending_config_version.as_ref());
    }
}

/// Tenant rows.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Insert a new tenant. Fails with `Conflict` if the id exists.
    async fn create_tenant(&self, ctx: &CallContext, tenant: Tenant) -> Result<Tenant>;
    /// Fetch a tenant by id. Fails with `NotFound`.
    async fn get_tenant(&self, ctx: &CallContext, tenant_id: &str) -> Result<Tenant>;
    /// Resolve a messaging sender to its (non-deleted) tenant.
    async fn find_tenant_by_sender(
        &self,
        ctx: &CallContext,
        sender_id: &str,
    ) -> Result<Option<Tenant>>;
    /// Replace a tenant row.
    ///
    /// Overwrites every field, including counters other components maintain;
    /// component code uses the narrow operations below instead.
    async fn update_tenant(&self, ctx: &CallContext, tenant: &Tenant) -> Result<()>;
    /// Compare-and-set on status: if the stored status is one of `from`, set
    /// `to`, apply `patch` and return the updated row, all in one step.
    ///
    /// Fails with `Conflict` when the stored status is not in `from`.
    async fn transition_tenant(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        from: &[TenantStatus],
        to: TenantStatus,
        patch: &TenantPatch,
    ) -> Result<Tenant>;
    /// Move `last_run_at` forward to `at`; never backwards.
    async fn set_tenant_last_run_at(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Automation definition rows.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    /// Insert a new definition.
    async fn create_automation(
        &self,
        ctx: &CallContext,
        automation: AutomationDefinition,
    ) -> Result<AutomationDefinition>;
    /// Fetch a definition by id. Fails with `NotFound`.
    async fn get_automation(
        &self,
        ctx: &CallContext,
        automation_id: &str,
    ) -> Result<AutomationDefinition>;
    /// Replace a definition row.
    async fn update_automation(
        &self,
        ctx: &CallContext,
        automation: &AutomationDefinition,
    ) -> Result<()>;
    /// Active definitions with `next_run_at <= now`, ascending by `next_run_at`, at most `limit`.
    async fn list_due_automations(
        &self,
        ctx: &CallContext,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AutomationDefinition>>;
    /// All definitions of a tenant.
    async fn list_tenant_automations(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
    ) -> Result<Vec<AutomationDefinition>>;
}

/// Run rows.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Atomically return the run holding `run.idempotency_key`, inserting `run` if none.
    ///
    /// The boolean is `true` when `run` was inserted.
    async fn get_or_create_run(&self, ctx: &CallContext, run: Run) -> Result<(Run, bool)>;
    /// Replace a run row.
    async fn update_run(&self, ctx: &CallContext, run: &Run) -> Result<()>;
    /// Look a run up by idempotency key.
    async fn find_run_by_key(&self, ctx: &CallContext, idempotency_key: &str)
        -> Result<Option<Run>>;
    /// Non-skipped runs of a tenant with `from <= scheduled_for < to`.
    async fn count_runs_between(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u32>;
    /// Runs of an automation, oldest first.
    async fn list_runs(&self, ctx: &CallContext, automation_id: &str) -> Result<Vec<Run>>;
}

/// Usage ledger.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append a usage event and bump the tenant's quota counters.
    async fn record_usage(&self, ctx: &CallContext, event: UsageEvent) -> Result<()>;
}

/// Every store the control plane needs, behind one handle.
pub trait Persistence: TenantStore + AutomationStore + RunStore + UsageStore {}

impl<T> Persistence for T where T: TenantStore + AutomationStore + RunStore + UsageStore {}
