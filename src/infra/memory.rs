//! In-memory persistence for tests and single-instance deployments.
//!
//! One `parking_lot::Mutex` guards every table; holding it is the transaction
//! boundary, which is what makes `get_or_create_run` atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::context::CallContext;
use crate::core::error::{ControlPlaneError, Result};
use crate::core::model::{
    AutomationDefinition, AutomationId, AutomationStatus, Run, RunId, RunStatus, Tenant,
    TenantId, TenantStatus, UsageEvent,
};
use crate::core::store::{AutomationStore, RunStore, TenantPatch, TenantStore, UsageStore};
use crate::util::clock::now_utc;

#[derive(Default)]
struct Tables {
    tenants: HashMap<TenantId, Tenant>,
    automations: HashMap<AutomationId, AutomationDefinition>,
    runs: HashMap<RunId, Run>,
    run_keys: HashMap<String, RunId>,
    usage: Vec<UsageEvent>,
}

/// Every store behind one lock.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all runs, oldest first.
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.tables.lock().runs.values().cloned().collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    /// Snapshot of the usage ledger.
    pub fn usage_events(&self) -> Vec<UsageEvent> {
        self.tables.lock().usage.clone()
    }
}

fn not_found(what: &str, id: &str) -> ControlPlaneError {
    ControlPlaneError::NotFound(format!("{what} `{id}`"))
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn create_tenant(&self, ctx: &CallContext, tenant: Tenant) -> Result<Tenant> {
        ctx.authorize(&tenant.id)?;
        let mut tables = self.tables.lock();
        if tables.tenants.contains_key(&tenant.id) {
            return Err(ControlPlaneError::Conflict(format!(
                "tenant `{}` already exists",
                tenant.id
            )));
        }
        tables.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, ctx: &CallContext, tenant_id: &str) -> Result<Tenant> {
        ctx.authorize(tenant_id)?;
        self.tables
            .lock()
            .tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| not_found("tenant", tenant_id))
    }

    async fn find_tenant_by_sender(
        &self,
        ctx: &CallContext,
        sender_id: &str,
    ) -> Result<Option<Tenant>> {
        let found = self
            .tables
            .lock()
            .tenants
            .values()
            .find(|t| {
                t.status != TenantStatus::Deleted && t.sender_ids.iter().any(|s| s == sender_id)
            })
            .cloned();
        if let Some(tenant) = &found {
            ctx.authorize(&tenant.id)?;
        }
        Ok(found)
    }

    async fn update_tenant(&self, ctx: &CallContext, tenant: &Tenant) -> Result<()> {
        ctx.authorize(&tenant.id)?;
        let mut tables = self.tables.lock();
        let slot = tables
            .tenants
            .get_mut(&tenant.id)
            .ok_or_else(|| not_found("tenant", &tenant.id))?;
        *slot = tenant.clone();
        Ok(())
    }

    async fn transition_tenant(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        from: &[TenantStatus],
        to: TenantStatus,
        patch: &TenantPatch,
    ) -> Result<Tenant> {
        ctx.authorize(tenant_id)?;
        let mut tables = self.tables.lock();
        let slot = tables
            .tenants
            .get_mut(tenant_id)
            .ok_or_else(|| not_found("tenant", tenant_id))?;
        if !from.contains(&slot.status) {
            return Err(ControlPlaneError::Conflict(format!(
                "tenant `{tenant_id}` is {}, expected one of {from:?}",
                slot.status
            )));
        }
        slot.status = to;
        patch.apply(slot);
        slot.updated_at = now_utc();
        Ok(slot.clone())
    }

    async fn set_tenant_last_run_at(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        ctx.authorize(tenant_id)?;
        let mut tables = self.tables.lock();
        let slot = tables
            .tenants
            .get_mut(tenant_id)
            .ok_or_else(|| not_found("tenant", tenant_id))?;
        slot.last_run_at = Some(slot.last_run_at.map_or(at, |last| last.max(at)));
        slot.updated_at = now_utc();
        Ok(())
    }
}

#[async_trait]
impl AutomationStore for InMemoryStore {
    async fn create_automation(
        &self,
        ctx: &CallContext,
        automation: AutomationDefinition,
    ) -> Result<AutomationDefinition> {
        ctx.authorize(&automation.tenant_id)?;
        let mut tables = self.tables.lock();
        if !tables.tenants.contains_key(&automation.tenant_id) {
            return Err(not_found("tenant", &automation.tenant_id));
        }
        if tables.automations.contains_key(&automation.id) {
            return Err(ControlPlaneError::Conflict(format!(
                "automation `{}` already exists",
                automation.id
            )));
        }
        tables
            .automations
            .insert(automation.id.clone(), automation.clone());
        Ok(automation)
    }

    async fn get_automation(
        &self,
        ctx: &CallContext,
        automation_id: &str,
    ) -> Result<AutomationDefinition> {
        let automation = self
            .tables
            .lock()
            .automations
            .get(automation_id)
            .cloned()
            .ok_or_else(|| not_found("automation", automation_id))?;
        ctx.authorize(&automation.tenant_id)?;
        Ok(automation)
    }

    async fn update_automation(
        &self,
        ctx: &CallContext,
        automation: &AutomationDefinition,
    ) -> Result<()> {
        ctx.authorize(&automation.tenant_id)?;
        let mut tables = self.tables.lock();
        let slot = tables
            .automations
            .get_mut(&automation.id)
            .ok_or_else(|| not_found("automation", &automation.id))?;
        if slot.tenant_id != automation.tenant_id {
            return Err(ControlPlaneError::Conflict(format!(
                "automation `{}` cannot change tenant",
                automation.id
            )));
        }
        *slot = automation.clone();
        Ok(())
    }

    async fn list_due_automations(
        &self,
        ctx: &CallContext,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AutomationDefinition>> {
        let mut due: Vec<AutomationDefinition> = self
            .tables
            .lock()
            .automations
            .values()
            .filter(|a| a.status == AutomationStatus::Active)
            .filter(|a| a.next_run_at.is_some_and(|at| at <= now))
            .filter(|a| ctx.authorize(&a.tenant_id).is_ok())
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then_with(|| a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn list_tenant_automations(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
    ) -> Result<Vec<AutomationDefinition>> {
        ctx.authorize(tenant_id)?;
        let mut list: Vec<AutomationDefinition> = self
            .tables
            .lock()
            .automations
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.created_at);
        Ok(list)
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn get_or_create_run(&self, ctx: &CallContext, run: Run) -> Result<(Run, bool)> {
        ctx.authorize(&run.tenant_id)?;
        let mut tables = self.tables.lock();
        if let Some(existing) = tables
            .run_keys
            .get(&run.idempotency_key)
            .and_then(|id| tables.runs.get(id))
        {
            return Ok((existing.clone(), false));
        }
        if tables.runs.contains_key(&run.id) {
            return Err(ControlPlaneError::Conflict(format!(
                "run `{}` already exists",
                run.id
            )));
        }
        tables
            .run_keys
            .insert(run.idempotency_key.clone(), run.id.clone());
        tables.runs.insert(run.id.clone(), run.clone());
        Ok((run, true))
    }

    async fn update_run(&self, ctx: &CallContext, run: &Run) -> Result<()> {
        ctx.authorize(&run.tenant_id)?;
        let mut tables = self.tables.lock();
        let slot = tables
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| not_found("run", &run.id))?;
        if slot.idempotency_key != run.idempotency_key {
            return Err(ControlPlaneError::Conflict(format!(
                "run `{}` cannot change idempotency key",
                run.id
            )));
        }
        *slot = run.clone();
        Ok(())
    }

    async fn find_run_by_key(
        &self,
        ctx: &CallContext,
        idempotency_key: &str,
    ) -> Result<Option<Run>> {
        let tables = self.tables.lock();
        let found = tables
            .run_keys
            .get(idempotency_key)
            .and_then(|id| tables.runs.get(id))
            .cloned();
        drop(tables);
        if let Some(run) = &found {
            ctx.authorize(&run.tenant_id)?;
        }
        Ok(found)
    }

    async fn count_runs_between(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u32> {
        ctx.authorize(tenant_id)?;
        let count = self
            .tables
            .lock()
            .runs
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.status != RunStatus::Skipped)
            .filter(|r| r.scheduled_for >= from && r.scheduled_for < to)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_runs(&self, ctx: &CallContext, automation_id: &str) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .tables
            .lock()
            .runs
            .values()
            .filter(|r| r.automation_id == automation_id)
            .filter(|r| ctx.authorize(&r.tenant_id).is_ok())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn record_usage(&self, ctx: &CallContext, event: UsageEvent) -> Result<()> {
        ctx.authorize(&event.tenant_id)?;
        let mut tables = self.tables.lock();
        let tenant = tables
            .tenants
            .get_mut(&event.tenant_id)
            .ok_or_else(|| not_found("tenant", &event.tenant_id))?;
        tenant.tokens_this_month = tenant.tokens_this_month.saturating_add(event.total_tokens());
        tenant.last_message_at = Some(event.recorded_at);
        tenant.updated_at = event.recorded_at;
        tables.usage.push(event);
        Ok(())
    }
}
