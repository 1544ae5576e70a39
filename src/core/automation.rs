//! Tenant-facing management of automation definitions.
//!
//! Schedules are validated when they are defined: a definition that cannot
//! produce a next run is rejected here rather than discovered by the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::core::context::CallContext;
use crate::core::error::Result;
use crate::core::model::{
    AutomationDefinition, AutomationStatus, QuietHours, ScheduleSpec, Tenant, TenantId,
};
use crate::core::orchestrator::JobSeeder;
use crate::core::scheduler::{compute_next_run, parse_time_of_day};
use crate::core::store::Persistence;
use crate::util::clock::now_utc;

/// Input for [`AutomationService::create`].
#[derive(Debug, Clone)]
pub struct NewAutomation {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Job kind.
    pub kind: String,
    /// Recurrence.
    pub schedule: ScheduleSpec,
    /// Reserved quiet-hours window.
    pub quiet_hours: Option<QuietHours>,
    /// Job instructions.
    pub payload: serde_json::Value,
}

/// Create/edit/pause/resume automation definitions.
pub struct AutomationService {
    store: Arc<dyn Persistence>,
}

impl AutomationService {
    /// Service over `store`.
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Validate and store a new active definition.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad schedule or quiet-hours window, `Auth` for a
    /// cross-tenant call, store failures otherwise.
    pub async fn create(
        &self,
        ctx: &CallContext,
        input: NewAutomation,
        now: DateTime<Utc>,
    ) -> Result<AutomationDefinition> {
        ctx.authorize(&input.tenant_id)?;
        if let Some(quiet) = &input.quiet_hours {
            validate_quiet_hours(quiet)?;
        }
        let next_run_at = compute_next_run(&input.schedule, now)?;
        let automation = AutomationDefinition {
            id: Uuid::new_v4().to_string(),
            tenant_id: input.tenant_id,
            kind: input.kind,
            status: AutomationStatus::Active,
            schedule: input.schedule,
            quiet_hours: input.quiet_hours,
            payload: input.payload,
            last_run_at: None,
            next_run_at: Some(next_run_at),
            created_at: now,
            updated_at: now,
        };
        let created = self.store.create_automation(ctx, automation).await?;
        info!(
            automation_id = %created.id,
            tenant_id = %created.tenant_id,
            next_run_at = %next_run_at,
            "automation created"
        );
        Ok(created)
    }

    /// Replace the schedule and recompute `next_run_at` from `now`.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad schedule; `NotFound`/`Auth`/store failures otherwise.
    pub async fn update_schedule(
        &self,
        ctx: &CallContext,
        automation_id: &str,
        schedule: ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<AutomationDefinition> {
        let mut automation = self.load(ctx, automation_id).await?;
        let next_run_at = compute_next_run(&schedule, now)?;
        automation.schedule = schedule;
        if automation.status == AutomationStatus::Active {
            automation.next_run_at = Some(next_run_at);
        }
        automation.updated_at = now;
        self.store.update_automation(ctx, &automation).await?;
        Ok(automation)
    }

    /// Stop scheduling. Manual runs remain possible.
    ///
    /// # Errors
    ///
    /// `NotFound`/`Auth`/store failures.
    pub async fn pause(
        &self,
        ctx: &CallContext,
        automation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AutomationDefinition> {
        let mut automation = self.load(ctx, automation_id).await?;
        automation.status = AutomationStatus::Paused;
        automation.next_run_at = None;
        automation.updated_at = now;
        self.store.update_automation(ctx, &automation).await?;
        Ok(automation)
    }

    /// Resume scheduling from `now`; ticks missed while paused are not replayed.
    ///
    /// # Errors
    ///
    /// `Validation` if the stored schedule no longer resolves; `NotFound`/`Auth`/store failures.
    pub async fn resume(
        &self,
        ctx: &CallContext,
        automation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AutomationDefinition> {
        let mut automation = self.load(ctx, automation_id).await?;
        automation.next_run_at = Some(compute_next_run(&automation.schedule, now)?);
        automation.status = AutomationStatus::Active;
        automation.updated_at = now;
        self.store.update_automation(ctx, &automation).await?;
        Ok(automation)
    }

    async fn load(&self, ctx: &CallContext, automation_id: &str) -> Result<AutomationDefinition> {
        let automation = self.store.get_automation(ctx, automation_id).await?;
        ctx.authorize(&automation.tenant_id)?;
        Ok(automation)
    }
}

/// Kind of the job every new tenant starts with.
pub const DAILY_BRIEFING_KIND: &str = "daily-briefing";
/// Local time of the seeded briefing.
pub const DAILY_BRIEFING_TIME: &str = "08:00";

/// Seeds a daily briefing at 08:00 in the tenant's timezone.
///
/// Seeding is skipped when the tenant already has a job of that kind, so a
/// re-provisioned tenant does not end up with duplicates.
pub struct DefaultJobSeeder {
    service: AutomationService,
    store: Arc<dyn Persistence>,
}

impl DefaultJobSeeder {
    /// Seeder writing through `store`.
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self {
            service: AutomationService::new(Arc::clone(&store)),
            store,
        }
    }
}

#[async_trait]
impl JobSeeder for DefaultJobSeeder {
    async fn seed_defaults(&self, ctx: &CallContext, tenant: &Tenant) -> Result<()> {
        let existing = self.store.list_tenant_automations(ctx, &tenant.id).await?;
        if existing.iter().any(|a| a.kind == DAILY_BRIEFING_KIND) {
            return Ok(());
        }
        let timezone = if tenant.timezone.trim().is_empty() {
            "UTC".to_string()
        } else {
            tenant.timezone.clone()
        };
        self.service
            .create(
                ctx,
                NewAutomation {
                    tenant_id: tenant.id.clone(),
                    kind: DAILY_BRIEFING_KIND.to_string(),
                    schedule: ScheduleSpec::daily(DAILY_BRIEFING_TIME, timezone),
                    quiet_hours: None,
                    payload: json!({ "prompt": "Prepare my daily briefing." }),
                },
                now_utc(),
            )
            .await?;
        Ok(())
    }
}

fn validate_quiet_hours(quiet: &QuietHours) -> Result<()> {
    parse_time_of_day(&quiet.start)?;
    parse_time_of_day(&quiet.end)?;
    Ok(())
}
