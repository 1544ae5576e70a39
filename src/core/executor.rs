//! Turns a due or manual automation into an idempotent, auditable [`Run`].
//!
//! ```text
//! quota check ─┬─ manual:   LimitError, nothing persisted
//!              └─ schedule: skipped Run + nextRunAt advanced
//! get-or-create Run(idempotency_key) ── existed? ──> nextRunAt advanced, return it unchanged
//! running ─> GatewayClient.invoke ─> succeeded | failed ─> nextRunAt advanced
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::audit::{build_audit_event, AuditSink, NoopAuditSink};
use crate::core::context::CallContext;
use crate::core::error::{ControlPlaneError, Result};
use crate::core::gateway::{invoke_with_timeout, GatewayClient, GatewayError, GatewayErrorCategory};
use crate::core::model::{
    AutomationDefinition, AutomationStatus, Run, RunStatus, Tenant, TriggerSource,
};
use crate::core::scheduler::{compute_next_run, local_day_window};
use crate::core::store::Persistence;
use crate::util::clock::now_utc;

/// Gateway operation used to dispatch automation runs.
pub const RUN_OPERATION: &str = "automation.run";

/// Quota and dispatch limits applied to every run.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    /// Minimum spacing between runs of one automation.
    pub min_interval: chrono::Duration,
    /// Maximum non-skipped runs per tenant per local calendar day.
    pub daily_cap: u32,
    /// Upper bound on a single gateway dispatch.
    pub gateway_timeout: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            min_interval: chrono::Duration::minutes(15),
            daily_cap: 24,
            gateway_timeout: Duration::from_secs(30),
        }
    }
}

/// Deterministic key for a scheduled tick of `automation_id` at `scheduled_for`.
pub fn schedule_idempotency_key(automation_id: &str, scheduled_for: DateTime<Utc>) -> String {
    format!("schedule:{automation_id}:{}", scheduled_for.timestamp_millis())
}

/// Unique key for a manual run; manual runs are never deduplicated against each other.
pub fn manual_idempotency_key(automation_id: &str) -> String {
    format!("manual:{automation_id}:{}", Uuid::new_v4().simple())
}

/// Run executor.
pub struct Executor {
    store: Arc<dyn Persistence>,
    gateway: Arc<dyn GatewayClient>,
    policy: ExecutionPolicy,
    audit: Arc<dyn AuditSink>,
}

impl Executor {
    /// Executor over `store`, dispatching through `gateway`.
    pub fn new(
        store: Arc<dyn Persistence>,
        gateway: Arc<dyn GatewayClient>,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            audit: Arc::new(NoopAuditSink),
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Policy in effect.
    pub const fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Execute `automation` once.
    ///
    /// `scheduled_for` defaults to now. For schedule triggers the returned run
    /// may be one created earlier under the same idempotency key, returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// [`ControlPlaneError::Limit`] for a manual run that violates quota (no
    /// run is persisted); store failures otherwise. Gateway failures are not
    /// errors: they produce a `failed` run.
    pub async fn run(
        &self,
        ctx: &CallContext,
        automation: &AutomationDefinition,
        trigger: TriggerSource,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<Run> {
        ctx.authorize(&automation.tenant_id)?;
        let scheduled_for = scheduled_for.unwrap_or_else(now_utc);
        // Quota is judged against the stored row, not a possibly stale caller copy.
        let automation = &self.store.get_automation(ctx, &automation.id).await?;
        let tenant = self.store.get_tenant(ctx, &automation.tenant_id).await?;

        let idempotency_key = match trigger {
            TriggerSource::Schedule => schedule_idempotency_key(&automation.id, scheduled_for),
            TriggerSource::Manual => manual_idempotency_key(&automation.id),
        };

        if let Some(reason) = self
            .quota_violation(ctx, automation, &tenant, scheduled_for)
            .await?
        {
            return match trigger {
                TriggerSource::Manual => {
                    info!(automation_id = %automation.id, %reason, "manual run rejected by quota");
                    Err(ControlPlaneError::Limit(reason))
                }
                TriggerSource::Schedule => {
                    self.skip(ctx, automation, idempotency_key, scheduled_for, reason)
                        .await
                }
            };
        }

        let pending = Self::new_run(automation, trigger, scheduled_for, idempotency_key, RunStatus::Pending);
        let (mut run, created) = self.store.get_or_create_run(ctx, pending).await?;
        if !created {
            debug!(
                run_id = %run.id,
                idempotency_key = %run.idempotency_key,
                status = status_label(run.status),
                "run already exists for key; not dispatching"
            );
            // A run stranded in pending/running must not pin the schedule to this tick.
            self.advance(ctx, &automation.id, trigger, scheduled_for, false)
                .await?;
            return Ok(run);
        }

        run.status = RunStatus::Running;
        run.started_at = Some(now_utc());
        if let Err(e) = self.store.update_run(ctx, &run).await {
            error!(run_id = %run.id, error = %e, "failed to mark run running; not dispatching");
            self.advance_or_log(ctx, &automation.id, trigger, scheduled_for, false)
                .await;
            return Err(e);
        }

        let outcome = invoke_with_timeout(
            self.gateway.as_ref(),
            &tenant,
            RUN_OPERATION,
            run.input_payload.clone(),
            self.policy.gateway_timeout,
        )
        .await;

        match outcome {
            Ok(result) => {
                run.status = RunStatus::Succeeded;
                run.result_payload = Some(result);
                info!(run_id = %run.id, automation_id = %automation.id, "run succeeded");
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error_message = Some(e.to_string());
                self.note_gateway_failure(&run, &e);
            }
        }
        run.finished_at = Some(now_utc());
        let finalized = self.store.update_run(ctx, &run).await;
        if let Err(e) = &finalized {
            error!(run_id = %run.id, error = %e, "failed to persist run outcome");
        }
        self.audit.record(build_audit_event(
            &run.tenant_id,
            &run.id,
            format!("run_{}", status_label(run.status)),
            run.error_message.clone(),
        ));

        let succeeded = run.status == RunStatus::Succeeded;
        if succeeded {
            self.record_success(ctx, &tenant.id, scheduled_for).await;
        }
        if finalized.is_err() {
            self.advance_or_log(ctx, &automation.id, trigger, scheduled_for, succeeded)
                .await;
        } else {
            self.advance(ctx, &automation.id, trigger, scheduled_for, succeeded)
                .await?;
        }
        finalized?;
        Ok(run)
    }

    /// Reason the run may not proceed, if any.
    async fn quota_violation(
        &self,
        ctx: &CallContext,
        automation: &AutomationDefinition,
        tenant: &Tenant,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Option<String>> {
        if let Some(last) = automation.last_run_at {
            let since = scheduled_for - last;
            if since < self.policy.min_interval {
                return Ok(Some(format!(
                    "minimum interval of {} minutes not reached (last run at {last})",
                    self.policy.min_interval.num_minutes()
                )));
            }
        }

        let (day_start, day_end) = local_day_window(&tenant.timezone, scheduled_for)?;
        let count = self
            .store
            .count_runs_between(ctx, &tenant.id, day_start, day_end)
            .await?;
        if count >= self.policy.daily_cap {
            return Ok(Some(format!(
                "daily cap of {} runs reached ({count} today)",
                self.policy.daily_cap
            )));
        }
        Ok(None)
    }

    async fn skip(
        &self,
        ctx: &CallContext,
        automation: &AutomationDefinition,
        idempotency_key: String,
        scheduled_for: DateTime<Utc>,
        reason: String,
    ) -> Result<Run> {
        let mut skipped = Self::new_run(
            automation,
            TriggerSource::Schedule,
            scheduled_for,
            idempotency_key,
            RunStatus::Skipped,
        );
        skipped.finished_at = Some(now_utc());
        skipped.error_message = Some(reason.clone());

        let (run, created) = self.store.get_or_create_run(ctx, skipped).await?;
        if created {
            warn!(automation_id = %automation.id, %reason, "scheduled run skipped");
            self.audit.record(build_audit_event(
                &run.tenant_id,
                &run.id,
                "run_skipped",
                Some(reason),
            ));
        }
        self.advance(ctx, &automation.id, TriggerSource::Schedule, scheduled_for, false)
            .await?;
        Ok(run)
    }

    fn new_run(
        automation: &AutomationDefinition,
        trigger: TriggerSource,
        scheduled_for: DateTime<Utc>,
        idempotency_key: String,
        status: RunStatus,
    ) -> Run {
        let id = Uuid::new_v4().to_string();
        let input_payload = json!({
            "runId": id,
            "automationId": automation.id,
            "kind": automation.kind,
            "triggerSource": trigger,
            "scheduledFor": scheduled_for,
            "instructions": automation.payload,
        });
        Run {
            id,
            automation_id: automation.id.clone(),
            tenant_id: automation.tenant_id.clone(),
            status,
            trigger_source: trigger,
            scheduled_for,
            idempotency_key,
            started_at: None,
            finished_at: None,
            input_payload,
            result_payload: None,
            error_message: None,
            created_at: now_utc(),
        }
    }

    fn note_gateway_failure(&self, run: &Run, err: &GatewayError) {
        error!(run_id = %run.id, automation_id = %run.automation_id, error = %err, "run failed");
        if err.category() == GatewayErrorCategory::Unauthenticated {
            self.audit.record(build_audit_event(
                &run.tenant_id,
                &run.tenant_id,
                "gateway_auth_failed",
                Some(err.to_string()),
            ));
        }
    }

    async fn record_success(&self, ctx: &CallContext, tenant_id: &str, scheduled_for: DateTime<Utc>) {
        if let Err(e) = self
            .store
            .set_tenant_last_run_at(ctx, tenant_id, scheduled_for)
            .await
        {
            warn!(tenant_id, error = %e, "failed to record tenant last run");
        }
    }

    /// [`advance`](Self::advance) on a path already returning another error.
    async fn advance_or_log(
        &self,
        ctx: &CallContext,
        automation_id: &str,
        trigger: TriggerSource,
        scheduled_for: DateTime<Utc>,
        succeeded: bool,
    ) {
        if let Err(e) = self
            .advance(ctx, automation_id, trigger, scheduled_for, succeeded)
            .await
        {
            error!(automation_id, error = %e, "failed to advance schedule");
        }
    }

    /// Persist `last_run_at` on success and, for schedule triggers, move `next_run_at` forward.
    async fn advance(
        &self,
        ctx: &CallContext,
        automation_id: &str,
        trigger: TriggerSource,
        scheduled_for: DateTime<Utc>,
        succeeded: bool,
    ) -> Result<()> {
        if trigger == TriggerSource::Manual && !succeeded {
            return Ok(());
        }
        let mut fresh = self.store.get_automation(ctx, automation_id).await?;
        if succeeded {
            fresh.last_run_at = Some(
                fresh
                    .last_run_at
                    .map_or(scheduled_for, |last| last.max(scheduled_for)),
            );
        }
        if trigger == TriggerSource::Schedule {
            // One second past the tick so re-triggering at the same instant cannot recompute it.
            let reference = scheduled_for + chrono::Duration::seconds(1);
            match compute_next_run(&fresh.schedule, reference) {
                Ok(next) => fresh.next_run_at = Some(next),
                Err(e) => {
                    error!(automation_id, error = %e, "schedule no longer valid; pausing automation");
                    fresh.status = AutomationStatus::Paused;
                    fresh.next_run_at = None;
                }
            }
        }
        fresh.updated_at = now_utc();
        self.store.update_automation(ctx, &fresh).await
    }
}

const fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Succeeded => "succeeded",
        RunStatus::Failed => "failed",
        RunStatus::Skipped => "skipped",
    }
}
