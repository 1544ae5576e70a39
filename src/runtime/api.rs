//! Externally invoked entry points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::context::CallContext;
use crate::core::error::AppResult;
use crate::core::scheduler::{RunFailure, RunSummary, Scheduler};
use crate::util::clock::now_utc;

/// Scheduler trigger parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerRequest {
    /// Logical "now"; the wall clock when absent.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    /// Maximum due automations to process.
    pub limit: usize,
}

/// JSON summary returned to the trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    /// Due automations claimed.
    pub due_count: usize,
    /// Automations that produced a run.
    pub processed_count: usize,
    /// Runs that succeeded.
    pub succeeded: usize,
    /// Runs that failed.
    pub failed: usize,
    /// Runs skipped for quota.
    pub skipped: usize,
    /// Per-automation errors.
    pub errors: Vec<RunFailure>,
}

impl From<RunSummary> for TriggerResponse {
    fn from(summary: RunSummary) -> Self {
        Self {
            due_count: summary.due_count,
            processed_count: summary.processed_count,
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            errors: summary.errors,
        }
    }
}

impl TriggerResponse {
    /// Process exit code: 0 once the batch ran, whatever happened to individual jobs.
    pub const fn exit_code(&self) -> i32 {
        0
    }
}

/// Run one scheduler batch.
///
/// # Errors
///
/// Only when the due set cannot be loaded; per-job failures are in the response.
pub async fn trigger_run_due(scheduler: &Scheduler, req: TriggerRequest) -> AppResult<TriggerResponse> {
    let now = req.now.unwrap_or_else(now_utc);
    let ctx = CallContext::service();
    info!(%now, limit = req.limit, request_id = %ctx.request_id, "scheduler triggered");
    let summary = scheduler.run_due(&ctx, now, req.limit).await?;
    Ok(summary.into())
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Return a health payload.
pub const fn health() -> Health {
    Health { ok: true }
}
