//! Recurrence computation and the due-batch loop.
//!
//! There is no background timer in-process: an external trigger calls
//! [`Scheduler::run_due`] on a fixed cadence. Delivery of that trigger is
//! at-least-once; the executor's idempotency key collapses repeats.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::core::context::CallContext;
use crate::core::error::{ControlPlaneError, Result};
use crate::core::executor::Executor;
use crate::core::model::{AutomationDefinition, RunStatus, ScheduleSpec, ScheduleType, TriggerSource};
use crate::core::store::Persistence;

/// Days scanned for the next weekly occurrence before the schedule is declared invalid.
pub const WEEKLY_SEARCH_DAYS: u64 = 14;

/// Parse an IANA timezone name.
///
/// # Errors
///
/// [`ControlPlaneError::Validation`] when the name is unknown.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ControlPlaneError::Validation(format!("invalid timezone: {name}")))
}

/// Parse a local wall-clock time (`HH:MM` or `HH:MM:SS`).
///
/// # Errors
///
/// [`ControlPlaneError::Validation`] when the value is not a valid time.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ControlPlaneError::Validation(format!("invalid time of day: {value}")))
}

/// Resolve a local date and time in `tz` to a UTC instant.
///
/// Ambiguous wall times (fall-back) take the earlier instant; nonexistent
/// ones (spring-forward gap) move one hour later.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map_or_else(|| Utc.from_utc_datetime(&naive), |at| at.with_timezone(&Utc))
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| ControlPlaneError::Validation("date out of range".into()))
}

/// Next occurrence of `schedule` strictly after `reference`.
///
/// # Errors
///
/// [`ControlPlaneError::Validation`] for an unresolvable timezone, a malformed
/// time of day, a weekly schedule with no weekdays, or no occurrence within
/// [`WEEKLY_SEARCH_DAYS`].
pub fn compute_next_run(schedule: &ScheduleSpec, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let tz = parse_timezone(&schedule.timezone)?;
    let time = parse_time_of_day(&schedule.time_of_day)?;
    let today = reference.with_timezone(&tz).date_naive();

    match schedule.schedule_type {
        ScheduleType::Daily => {
            // A DST gap can resolve today's candidate onto the reference, hence a third day.
            for offset in 0..=2 {
                let candidate = resolve_local(tz, add_days(today, offset)?, time);
                if candidate > reference {
                    return Ok(candidate);
                }
            }
            Err(ControlPlaneError::Validation(format!(
                "no daily occurrence after {reference}"
            )))
        }
        ScheduleType::Weekly => {
            if schedule.weekdays.is_empty() {
                return Err(ControlPlaneError::Validation(
                    "weekly schedule requires at least one weekday".into(),
                ));
            }
            for offset in 0..WEEKLY_SEARCH_DAYS {
                let date = add_days(today, offset)?;
                if !schedule.weekdays.contains(&date.weekday()) {
                    continue;
                }
                let candidate = resolve_local(tz, date, time);
                if candidate > reference {
                    return Ok(candidate);
                }
            }
            Err(ControlPlaneError::Validation(format!(
                "no weekly occurrence within {WEEKLY_SEARCH_DAYS} days of {reference}"
            )))
        }
    }
}

/// UTC bounds `[start, end)` of the local calendar day in `timezone` containing `instant`.
///
/// # Errors
///
/// [`ControlPlaneError::Validation`] when the timezone is unknown.
pub fn local_day_window(
    timezone: &str,
    instant: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let tz = parse_timezone(timezone)?;
    let today = instant.with_timezone(&tz).date_naive();
    let start = resolve_local(tz, today, NaiveTime::MIN);
    let end = resolve_local(tz, add_days(today, 1)?, NaiveTime::MIN);
    Ok((start, end))
}

/// Per-automation failure captured in a batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    /// Automation that failed to process.
    pub automation_id: String,
    /// Error text.
    pub error: String,
}

/// Outcome of one `run_due` batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Definitions claimed by this batch.
    pub due_count: usize,
    /// Definitions for which the executor returned a run.
    pub processed_count: usize,
    /// Runs that succeeded.
    pub succeeded: usize,
    /// Runs that failed at dispatch.
    pub failed: usize,
    /// Runs skipped for quota.
    pub skipped: usize,
    /// Definitions whose processing raised an error (no run returned).
    pub errors: Vec<RunFailure>,
}

/// Due-batch scheduler.
pub struct Scheduler {
    store: Arc<dyn Persistence>,
    executor: Arc<Executor>,
    concurrency: usize,
}

impl Scheduler {
    /// Sequential scheduler over `store`, dispatching through `executor`.
    pub fn new(store: Arc<dyn Persistence>, executor: Arc<Executor>) -> Self {
        Self {
            store,
            executor,
            concurrency: 1,
        }
    }

    /// Process up to `concurrency` due automations at once (minimum 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Active definitions due at `now`, oldest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_due(
        &self,
        ctx: &CallContext,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AutomationDefinition>> {
        self.store.list_due_automations(ctx, now, limit).await
    }

    /// Run every due automation, isolating per-item failures.
    ///
    /// # Errors
    ///
    /// Only when the due set itself cannot be loaded.
    pub async fn run_due(
        &self,
        ctx: &CallContext,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<RunSummary> {
        let due = self.get_due(ctx, now, limit).await?;
        let mut summary = RunSummary {
            due_count: due.len(),
            ..RunSummary::default()
        };
        debug!(due = summary.due_count, %now, "scheduler batch claimed");

        let executor = &self.executor;
        let outcomes: Vec<_> = stream::iter(due)
            .map(|automation| async move {
                let scheduled_for = automation.next_run_at.unwrap_or(now);
                let result = executor
                    .run(ctx, &automation, TriggerSource::Schedule, Some(scheduled_for))
                    .await;
                (automation.id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (automation_id, result) in outcomes {
            match result {
                Ok(run) => {
                    summary.processed_count += 1;
                    match run.status {
                        RunStatus::Succeeded => summary.succeeded += 1,
                        RunStatus::Failed => summary.failed += 1,
                        RunStatus::Skipped => summary.skipped += 1,
                        RunStatus::Pending | RunStatus::Running => {}
                    }
                }
                Err(e) => {
                    error!(automation_id = %automation_id, error = %e, "scheduled run failed");
                    summary.errors.push(RunFailure {
                        automation_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            due = summary.due_count,
            processed = summary.processed_count,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "scheduler batch finished"
        );
        Ok(summary)
    }
}
