//! Domain records shared by the orchestrator, scheduler, executor and router.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::core::error::ControlPlaneError;

/// Tenant identifier.
pub type TenantId = String;
/// Automation definition identifier.
pub type AutomationId = String;
/// Run identifier.
pub type RunId = String;

/// Lifecycle status of a tenant's resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Signed up, nothing provisioned (or provisioning rolled back).
    Pending,
    /// Provisioning in progress.
    Provisioning,
    /// Resource is live and reachable.
    Active,
    /// Teardown failed part way; needs operator attention.
    Suspended,
    /// Teardown in progress.
    Deprovisioning,
    /// Soft-deleted.
    Deleted,
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deprovisioning => "deprovisioning",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A tenant and the handles of its provisioned resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: TenantId,
    /// Lifecycle status.
    pub status: TenantStatus,
    /// IANA timezone used for daily quota windows and default schedules.
    pub timezone: String,
    /// Messaging sender identities linked to this tenant.
    pub sender_ids: Vec<String>,
    /// Compute resource identifier (set only while active).
    pub resource_id: Option<String>,
    /// Gateway endpoint of the compute resource (set only while active).
    pub resource_endpoint: Option<String>,
    /// Isolated identity backing the resource.
    pub identity_id: Option<String>,
    /// Persistent storage backing the resource.
    pub storage_id: Option<String>,
    /// SHA-256 hex of the internal credential; the secret itself is never stored here.
    pub credential_hash: Option<String>,
    /// Last configuration version written to the resource.
    pub config_version: u64,
    /// Latest requested configuration version.
    pub pending_config_version: u64,
    /// Tokens consumed in the current billing month.
    pub tokens_this_month: u64,
    /// Monthly token budget; `None` is unlimited.
    pub monthly_budget: Option<u64>,
    /// Last inbound message accepted for this tenant.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Last successful automation run for this tenant.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// New pending tenant in the given timezone.
    pub fn new(id: impl Into<TenantId>, timezone: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: TenantStatus::Pending,
            timezone: timezone.into(),
            sender_ids: Vec::new(),
            resource_id: None,
            resource_endpoint: None,
            identity_id: None,
            storage_id: None,
            credential_hash: None,
            config_version: 0,
            pending_config_version: 0,
            tokens_this_month: 0,
            monthly_budget: None,
            last_message_at: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Link a messaging sender to this tenant.
    #[must_use]
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_ids.push(sender_id.into());
        self
    }

    /// True when the resource is active and has an endpoint to route to.
    pub fn is_routable(&self) -> bool {
        self.status == TenantStatus::Active && self.resource_endpoint.is_some()
    }

    /// True when the resource has not yet picked up the latest configuration.
    pub const fn config_update_pending(&self) -> bool {
        self.config_version < self.pending_config_version
    }

    /// True when the monthly budget is set and exhausted.
    pub fn budget_exhausted(&self) -> bool {
        self.monthly_budget
            .is_some_and(|budget| self.tokens_this_month >= budget)
    }
}

/// Recurrence type of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// Once per local day.
    Daily,
    /// On selected local weekdays.
    Weekly,
}

impl FromStr for ScheduleType {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(ControlPlaneError::Validation(format!(
                "unknown schedule type `{other}`"
            ))),
        }
    }
}

/// Declarative schedule of an automation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Recurrence type.
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    /// Local wall-clock time, `HH:MM` or `HH:MM:SS`.
    pub time_of_day: String,
    /// Weekdays for weekly schedules.
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// IANA timezone name.
    pub timezone: String,
}

impl ScheduleSpec {
    /// Daily schedule at `time_of_day` in `timezone`.
    pub fn daily(time_of_day: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            schedule_type: ScheduleType::Daily,
            time_of_day: time_of_day.into(),
            weekdays: Vec::new(),
            timezone: timezone.into(),
        }
    }

    /// Weekly schedule on `weekdays` at `time_of_day` in `timezone`.
    pub fn weekly(
        weekdays: impl IntoIterator<Item = Weekday>,
        time_of_day: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            schedule_type: ScheduleType::Weekly,
            time_of_day: time_of_day.into(),
            weekdays: weekdays.into_iter().collect(),
            timezone: timezone.into(),
        }
    }

    /// Parse a schedule from loosely-typed JSON, reporting failures as validation errors.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Validation`] for unknown types or malformed fields.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ControlPlaneError> {
        if let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) {
            ScheduleType::from_str(kind)?;
        }
        serde_json::from_value(value)
            .map_err(|e| ControlPlaneError::Validation(format!("invalid schedule: {e}")))
    }
}

/// Quiet-hours window carried on a definition.
///
/// Reserved: stored and validated, never enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Window start, `HH:MM` local.
    pub start: String,
    /// Window end, `HH:MM` local.
    pub end: String,
}

/// Whether an automation participates in scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    /// Scheduled.
    Active,
    /// Not scheduled; manual runs still allowed.
    Paused,
}

/// Recurring job owned by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationDefinition {
    /// Identifier.
    pub id: AutomationId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Job kind understood by the resource.
    pub kind: String,
    /// Scheduling status.
    pub status: AutomationStatus,
    /// Recurrence.
    pub schedule: ScheduleSpec,
    /// Reserved quiet-hours window.
    pub quiet_hours: Option<QuietHours>,
    /// Free-form job instructions forwarded to the resource.
    pub payload: serde_json::Value,
    /// Logical time of the last successful run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next due instant (UTC); always in the future for active definitions.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Dispatched to the gateway.
    Running,
    /// Gateway returned a result.
    Succeeded,
    /// Gateway dispatch failed.
    Failed,
    /// Not dispatched because of quota.
    Skipped,
}

impl RunStatus {
    /// True once the run has reached a final state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// What caused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Explicit user request.
    Manual,
    /// Scheduler tick.
    Schedule,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
        })
    }
}

/// One auditable execution of an automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Identifier.
    pub id: RunId,
    /// Automation executed.
    pub automation_id: AutomationId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// What caused the run.
    pub trigger_source: TriggerSource,
    /// Logical execution time (UTC).
    pub scheduled_for: DateTime<Utc>,
    /// Globally unique deduplication key.
    pub idempotency_key: String,
    /// Dispatch start.
    pub started_at: Option<DateTime<Utc>>,
    /// Final state reached.
    pub finished_at: Option<DateTime<Utc>>,
    /// Job description sent to the gateway.
    pub input_payload: serde_json::Value,
    /// Gateway result.
    pub result_payload: Option<serde_json::Value>,
    /// Failure or skip reason.
    pub error_message: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Token usage reported by a resource reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Tenant charged.
    pub tenant_id: TenantId,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Origin of the usage (`message`, `automation`).
    pub source: String,
    /// When the usage was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl UsageEvent {
    /// Total tokens charged.
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Inbound message fetched from the messaging endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Monotonic update id used as the ingestion cursor.
    pub update_id: i64,
    /// Conversation to reply into.
    pub chat_id: String,
    /// Sender identity resolved to a tenant.
    pub sender_id: String,
    /// Message body; empty for non-text updates.
    pub text: String,
}
