//! Control-plane configuration.
//!
//! Every field has a default, so an empty JSON object is a valid configuration.
//! Environment overrides use `CONTROL_PLANE_<SECTION>_<FIELD>` names.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::executor::ExecutionPolicy;
use crate::core::lifecycle::{default_worker_count, RetryPolicy};
use crate::core::orchestrator::OrchestratorSettings;
use crate::core::router::RouterSettings;

/// Scheduler batch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum due automations claimed per trigger.
    pub batch_limit: usize,
    /// Due automations executed at once; 1 is sequential.
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            concurrency: 1,
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_limit == 0 {
            return Err("batch_limit must be greater than 0".into());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        Ok(())
    }
}

/// Run quota settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Minimum spacing between runs of one automation, in seconds.
    pub min_interval_secs: u64,
    /// Maximum non-skipped runs per tenant per local day.
    pub daily_cap: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 15 * 60,
            daily_cap: 24,
        }
    }
}

impl ExecutorConfig {
    /// Validate executor settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.daily_cap == 0 {
            return Err("daily_cap must be greater than 0".into());
        }
        if i64::try_from(self.min_interval_secs).is_err() {
            return Err("min_interval_secs is out of range".into());
        }
        Ok(())
    }

    /// Execution policy, with dispatch bounded by the gateway timeout.
    pub fn policy(&self, gateway: &GatewayConfig) -> ExecutionPolicy {
        ExecutionPolicy {
            min_interval: chrono::Duration::seconds(
                i64::try_from(self.min_interval_secs).unwrap_or(i64::MAX / 1_000),
            ),
            daily_cap: self.daily_cap,
            gateway_timeout: gateway.timeout(),
        }
    }
}

/// Message router settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Messaging endpoint base URL.
    pub messaging_base_url: Option<String>,
    /// Route cache time-to-live, in seconds.
    pub cache_ttl_secs: u64,
    /// Messages admitted per sender per window.
    pub rate_limit: usize,
    /// Rate window, in seconds.
    pub rate_window_secs: u64,
    /// Long-poll wait, in seconds.
    pub poll_timeout_secs: u64,
    /// First poll backoff, in milliseconds.
    pub backoff_initial_ms: u64,
    /// Poll backoff ceiling, in milliseconds.
    pub backoff_max_ms: u64,
    /// File holding the ingestion offset; in memory when unset.
    pub offset_path: Option<String>,
    /// How often idle limiter keys and expired cache entries are dropped, in seconds.
    pub prune_interval_secs: u64,
}

/// Upper bound on the rate window and route cache TTL (one week).
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            messaging_base_url: None,
            cache_ttl_secs: 300,
            rate_limit: 20,
            rate_window_secs: 60,
            poll_timeout_secs: 30,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,
            offset_path: None,
            prune_interval_secs: 300,
        }
    }
}

impl RouterConfig {
    /// Validate router settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.rate_limit == 0 {
            return Err("rate_limit must be greater than 0".into());
        }
        if self.rate_window_secs == 0 {
            return Err("rate_window_secs must be greater than 0".into());
        }
        if self.rate_window_secs > MAX_WINDOW_SECS {
            return Err(format!("rate_window_secs must be at most {MAX_WINDOW_SECS}"));
        }
        if self.cache_ttl_secs > MAX_WINDOW_SECS {
            return Err(format!("cache_ttl_secs must be at most {MAX_WINDOW_SECS}"));
        }
        if self.prune_interval_secs == 0 {
            return Err("prune_interval_secs must be greater than 0".into());
        }
        if self.backoff_initial_ms == 0 {
            return Err("backoff_initial_ms must be greater than 0".into());
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err("backoff_max_ms must be at least backoff_initial_ms".into());
        }
        Ok(())
    }

    /// Route cache TTL.
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Rate window.
    pub const fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    /// Loop settings, with forwards bounded by the gateway timeout.
    pub fn settings(&self, gateway: &GatewayConfig) -> RouterSettings {
        RouterSettings {
            forward_timeout: gateway.timeout(),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            prune_interval: Duration::from_secs(self.prune_interval_secs),
        }
    }
}

/// Gateway client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bound on each gateway call, in seconds.
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl GatewayConfig {
    /// Validate gateway settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".into());
        }
        Ok(())
    }

    /// Call bound.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Lifecycle queue backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendConfig {
    /// In-memory queue for development/testing.
    InMemory,
    /// JSONL file queue.
    File,
}

impl FromStr for QueueBackendConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_memory" | "memory" => Ok(Self::InMemory),
            "file" => Ok(Self::File),
            other => Err(format!("unknown queue backend `{other}`")),
        }
    }
}

/// Resource lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// First retry delay, in milliseconds.
    pub retry_base_ms: u64,
    /// Retry delay ceiling, in milliseconds.
    pub retry_max_ms: u64,
    /// Queue backend.
    pub queue: QueueBackendConfig,
    /// Directory of the file queue.
    pub queue_path: Option<String>,
    /// Maximum queued jobs.
    pub queue_depth: usize,
    /// Tenants processed in parallel.
    pub worker_count: usize,
    /// Worker poll interval, in milliseconds.
    pub poll_interval_ms: u64,
    /// Image run by tenant resources.
    pub resource_image: String,
    /// Port of the resource gateway.
    pub gateway_port: u16,
    /// Prefix of per-tenant credential secret names.
    pub secret_prefix: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        let resource = OrchestratorSettings::default();
        Self {
            max_attempts: 5,
            retry_base_ms: 2_000,
            retry_max_ms: 300_000,
            queue: QueueBackendConfig::InMemory,
            queue_path: None,
            queue_depth: 1_024,
            worker_count: default_worker_count(),
            poll_interval_ms: 1_000,
            resource_image: resource.resource_image,
            gateway_port: resource.gateway_port,
            secret_prefix: resource.secret_prefix,
        }
    }
}

impl LifecycleConfig {
    /// Validate lifecycle settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.retry_max_ms < self.retry_base_ms {
            return Err("retry_max_ms must be at least retry_base_ms".into());
        }
        if self.queue == QueueBackendConfig::File && self.queue_path.is_none() {
            return Err("queue_path is required for the file queue".into());
        }
        if self.resource_image.trim().is_empty() {
            return Err("resource_image must not be empty".into());
        }
        Ok(())
    }

    /// Retry policy for the lifecycle worker.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }

    /// Worker poll interval.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Provisioning parameters.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            resource_image: self.resource_image.clone(),
            gateway_port: self.gateway_port,
            secret_prefix: self.secret_prefix.clone(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Scheduler batch settings.
    pub scheduler: SchedulerConfig,
    /// Run quotas.
    pub executor: ExecutorConfig,
    /// Message router.
    pub router: RouterConfig,
    /// Gateway client.
    pub gateway: GatewayConfig,
    /// Resource lifecycle.
    pub lifecycle: LifecycleConfig,
}

impl ControlPlaneConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.executor
            .validate()
            .map_err(|e| format!("executor invalid: {e}"))?;
        self.router
            .validate()
            .map_err(|e| format!("router invalid: {e}"))?;
        self.gateway
            .validate()
            .map_err(|e| format!("gateway invalid: {e}"))?;
        self.lifecycle
            .validate()
            .map_err(|e| format!("lifecycle invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `CONTROL_PLANE_*` variables (a `.env` file is loaded first if present).
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, validated.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(&format!("CONTROL_PLANE_{key}"));

        override_parsed(&get, "SCHEDULER_BATCH_LIMIT", &mut cfg.scheduler.batch_limit)?;
        override_parsed(&get, "SCHEDULER_CONCURRENCY", &mut cfg.scheduler.concurrency)?;

        override_parsed(&get, "EXECUTOR_MIN_INTERVAL_SECS", &mut cfg.executor.min_interval_secs)?;
        override_parsed(&get, "EXECUTOR_DAILY_CAP", &mut cfg.executor.daily_cap)?;

        if let Some(url) = get("ROUTER_MESSAGING_BASE_URL") {
            cfg.router.messaging_base_url = Some(url);
        }
        override_parsed(&get, "ROUTER_CACHE_TTL_SECS", &mut cfg.router.cache_ttl_secs)?;
        override_parsed(&get, "ROUTER_RATE_LIMIT", &mut cfg.router.rate_limit)?;
        override_parsed(&get, "ROUTER_RATE_WINDOW_SECS", &mut cfg.router.rate_window_secs)?;
        override_parsed(&get, "ROUTER_POLL_TIMEOUT_SECS", &mut cfg.router.poll_timeout_secs)?;
        override_parsed(&get, "ROUTER_BACKOFF_INITIAL_MS", &mut cfg.router.backoff_initial_ms)?;
        override_parsed(&get, "ROUTER_BACKOFF_MAX_MS", &mut cfg.router.backoff_max_ms)?;
        override_parsed(&get, "ROUTER_PRUNE_INTERVAL_SECS", &mut cfg.router.prune_interval_secs)?;
        if let Some(path) = get("ROUTER_OFFSET_PATH") {
            cfg.router.offset_path = Some(path);
        }

        override_parsed(&get, "GATEWAY_TIMEOUT_SECS", &mut cfg.gateway.timeout_secs)?;

        override_parsed(&get, "LIFECYCLE_MAX_ATTEMPTS", &mut cfg.lifecycle.max_attempts)?;
        override_parsed(&get, "LIFECYCLE_RETRY_BASE_MS", &mut cfg.lifecycle.retry_base_ms)?;
        override_parsed(&get, "LIFECYCLE_RETRY_MAX_MS", &mut cfg.lifecycle.retry_max_ms)?;
        override_parsed(&get, "LIFECYCLE_QUEUE", &mut cfg.lifecycle.queue)?;
        if let Some(path) = get("LIFECYCLE_QUEUE_PATH") {
            cfg.lifecycle.queue_path = Some(path);
        }
        override_parsed(&get, "LIFECYCLE_QUEUE_DEPTH", &mut cfg.lifecycle.queue_depth)?;
        override_parsed(&get, "LIFECYCLE_WORKER_COUNT", &mut cfg.lifecycle.worker_count)?;
        override_parsed(&get, "LIFECYCLE_POLL_INTERVAL_MS", &mut cfg.lifecycle.poll_interval_ms)?;
        if let Some(image) = get("LIFECYCLE_RESOURCE_IMAGE") {
            cfg.lifecycle.resource_image = image;
        }
        override_parsed(&get, "LIFECYCLE_GATEWAY_PORT", &mut cfg.lifecycle.gateway_port)?;

        cfg.validate()?;
        Ok(cfg)
    }
}

fn override_parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("CONTROL_PLANE_{key}: {e}"))?;
    }
    Ok(())
}
