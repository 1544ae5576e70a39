//! Inbound message routing.
//!
//! One long-lived loop long-polls the messaging endpoint and handles updates
//! strictly one at a time:
//!
//! ```text
//! update ─> resolve sender ─┬─ unknown ──────────────> onboarding reply
//!                           ├─ rate limited ─────────> rate-limit reply
//!                           ├─ budget exhausted ─────> budget reply
//!                           ├─ resource not active ──> starting reply
//!                           └─ forward ─┬─ reply ────> relay + usage
//!                                       ├─ timeout ──> dropped
//!                                       └─ error ────> retry reply
//! ```
//!
//! The offset only moves forward; an update below it is never handled twice.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::core::context::CallContext;
use crate::core::error::{ErrorKind, Result};
use crate::core::gateway::{invoke_with_timeout, GatewayClient, GatewayError};
use crate::core::model::{Tenant, TenantId, TenantStatus, Update, UsageEvent};
use crate::core::store::Persistence;
use crate::util::backoff::Backoff;
use crate::util::clock::now_utc;

/// Reply to a sender with no tenant.
pub const ONBOARDING_REPLY: &str =
    "Hi! This number isn't linked to an account yet. Sign up to get your own assistant.";
/// Reply while the tenant's resource is not active.
pub const STARTING_REPLY: &str = "Your assistant is still starting up. Please try again in a minute.";
/// Reply after a forward failure.
pub const RETRY_REPLY: &str = "Something went wrong on our side. Please try again shortly.";
/// Reply when the monthly budget is used up.
pub const BUDGET_REPLY: &str = "You've used this month's quota. It resets at the start of next month.";
/// Reply when the sender is over the rate limit.
pub const RATE_LIMIT_REPLY: &str = "You're sending messages too quickly. Please slow down a little.";

/// Gateway operation used to forward a message.
pub const MESSAGE_OPERATION: &str = "message.handle";

/// Usage source recorded for forwarded messages.
pub const MESSAGE_USAGE_SOURCE: &str = "message";

/// External message channel.
#[async_trait]
pub trait MessagingEndpoint: Send + Sync {
    /// Long-poll updates with `update_id >= offset`, waiting at most `timeout`.
    async fn fetch_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>>;
    /// Send `text` into conversation `chat_id`.
    async fn send_reply(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Cached sender resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCacheEntry {
    /// Tenant the sender belongs to.
    pub tenant_id: TenantId,
    /// Gateway endpoint at the time of caching.
    pub resource_endpoint: String,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
}

/// Best-effort sender → route cache. Never a source of truth.
pub trait RouteCache: Send + Sync {
    /// Live entry for `sender_id` at `now`, if any.
    fn get(&self, sender_id: &str, now: DateTime<Utc>) -> Option<RouteCacheEntry>;
    /// Store or replace the entry of `sender_id`.
    fn put(&self, sender_id: &str, entry: RouteCacheEntry);
    /// Drop the entry of `sender_id`.
    fn invalidate(&self, sender_id: &str);
    /// Drop every entry expired at `now`; returns how many went.
    fn prune(&self, now: DateTime<Utc>) -> usize;
}

/// Per-key admission limiter.
pub trait RateLimiter: Send + Sync {
    /// Record a request for `key` at `now`; `false` when the key is already at its cap.
    fn check(&self, key: &str, now: DateTime<Utc>) -> bool;
    /// Forget keys with nothing inside the window at `now`; returns how many went.
    fn prune(&self, now: DateTime<Utc>) -> usize;
}

/// Durable home of the ingestion offset.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Last saved offset (0 when none).
    async fn load(&self) -> Result<i64>;
    /// Persist `offset`.
    async fn save(&self, offset: i64) -> Result<()>;
}

/// Result of handling one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded; reply (if any) relayed.
    Forwarded,
    /// Unknown sender, onboarding reply sent.
    Onboarding,
    /// Over the per-sender rate limit.
    RateLimited,
    /// Tenant budget used up.
    BudgetExhausted,
    /// Tenant resource not active yet.
    Starting,
    /// Forward timed out; nothing sent.
    Dropped,
    /// Forward failed; retry reply sent.
    Failed,
    /// Nothing to route (empty body or already-seen update).
    Ignored,
}

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Bound on each forward to a resource.
    pub forward_timeout: Duration,
    /// Long-poll wait passed to the endpoint.
    pub poll_timeout: Duration,
    /// First delay after a failed poll.
    pub backoff_initial: Duration,
    /// Ceiling on the poll backoff.
    pub backoff_max: Duration,
    /// Spacing of limiter and cache pruning in [`Router::run`].
    pub prune_interval: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            forward_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(30),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            prune_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReplyUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Message router.
pub struct Router {
    endpoint: Arc<dyn MessagingEndpoint>,
    store: Arc<dyn Persistence>,
    gateway: Arc<dyn GatewayClient>,
    cache: Arc<dyn RouteCache>,
    limiter: Arc<dyn RateLimiter>,
    offsets: Option<Arc<dyn OffsetStore>>,
    settings: RouterSettings,
    offset: AtomicI64,
}

impl Router {
    /// Router over its collaborators.
    pub fn new(
        endpoint: Arc<dyn MessagingEndpoint>,
        store: Arc<dyn Persistence>,
        gateway: Arc<dyn GatewayClient>,
        cache: Arc<dyn RouteCache>,
        limiter: Arc<dyn RateLimiter>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            endpoint,
            store,
            gateway,
            cache,
            limiter,
            offsets: None,
            settings,
            offset: AtomicI64::new(0),
        }
    }

    /// Persist the offset after every update.
    #[must_use]
    pub fn with_offset_store(mut self, offsets: Arc<dyn OffsetStore>) -> Self {
        self.offsets = Some(offsets);
        self
    }

    /// Current offset: the lowest update id not yet handled.
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Resume from the saved offset, if an offset store is configured.
    ///
    /// # Errors
    ///
    /// Offset store failures.
    pub async fn restore_offset(&self) -> Result<i64> {
        if let Some(offsets) = &self.offsets {
            let saved = offsets.load().await?;
            self.offset.fetch_max(saved, Ordering::SeqCst);
        }
        Ok(self.offset())
    }

    /// Fetch one batch and handle it in order.
    ///
    /// Per-update failures are logged and do not stop the batch.
    ///
    /// # Errors
    ///
    /// Only a failed fetch.
    pub async fn poll_once(&self) -> Result<Vec<RouteOutcome>> {
        let updates = self.fetch().await?;
        Ok(self.handle_batch(updates, None).await)
    }

    async fn fetch(&self) -> Result<Vec<Update>> {
        self.endpoint
            .fetch_updates(self.offset(), self.settings.poll_timeout)
            .await
    }

    /// Handle `updates` in order, stopping early once `shutdown` reads `true`.
    ///
    /// An update is either handled to completion with the offset moved past
    /// it, or not started; unstarted updates are fetched again next time.
    async fn handle_batch(
        &self,
        updates: Vec<Update>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::with_capacity(updates.len());
        for update in updates {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!(update_id = update.update_id, "shutdown requested; leaving rest of batch");
                break;
            }
            if update.update_id < self.offset() {
                debug!(update_id = update.update_id, offset = self.offset(), "skipping seen update");
                outcomes.push(RouteOutcome::Ignored);
                continue;
            }
            let ctx = CallContext::service();
            match self.process_update(&ctx, &update, now_utc()).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(
                        update_id = update.update_id,
                        sender_id = %update.sender_id,
                        error = %e,
                        "update handling failed"
                    );
                    outcomes.push(RouteOutcome::Failed);
                }
            }
            self.advance_offset(update.update_id + 1).await;
        }
        outcomes
    }

    /// Drop idle limiter keys and expired cache entries.
    pub fn prune(&self, now: DateTime<Utc>) {
        let limiter_keys = self.limiter.prune(now);
        let cache_entries = self.cache.prune(now);
        if limiter_keys + cache_entries > 0 {
            debug!(limiter_keys, cache_entries, "pruned router state");
        }
    }

    async fn advance_offset(&self, next: i64) {
        self.offset.fetch_max(next, Ordering::SeqCst);
        if let Some(offsets) = &self.offsets {
            if let Err(e) = offsets.save(self.offset()).await {
                warn!(offset = next, error = %e, "failed to persist offset");
            }
        }
    }

    /// Poll until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Shutdown interrupts a pending fetch but never an update in progress.
    ///
    /// # Errors
    ///
    /// Only when the saved offset cannot be loaded at startup.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let offset = self.restore_offset().await?;
        info!(offset, "router started");
        let mut backoff = Backoff::new(self.settings.backoff_initial, self.settings.backoff_max);
        let mut pruned_at = tokio::time::Instant::now();
        loop {
            if *shutdown.borrow() {
                break;
            }
            if pruned_at.elapsed() >= self.settings.prune_interval {
                self.prune(now_utc());
                pruned_at = tokio::time::Instant::now();
            }
            let fetched = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                fetched = self.fetch() => fetched,
            };
            let pause = match fetched {
                Ok(updates) => {
                    backoff.reset();
                    self.handle_batch(updates, Some(&shutdown)).await;
                    None
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in_ms = delay.as_millis(), "poll failed; backing off");
                    Some(delay)
                }
            };
            if let Some(delay) = pause {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
        info!(offset = self.offset(), "router stopped");
        Ok(())
    }

    /// Handle a single update.
    ///
    /// # Errors
    ///
    /// Store failures during resolution or usage recording. Reply send
    /// failures are logged, not returned.
    pub async fn process_update(
        &self,
        ctx: &CallContext,
        update: &Update,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome> {
        if update.text.trim().is_empty() {
            return Ok(RouteOutcome::Ignored);
        }

        let Some(tenant) = self.resolve(ctx, &update.sender_id, now).await? else {
            info!(sender_id = %update.sender_id, "unknown sender; sending onboarding");
            self.reply(update, ONBOARDING_REPLY).await;
            return Ok(RouteOutcome::Onboarding);
        };

        if !self.limiter.check(&update.sender_id, now) {
            warn!(sender_id = %update.sender_id, tenant_id = %tenant.id, "rate limited");
            self.reply(update, RATE_LIMIT_REPLY).await;
            return Ok(RouteOutcome::RateLimited);
        }

        if tenant.budget_exhausted() {
            info!(tenant_id = %tenant.id, "monthly budget exhausted");
            self.reply(update, BUDGET_REPLY).await;
            return Ok(RouteOutcome::BudgetExhausted);
        }

        if !tenant.is_routable() {
            self.cache.invalidate(&update.sender_id);
            info!(tenant_id = %tenant.id, status = %tenant.status, "resource not active");
            self.reply(update, STARTING_REPLY).await;
            return Ok(RouteOutcome::Starting);
        }

        self.forward(ctx, &tenant, update, now).await
    }

    /// Cache first, store on miss or expiry. Only routable tenants are cached.
    async fn resolve(
        &self,
        ctx: &CallContext,
        sender_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Tenant>> {
        if let Some(entry) = self.cache.get(sender_id, now) {
            match self.store.get_tenant(ctx, &entry.tenant_id).await {
                Ok(tenant) if tenant.status != TenantStatus::Deleted => return Ok(Some(tenant)),
                Ok(_) => self.cache.invalidate(sender_id),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.cache.invalidate(sender_id);
                }
                Err(e) => return Err(e),
            }
        }

        let tenant = self.store.find_tenant_by_sender(ctx, sender_id).await?;
        if let Some(tenant) = &tenant {
            if let (true, Some(endpoint)) = (tenant.is_routable(), &tenant.resource_endpoint) {
                self.cache.put(
                    sender_id,
                    RouteCacheEntry {
                        tenant_id: tenant.id.clone(),
                        resource_endpoint: endpoint.clone(),
                        cached_at: now,
                    },
                );
            }
        }
        Ok(tenant)
    }

    async fn forward(
        &self,
        ctx: &CallContext,
        tenant: &Tenant,
        update: &Update,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome> {
        let args = json!({
            "chatId": update.chat_id,
            "senderId": update.sender_id,
            "text": update.text,
        });
        let reply = match invoke_with_timeout(
            self.gateway.as_ref(),
            tenant,
            MESSAGE_OPERATION,
            args,
            self.settings.forward_timeout,
        )
        .await
        {
            Ok(reply) => reply,
            Err(GatewayError::Timeout(after)) => {
                // The resource keeps working and answers through its own channel.
                warn!(
                    tenant_id = %tenant.id,
                    update_id = update.update_id,
                    timeout_ms = after.as_millis(),
                    "forward timed out; dropping"
                );
                return Ok(RouteOutcome::Dropped);
            }
            Err(e) => {
                error!(tenant_id = %tenant.id, update_id = update.update_id, error = %e, "forward failed");
                if matches!(e, GatewayError::Unreachable(_)) {
                    self.cache.invalidate(&update.sender_id);
                }
                self.reply(update, RETRY_REPLY).await;
                return Ok(RouteOutcome::Failed);
            }
        };

        if let Some(text) = reply.get("reply").and_then(serde_json::Value::as_str) {
            self.reply(update, text).await;
        }
        if let Some(usage) = reply.get("usage") {
            self.record_usage(ctx, &tenant.id, usage, now).await?;
        }
        Ok(RouteOutcome::Forwarded)
    }

    async fn record_usage(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        usage: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let usage: ReplyUsage = match serde_json::from_value(usage.clone()) {
            Ok(usage) => usage,
            Err(e) => {
                warn!(tenant_id, error = %e, "ignoring malformed usage metadata");
                return Ok(());
            }
        };
        let event = UsageEvent {
            tenant_id: tenant_id.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            source: MESSAGE_USAGE_SOURCE.to_string(),
            recorded_at: now,
        };
        debug!(tenant_id, tokens = event.total_tokens(), "recording usage");
        self.store.record_usage(ctx, event).await
    }

    async fn reply(&self, update: &Update, text: &str) {
        if let Err(e) = self.endpoint.send_reply(&update.chat_id, text).await {
            warn!(chat_id = %update.chat_id, update_id = update.update_id, error = %e, "reply failed");
        }
    }
}
