//! Durable lifecycle work queue and the worker that drains it.
//!
//! Provision, deprovision and config-update requests are queued rather than
//! executed inline so transient infrastructure failures can be retried with
//! backoff. Jobs of one tenant run in enqueue order; different tenants run in
//! parallel up to the worker count.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::audit::{build_audit_event, AuditSink, NoopAuditSink};
use crate::core::context::CallContext;
use crate::core::error::{ControlPlaneError, Result};
use crate::core::model::TenantId;
use crate::core::orchestrator::ResourceOrchestrator;
use crate::core::spawn::Spawn;
use crate::util::backoff::Backoff;
use crate::util::clock::now_ms;

/// Lifecycle operation requested for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleCommand {
    /// Bring the tenant's resource up.
    Provision,
    /// Tear the tenant's resource down.
    Deprovision,
    /// Push regenerated configuration.
    UpdateConfig,
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Provision => "provision",
            Self::Deprovision => "deprovision",
            Self::UpdateConfig => "update_config",
        })
    }
}

/// Queued lifecycle request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleJob {
    /// Job identifier.
    pub id: String,
    /// Tenant acted on.
    pub tenant_id: TenantId,
    /// Operation.
    pub command: LifecycleCommand,
    /// Failed attempts so far.
    pub attempt: u32,
    /// Not eligible before this instant (ms since epoch).
    pub not_before_ms: u128,
    /// Enqueue time (ms since epoch); FIFO tiebreak.
    pub created_at_ms: u128,
}

impl LifecycleJob {
    /// Fresh job, eligible immediately.
    pub fn new(tenant_id: impl Into<TenantId>, command: LifecycleCommand, now_ms: u128) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            command,
            attempt: 0,
            not_before_ms: now_ms,
            created_at_ms: now_ms,
        }
    }
}

/// Queue of lifecycle jobs.
///
/// Dequeuing leases a job rather than deleting it: the job stays stored until
/// [`ack`](JobQueue::ack) or [`requeue`](JobQueue::requeue). A durable backend
/// reopened after a crash hands every unacknowledged job out again.
pub trait JobQueue: Send {
    /// Add a job.
    ///
    /// # Errors
    ///
    /// `Backend("queue full")` at `max_depth`, or a backend write failure.
    fn enqueue(&mut self, job: LifecycleJob) -> Result<()>;
    /// Lease the earliest unleased job with `not_before_ms <= now_ms`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn dequeue_ready(&mut self, now_ms: u128) -> Result<Option<LifecycleJob>>;
    /// Drop the leased job `job_id` for good.
    ///
    /// # Errors
    ///
    /// Backend write failures.
    fn ack(&mut self, job_id: &str) -> Result<()>;
    /// Return a leased job, possibly updated, to the queue under its id.
    /// Never fails for lack of room; the job already holds its slot.
    ///
    /// # Errors
    ///
    /// Backend write failures.
    fn requeue(&mut self, job: LifecycleJob) -> Result<()>;
    /// Jobs held, queued or leased.
    fn len(&self) -> usize;
    /// True when nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Capacity.
    fn max_depth(&self) -> usize;
}

impl<Q: JobQueue + ?Sized> JobQueue for Box<Q> {
    fn enqueue(&mut self, job: LifecycleJob) -> Result<()> {
        (**self).enqueue(job)
    }

    fn dequeue_ready(&mut self, now_ms: u128) -> Result<Option<LifecycleJob>> {
        (**self).dequeue_ready(now_ms)
    }

    fn ack(&mut self, job_id: &str) -> Result<()> {
        (**self).ack(job_id)
    }

    fn requeue(&mut self, job: LifecycleJob) -> Result<()> {
        (**self).requeue(job)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn max_depth(&self) -> usize {
        (**self).max_depth()
    }
}

/// Error returned by a full queue.
pub fn queue_full() -> ControlPlaneError {
    ControlPlaneError::Backend("queue full".into())
}

/// Retry schedule for failed lifecycle jobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before a retryable failure is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Ceiling on a single retry delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying a job that has failed `attempt` times before this failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Backoff::delay_for_attempt(self.base_delay, attempt, self.max_delay)
    }
}

/// What one drain pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleReport {
    /// Jobs leased from the queue.
    pub dequeued: usize,
    /// Jobs that completed.
    pub succeeded: usize,
    /// Jobs re-enqueued after a retryable failure.
    pub retried: usize,
    /// Jobs given up on.
    pub dead_lettered: usize,
    /// Jobs pushed back behind a retrying job of the same tenant.
    pub deferred: usize,
}

enum JobOutcome {
    Succeeded,
    /// To be requeued as the carried job.
    Retried(LifecycleJob),
    DeadLettered,
}

/// Drains a [`JobQueue`] into a [`ResourceOrchestrator`].
pub struct LifecycleWorker<Q, S> {
    queue: Mutex<Q>,
    orchestrator: Arc<ResourceOrchestrator<S>>,
    policy: RetryPolicy,
    worker_count: usize,
    poll_interval: Duration,
    audit: Arc<dyn AuditSink>,
}

impl<Q, S> LifecycleWorker<Q, S>
where
    Q: JobQueue,
    S: Spawn + Send + Sync + 'static,
{
    /// Worker over `queue`, running jobs through `orchestrator`.
    pub fn new(queue: Q, orchestrator: Arc<ResourceOrchestrator<S>>, policy: RetryPolicy) -> Self {
        Self {
            queue: Mutex::new(queue),
            orchestrator,
            policy,
            worker_count: default_worker_count(),
            poll_interval: Duration::from_secs(1),
            audit: Arc::new(NoopAuditSink),
        }
    }

    /// Tenants processed in parallel per pass (at least 1).
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Sleep between passes of [`run`](Self::run).
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Queue `command` for `tenant_id`.
    ///
    /// # Errors
    ///
    /// Queue full or backend failures.
    pub fn submit(&self, tenant_id: &str, command: LifecycleCommand) -> Result<LifecycleJob> {
        let job = LifecycleJob::new(tenant_id, command, now_ms());
        self.queue.lock().enqueue(job.clone())?;
        debug!(job_id = %job.id, tenant_id, %command, "lifecycle job queued");
        Ok(job)
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run every job ready at `now_ms` once.
    ///
    /// Each job stays leased in the queue until it succeeds, is dead-lettered
    /// or is requeued for a retry.
    ///
    /// # Errors
    ///
    /// Queue backend failures while leasing; job failures are retried or
    /// dead-lettered.
    pub async fn run_once(&self, now_ms: u128) -> Result<LifecycleReport> {
        let ready = {
            let mut queue = self.queue.lock();
            let mut ready = Vec::new();
            loop {
                match queue.dequeue_ready(now_ms) {
                    Ok(Some(job)) => ready.push(job),
                    Ok(None) => break,
                    Err(e) => {
                        for job in ready {
                            if let Err(release) = queue.requeue(job) {
                                error!(error = %release, "failed to release leased job");
                            }
                        }
                        return Err(e);
                    }
                }
            }
            ready
        };
        let mut report = LifecycleReport {
            dequeued: ready.len(),
            ..LifecycleReport::default()
        };
        if ready.is_empty() {
            return Ok(report);
        }

        let mut order: Vec<TenantId> = Vec::new();
        let mut by_tenant: HashMap<TenantId, Vec<LifecycleJob>> = HashMap::new();
        for job in ready {
            if !by_tenant.contains_key(&job.tenant_id) {
                order.push(job.tenant_id.clone());
            }
            by_tenant.entry(job.tenant_id.clone()).or_default().push(job);
        }
        let groups: Vec<Vec<LifecycleJob>> = order
            .into_iter()
            .filter_map(|tenant| by_tenant.remove(&tenant))
            .collect();

        let results: Vec<LifecycleReport> = stream::iter(groups)
            .map(|jobs| self.run_tenant_jobs(jobs, now_ms))
            .buffer_unordered(self.worker_count)
            .collect()
            .await;

        for partial in results {
            report.succeeded += partial.succeeded;
            report.retried += partial.retried;
            report.dead_lettered += partial.dead_lettered;
            report.deferred += partial.deferred;
        }
        Ok(report)
    }

    /// Jobs of one tenant in order; a retry pushes the rest back behind it.
    async fn run_tenant_jobs(&self, jobs: Vec<LifecycleJob>, now_ms: u128) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        let mut jobs = jobs.into_iter();
        while let Some(job) = jobs.next() {
            let job_id = job.id.clone();
            match self.run_job(job, now_ms).await {
                JobOutcome::Succeeded => {
                    report.succeeded += 1;
                    self.settle(&job_id, |queue| queue.ack(&job_id));
                }
                JobOutcome::DeadLettered => {
                    report.dead_lettered += 1;
                    self.settle(&job_id, |queue| queue.ack(&job_id));
                }
                JobOutcome::Retried(retry) => {
                    report.retried += 1;
                    let not_before_ms = retry.not_before_ms;
                    self.settle(&job_id, |queue| queue.requeue(retry));
                    for mut rest in jobs.by_ref() {
                        rest.not_before_ms = rest.not_before_ms.max(not_before_ms);
                        let rest_id = rest.id.clone();
                        self.settle(&rest_id, |queue| queue.requeue(rest));
                        report.deferred += 1;
                    }
                }
            }
        }
        report
    }

    /// Apply a queue update for `job_id`; on failure the job stays leased and
    /// a durable backend hands it out again after a restart.
    fn settle(&self, job_id: &str, update: impl FnOnce(&mut Q) -> Result<()>) {
        let mut queue = self.queue.lock();
        if let Err(e) = update(&mut *queue) {
            error!(job_id, error = %e, "failed to settle lifecycle job");
        }
    }

    async fn run_job(&self, job: LifecycleJob, now_ms: u128) -> JobOutcome {
        let ctx = CallContext::service();
        let outcome = match job.command {
            LifecycleCommand::Provision => self
                .orchestrator
                .provision(&ctx, &job.tenant_id)
                .await
                .map(|_| ()),
            LifecycleCommand::Deprovision => self
                .orchestrator
                .deprovision(&ctx, &job.tenant_id)
                .await
                .map(|_| ()),
            LifecycleCommand::UpdateConfig => self
                .orchestrator
                .update_config(&ctx, &job.tenant_id)
                .await
                .map(|_| ()),
        };

        let err = match outcome {
            Ok(()) => {
                info!(job_id = %job.id, tenant_id = %job.tenant_id, command = %job.command, "lifecycle job done");
                return JobOutcome::Succeeded;
            }
            Err(err) => err,
        };

        let attempts = job.attempt.saturating_add(1);
        if err.is_retryable() && attempts < self.policy.max_attempts {
            let delay = self.policy.delay_for(job.attempt);
            let not_before_ms = now_ms.saturating_add(delay.as_millis());
            warn!(
                job_id = %job.id,
                tenant_id = %job.tenant_id,
                command = %job.command,
                attempt = attempts,
                retry_in_ms = delay.as_millis(),
                error = %err,
                "lifecycle job failed; retrying"
            );
            self.audit.record(build_audit_event(
                &job.tenant_id,
                &job.id,
                "lifecycle_retry",
                Some(format!("{} attempt {attempts}: {err}", job.command)),
            ));
            return JobOutcome::Retried(LifecycleJob {
                attempt: attempts,
                not_before_ms,
                ..job
            });
        }

        error!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            command = %job.command,
            attempts,
            error = %err,
            "lifecycle job dead-lettered"
        );
        self.audit.record(build_audit_event(
            &job.tenant_id,
            &job.id,
            "lifecycle_dead_letter",
            Some(format!("{} after {attempts} attempt(s): {err}", job.command)),
        ));
        JobOutcome::DeadLettered
    }

    /// Drain the queue every poll interval until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(workers = self.worker_count, "lifecycle worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.run_once(now_ms()).await {
                error!(error = %e, "lifecycle drain failed");
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("lifecycle worker stopped");
    }
}

/// Default parallelism: available CPUs, at most four.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 4)
}
