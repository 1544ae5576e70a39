//! Lifecycle worker tests: retries, dead letters and per-tenant ordering.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prometheus_control_plane::core::{
    AuditSink, CallContext, InMemoryAuditSink, JobQueue, LifecycleCommand, LifecycleWorker,
    OrchestratorSettings, ResourceOrchestrator, RetryPolicy, Tenant, TenantStatus, TenantStore,
};
use prometheus_control_plane::infra::{
    CloudStep, FileJobQueue, InMemoryCloudProvider, InMemoryJobQueue, InMemoryStore,
};
use prometheus_control_plane::runtime::TokioSpawner;
use prometheus_control_plane::util::now_ms;

struct Harness {
    store: Arc<InMemoryStore>,
    cloud: Arc<InMemoryCloudProvider>,
    audit: Arc<InMemoryAuditSink>,
    worker: LifecycleWorker<InMemoryJobQueue, TokioSpawner>,
}

async fn harness(max_attempts: u32, tenants: &[&str]) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let cloud = Arc::new(InMemoryCloudProvider::default());
    let audit = Arc::new(InMemoryAuditSink::new(100));
    for id in tenants {
        store
            .create_tenant(&CallContext::service(), Tenant::new(*id, "UTC", Utc::now()))
            .await
            .unwrap();
    }
    let orchestrator = Arc::new(ResourceOrchestrator::new(
        store.clone(),
        cloud.clone(),
        TokioSpawner::current().unwrap(),
        OrchestratorSettings::default(),
    ));
    let worker = LifecycleWorker::new(
        InMemoryJobQueue::new(16),
        orchestrator,
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        },
    )
    .with_worker_count(2)
    .with_audit(audit.clone() as Arc<dyn AuditSink>);
    Harness {
        store,
        cloud,
        audit,
        worker,
    }
}

async fn status(h: &Harness, id: &str) -> TenantStatus {
    h.store
        .get_tenant(&CallContext::service(), id)
        .await
        .unwrap()
        .status
}

#[tokio::test]
async fn transient_failure_is_retried_after_backoff() {
    let h = harness(5, &["t1"]).await;
    h.cloud.fail_on(CloudStep::CreateStorage);
    h.worker.submit("t1", LifecycleCommand::Provision).unwrap();
    let now = now_ms();

    let first = h.worker.run_once(now).await.unwrap();
    assert_eq!(first.dequeued, 1);
    assert_eq!(first.retried, 1);
    assert_eq!(status(&h, "t1").await, TenantStatus::Pending);
    assert_eq!(h.worker.queued(), 1);
    assert_eq!(h.audit.events_with_action("lifecycle_retry").len(), 1);

    let early = h.worker.run_once(now + 500).await.unwrap();
    assert_eq!(early.dequeued, 0);

    h.cloud.recover(CloudStep::CreateStorage);
    let second = h.worker.run_once(now + 1_000).await.unwrap();
    assert_eq!(second.succeeded, 1);
    assert_eq!(status(&h, "t1").await, TenantStatus::Active);
    assert_eq!(h.worker.queued(), 0);
}

#[tokio::test]
async fn exhausted_retries_are_dead_lettered() {
    let h = harness(2, &["t1"]).await;
    h.cloud.fail_on(CloudStep::CreateIdentity);
    h.worker.submit("t1", LifecycleCommand::Provision).unwrap();
    let now = now_ms();

    assert_eq!(h.worker.run_once(now).await.unwrap().retried, 1);
    let last = h.worker.run_once(now + 1_000).await.unwrap();

    assert_eq!(last.dead_lettered, 1);
    assert_eq!(h.worker.queued(), 0);
    let dead = h.audit.events_with_action("lifecycle_dead_letter");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].tenant, "t1");
    assert_eq!(status(&h, "t1").await, TenantStatus::Pending);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let h = harness(5, &[]).await;
    h.worker.submit("ghost", LifecycleCommand::Provision).unwrap();

    let report = h.worker.run_once(now_ms()).await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.retried, 0);
    assert!(h.audit.events_with_action("lifecycle_retry").is_empty());
}

#[tokio::test]
async fn later_jobs_wait_behind_a_retrying_job() {
    let h = harness(5, &["t1", "t2"]).await;
    h.cloud.fail_on(CloudStep::StoreSecret);
    h.worker.submit("t1", LifecycleCommand::Provision).unwrap();
    h.worker.submit("t1", LifecycleCommand::UpdateConfig).unwrap();
    let now = now_ms();

    let first = h.worker.run_once(now).await.unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!(first.deferred, 1);
    assert_eq!(h.worker.queued(), 2);

    h.cloud.recover(CloudStep::StoreSecret);
    h.worker.submit("t2", LifecycleCommand::Provision).unwrap();
    let second = h.worker.run_once(now + 1_000).await.unwrap();

    assert_eq!(second.succeeded, 3);
    let t1 = h.store.get_tenant(&CallContext::service(), "t1").await.unwrap();
    assert_eq!(t1.status, TenantStatus::Active);
    assert_eq!(t1.config_version, 2);
    assert_eq!(status(&h, "t2").await, TenantStatus::Active);
}

#[tokio::test]
async fn deprovision_job_tears_down() {
    let h = harness(5, &["t1"]).await;
    h.worker.submit("t1", LifecycleCommand::Provision).unwrap();
    h.worker.run_once(now_ms()).await.unwrap();
    h.worker.submit("t1", LifecycleCommand::Deprovision).unwrap();

    let report = h.worker.run_once(now_ms()).await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(status(&h, "t1").await, TenantStatus::Deleted);
    assert_eq!(h.cloud.compute_count(), 0);
}

#[tokio::test]
async fn file_queue_keeps_unfinished_jobs_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let cloud = Arc::new(InMemoryCloudProvider::default());
    for id in ["t1", "t2"] {
        store
            .create_tenant(&CallContext::service(), Tenant::new(id, "UTC", Utc::now()))
            .await
            .unwrap();
    }
    let orchestrator = Arc::new(ResourceOrchestrator::new(
        store.clone(),
        cloud.clone(),
        TokioSpawner::current().unwrap(),
        OrchestratorSettings::default(),
    ));
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
    };
    let now = now_ms();
    cloud.fail_on(CloudStep::CreateCompute);
    {
        let worker = LifecycleWorker::new(
            FileJobQueue::new(dir.path(), "lifecycle", 2).unwrap(),
            orchestrator.clone(),
            policy.clone(),
        );
        worker.submit("t1", LifecycleCommand::Provision).unwrap();
        worker.submit("t1", LifecycleCommand::UpdateConfig).unwrap();
        let report = worker.run_once(now).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.deferred, 1);
        // Full, yet the retry and the deferred job kept their slots.
        assert!(worker.submit("t2", LifecycleCommand::Provision).is_err());
    }

    let mut reopened = FileJobQueue::new(dir.path(), "lifecycle", 2).unwrap();
    assert_eq!(reopened.len(), 2);
    assert!(reopened.dequeue_ready(now).unwrap().is_none());
    let retry = reopened.dequeue_ready(now + 1_000).unwrap().unwrap();
    assert_eq!(retry.command, LifecycleCommand::Provision);
    assert_eq!(retry.attempt, 1);
    let deferred = reopened.dequeue_ready(now + 1_000).unwrap().unwrap();
    assert_eq!(deferred.command, LifecycleCommand::UpdateConfig);
    drop(reopened);

    cloud.recover(CloudStep::CreateCompute);
    let worker = LifecycleWorker::new(
        FileJobQueue::new(dir.path(), "lifecycle", 2).unwrap(),
        orchestrator,
        policy,
    );
    let report = worker.run_once(now + 1_000).await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(worker.queued(), 0);
    assert!(FileJobQueue::new(dir.path(), "lifecycle", 2).unwrap().is_empty());
    let t1 = store.get_tenant(&CallContext::service(), "t1").await.unwrap();
    assert_eq!(t1.status, TenantStatus::Active);
    assert_eq!(t1.config_version, 2);
}
