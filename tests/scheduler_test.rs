//! Scheduler batch tests.

mod common;

use std::sync::Arc;

use common::{active_tenant, at, ScriptedGateway};
use prometheus_control_plane::core::{
    AutomationService, AutomationStore, CallContext, ExecutionPolicy, Executor, GatewayError,
    NewAutomation, ScheduleSpec, Scheduler, Tenant, TenantStore,
};
use prometheus_control_plane::infra::InMemoryStore;
use prometheus_control_plane::runtime::{trigger_run_due, TriggerRequest};
use serde_json::json;

async fn create_job(store: &Arc<InMemoryStore>, tenant_id: &str, time: &str, timezone: &str) -> String {
    AutomationService::new(store.clone())
        .create(
            &CallContext::service(),
            NewAutomation {
                tenant_id: tenant_id.to_string(),
                kind: "digest".to_string(),
                schedule: ScheduleSpec::daily(time, timezone),
                quiet_hours: None,
                payload: json!({}),
            },
            at("2026-02-12T00:00:00Z"),
        )
        .await
        .unwrap()
        .id
}

fn scheduler(store: &Arc<InMemoryStore>, gateway: &Arc<ScriptedGateway>) -> Scheduler {
    let executor = Executor::new(store.clone(), gateway.clone(), ExecutionPolicy::default());
    Scheduler::new(store.clone(), Arc::new(executor)).with_concurrency(2)
}

#[tokio::test]
async fn get_due_orders_and_limits() {
    let store = Arc::new(InMemoryStore::new());
    let gateway = ScriptedGateway::new();
    active_tenant(&store, "t1", "s1", "UTC").await;
    let late = create_job(&store, "t1", "10:00", "UTC").await;
    let early = create_job(&store, "t1", "09:00", "UTC").await;
    create_job(&store, "t1", "23:00", "UTC").await;

    let due = scheduler(&store, &gateway)
        .get_due(&CallContext::service(), at("2026-02-12T12:00:00Z"), 10)
        .await
        .unwrap();
    let ids: Vec<_> = due.iter().map(|a| a.id.clone()).collect();
    assert_eq!(ids, vec![early.clone(), late]);

    let limited = scheduler(&store, &gateway)
        .get_due(&CallContext::service(), at("2026-02-12T12:00:00Z"), 1)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, early);
}

#[tokio::test]
async fn run_due_summarizes_outcomes() {
    let store = Arc::new(InMemoryStore::new());
    let gateway = ScriptedGateway::new();
    active_tenant(&store, "t1", "s1", "UTC").await;
    active_tenant(&store, "t2", "s2", "UTC").await;
    create_job(&store, "t1", "09:00", "UTC").await;
    create_job(&store, "t2", "09:30", "UTC").await;
    gateway.push(Err(GatewayError::Unreachable("connection refused".to_string())));

    let summary = scheduler(&store, &gateway)
        .run_due(&CallContext::service(), at("2026-02-12T10:00:00Z"), 50)
        .await
        .unwrap();

    assert_eq!(summary.due_count, 2);
    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.succeeded + summary.failed, 2);
    assert_eq!(summary.failed, 1);
    assert!(summary.errors.is_empty());

    let again = scheduler(&store, &gateway)
        .run_due(&CallContext::service(), at("2026-02-12T10:00:00Z"), 50)
        .await
        .unwrap();
    assert_eq!(again.due_count, 0);
}

#[tokio::test]
async fn per_item_errors_do_not_abort_batch() {
    let store = Arc::new(InMemoryStore::new());
    let gateway = ScriptedGateway::new();
    active_tenant(&store, "t1", "s1", "UTC").await;
    let ctx = CallContext::service();
    store
        .create_tenant(&ctx, Tenant::new("broken", "Mars/Olympus_Mons", at("2026-02-12T00:00:00Z")))
        .await
        .unwrap();
    create_job(&store, "t1", "09:00", "UTC").await;
    let broken = create_job(&store, "broken", "09:00", "UTC").await;

    let summary = scheduler(&store, &gateway)
        .run_due(&ctx, at("2026-02-12T10:00:00Z"), 50)
        .await
        .unwrap();

    assert_eq!(summary.due_count, 2);
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].automation_id, broken);
    assert!(summary.errors[0].error.contains("timezone"));
}

#[tokio::test]
async fn timezone_decides_due_time() {
    let store = Arc::new(InMemoryStore::new());
    let gateway = ScriptedGateway::new();
    active_tenant(&store, "t1", "s1", "America/Los_Angeles").await;
    let id = create_job(&store, "t1", "09:00", "America/Los_Angeles").await;
    let ctx = CallContext::service();

    let automation = store.get_automation(&ctx, &id).await.unwrap();
    assert_eq!(automation.next_run_at, Some(at("2026-02-12T17:00:00Z")));

    let before = scheduler(&store, &gateway)
        .run_due(&ctx, at("2026-02-12T16:59:59Z"), 50)
        .await
        .unwrap();
    assert_eq!(before.due_count, 0);
}

#[tokio::test]
async fn trigger_reports_camel_case_summary() {
    let store = Arc::new(InMemoryStore::new());
    let gateway = ScriptedGateway::new();
    active_tenant(&store, "t1", "s1", "UTC").await;
    create_job(&store, "t1", "09:00", "UTC").await;

    let response = trigger_run_due(
        &scheduler(&store, &gateway),
        TriggerRequest {
            now: Some(at("2026-02-12T09:00:00Z")),
            limit: 50,
        },
    )
    .await
    .unwrap();

    assert_eq!(response.exit_code(), 0);
    let body = serde_json::to_value(&response).unwrap();
    assert_eq!(body["dueCount"], 1);
    assert_eq!(body["processedCount"], 1);
    assert_eq!(body["succeeded"], 1);
}
