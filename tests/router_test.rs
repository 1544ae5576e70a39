//! Router integration tests: resolution, admission control and forwarding.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{active_tenant, at, message, FakeEndpoint, ScriptedGateway};
use prometheus_control_plane::core::{
    CallContext, ControlPlaneError, GatewayError, OffsetStore, RouteOutcome, Router,
    RouterSettings, Tenant, TenantStatus, TenantStore,
};
use prometheus_control_plane::core::router::{
    BUDGET_REPLY, ONBOARDING_REPLY, RATE_LIMIT_REPLY, RETRY_REPLY, STARTING_REPLY,
};
use prometheus_control_plane::infra::{
    InMemoryOffsetStore, InMemoryRouteCache, InMemoryStore, SlidingWindowRateLimiter,
};
use serde_json::json;
use tokio::sync::watch;

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: Arc<ScriptedGateway>,
    endpoint: Arc<FakeEndpoint>,
    cache: Arc<InMemoryRouteCache>,
    router: Router,
}

fn harness(rate_limit: usize, settings: RouterSettings) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = ScriptedGateway::new();
    let endpoint = FakeEndpoint::new();
    let cache = Arc::new(InMemoryRouteCache::new(Duration::from_secs(300)));
    let router = Router::new(
        endpoint.clone(),
        store.clone(),
        gateway.clone(),
        cache.clone(),
        Arc::new(SlidingWindowRateLimiter::new(rate_limit, Duration::from_secs(60))),
        settings,
    );
    Harness {
        store,
        gateway,
        endpoint,
        cache,
        router,
    }
}

fn replies_to(endpoint: &FakeEndpoint, sender: &str) -> Vec<String> {
    let chat = format!("chat-{sender}");
    endpoint
        .replies()
        .into_iter()
        .filter(|(chat_id, _)| *chat_id == chat)
        .map(|(_, text)| text)
        .collect()
}

#[tokio::test]
async fn unknown_sender_gets_onboarding_and_is_not_forwarded() {
    let h = harness(20, RouterSettings::default());
    let outcome = h
        .router
        .process_update(&CallContext::service(), &message(1, "stranger", "hello"), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome, RouteOutcome::Onboarding);
    assert!(h.gateway.calls().is_empty());
    assert_eq!(replies_to(&h.endpoint, "stranger"), vec![ONBOARDING_REPLY.to_string()]);
}

#[tokio::test]
async fn forwards_and_records_usage() {
    let h = harness(20, RouterSettings::default());
    active_tenant(&h.store, "t1", "alice", "UTC").await;
    h.gateway.push(Ok(json!({
        "reply": "Good morning!",
        "usage": { "input_tokens": 10, "output_tokens": 5 }
    })));
    let ctx = CallContext::service();

    let outcome = h
        .router
        .process_update(&ctx, &message(1, "alice", "hi"), at("2026-02-12T09:00:00Z"))
        .await
        .unwrap();

    assert_eq!(outcome, RouteOutcome::Forwarded);
    assert_eq!(replies_to(&h.endpoint, "alice"), vec!["Good morning!".to_string()]);
    let (tenant_id, operation, args) = &h.gateway.calls()[0];
    assert_eq!(tenant_id, "t1");
    assert_eq!(operation, "message.handle");
    assert_eq!(args["text"], "hi");
    assert_eq!(args["chatId"], "chat-alice");

    let tenant = h.store.get_tenant(&ctx, "t1").await.unwrap();
    assert_eq!(tenant.tokens_this_month, 15);
    assert_eq!(tenant.last_message_at, Some(at("2026-02-12T09:00:00Z")));
    let usage = h.store.usage_events();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].source, "message");
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn rate_limit_admits_n_then_rejects() {
    let h = harness(2, RouterSettings::default());
    active_tenant(&h.store, "t1", "alice", "UTC").await;
    let ctx = CallContext::service();
    let now = at("2026-02-12T09:00:00Z");

    let mut outcomes = Vec::new();
    for id in 1..=3 {
        outcomes.push(
            h.router
                .process_update(&ctx, &message(id, "alice", "ping"), now)
                .await
                .unwrap(),
        );
    }

    assert_eq!(
        outcomes,
        vec![
            RouteOutcome::Forwarded,
            RouteOutcome::Forwarded,
            RouteOutcome::RateLimited
        ]
    );
    assert_eq!(h.gateway.calls().len(), 2);
    assert_eq!(
        replies_to(&h.endpoint, "alice").last().map(String::as_str),
        Some(RATE_LIMIT_REPLY)
    );

    let later = h
        .router
        .process_update(&ctx, &message(4, "alice", "ping"), now + chrono::Duration::seconds(61))
        .await
        .unwrap();
    assert_eq!(later, RouteOutcome::Forwarded);
}

#[tokio::test]
async fn exhausted_budget_blocks_forwarding() {
    let h = harness(20, RouterSettings::default());
    let mut tenant = active_tenant(&h.store, "t1", "alice", "UTC").await;
    let ctx = CallContext::service();
    tenant.monthly_budget = Some(15);
    h.store.update_tenant(&ctx, &tenant).await.unwrap();
    h.gateway.push(Ok(json!({
        "reply": "done",
        "usage": { "input_tokens": 10, "output_tokens": 5 }
    })));

    let first = h
        .router
        .process_update(&ctx, &message(1, "alice", "one"), Utc::now())
        .await
        .unwrap();
    let second = h
        .router
        .process_update(&ctx, &message(2, "alice", "two"), Utc::now())
        .await
        .unwrap();

    assert_eq!(first, RouteOutcome::Forwarded);
    assert_eq!(second, RouteOutcome::BudgetExhausted);
    assert_eq!(h.gateway.calls().len(), 1);
    assert_eq!(
        replies_to(&h.endpoint, "alice").last().map(String::as_str),
        Some(BUDGET_REPLY)
    );
}

#[tokio::test]
async fn inactive_resource_gets_starting_reply() {
    let h = harness(20, RouterSettings::default());
    let ctx = CallContext::service();
    let mut tenant = Tenant::new("t1", "UTC", Utc::now()).with_sender("alice");
    tenant.status = TenantStatus::Provisioning;
    h.store.create_tenant(&ctx, tenant).await.unwrap();

    let outcome = h
        .router
        .process_update(&ctx, &message(1, "alice", "hi"), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome, RouteOutcome::Starting);
    assert!(h.gateway.calls().is_empty());
    assert_eq!(replies_to(&h.endpoint, "alice"), vec![STARTING_REPLY.to_string()]);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn cached_route_sees_suspension() {
    let h = harness(20, RouterSettings::default());
    let mut tenant = active_tenant(&h.store, "t1", "alice", "UTC").await;
    let ctx = CallContext::service();

    h.router
        .process_update(&ctx, &message(1, "alice", "hi"), Utc::now())
        .await
        .unwrap();
    assert_eq!(h.cache.len(), 1);

    tenant.status = TenantStatus::Suspended;
    h.store.update_tenant(&ctx, &tenant).await.unwrap();
    let outcome = h
        .router
        .process_update(&ctx, &message(2, "alice", "still there?"), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome, RouteOutcome::Starting);
    assert_eq!(h.gateway.calls().len(), 1);
    assert!(h.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn forward_timeout_is_dropped_silently() {
    let h = harness(
        20,
        RouterSettings {
            forward_timeout: Duration::from_secs(5),
            ..RouterSettings::default()
        },
    );
    active_tenant(&h.store, "t1", "alice", "UTC").await;
    h.gateway.delay_by(Duration::from_secs(120));

    let outcome = h
        .router
        .process_update(&CallContext::service(), &message(1, "alice", "slow one"), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome, RouteOutcome::Dropped);
    assert!(h.endpoint.replies().is_empty());
    assert!(h.store.usage_events().is_empty());
}

#[tokio::test]
async fn unreachable_resource_gets_retry_reply() {
    let h = harness(20, RouterSettings::default());
    active_tenant(&h.store, "t1", "alice", "UTC").await;
    h.gateway
        .push(Err(GatewayError::Unreachable("connection refused".to_string())));

    let outcome = h
        .router
        .process_update(&CallContext::service(), &message(1, "alice", "hi"), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome, RouteOutcome::Failed);
    assert_eq!(replies_to(&h.endpoint, "alice"), vec![RETRY_REPLY.to_string()]);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn empty_text_is_ignored() {
    let h = harness(20, RouterSettings::default());
    active_tenant(&h.store, "t1", "alice", "UTC").await;

    let outcome = h
        .router
        .process_update(&CallContext::service(), &message(1, "alice", "   "), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome, RouteOutcome::Ignored);
    assert!(h.gateway.calls().is_empty());
    assert!(h.endpoint.replies().is_empty());
}

#[tokio::test]
async fn poll_advances_offset_and_skips_seen_updates() {
    let offsets = Arc::new(InMemoryOffsetStore::new());
    let h = harness(20, RouterSettings::default());
    let router = h.router.with_offset_store(offsets.clone());
    active_tenant(&h.store, "t1", "alice", "UTC").await;

    h.endpoint
        .push_batch(Ok(vec![message(5, "alice", "a"), message(6, "stranger", "b")]));
    let first = router.poll_once().await.unwrap();
    assert_eq!(first, vec![RouteOutcome::Forwarded, RouteOutcome::Onboarding]);
    assert_eq!(router.offset(), 7);
    assert_eq!(offsets.load().await.unwrap(), 7);

    h.endpoint
        .push_batch(Ok(vec![message(6, "stranger", "b"), message(7, "alice", "c")]));
    let second = router.poll_once().await.unwrap();
    assert_eq!(second, vec![RouteOutcome::Ignored, RouteOutcome::Forwarded]);
    assert_eq!(router.offset(), 8);
    assert_eq!(h.endpoint.fetched_offsets(), vec![0, 7]);
    assert_eq!(h.gateway.calls().len(), 2);
}

#[tokio::test]
async fn restored_offset_resumes_after_restart() {
    let offsets = Arc::new(InMemoryOffsetStore::new());
    offsets.save(42).await.unwrap();
    let h = harness(20, RouterSettings::default());
    let router = h.router.with_offset_store(offsets);

    assert_eq!(router.restore_offset().await.unwrap(), 42);
    h.endpoint.push_batch(Ok(Vec::new()));
    router.poll_once().await.unwrap();
    assert_eq!(h.endpoint.fetched_offsets(), vec![42]);
}

#[tokio::test]
async fn poll_failure_is_returned() {
    let h = harness(20, RouterSettings::default());
    h.endpoint
        .push_batch(Err(ControlPlaneError::TransientInfra("endpoint down".to_string())));

    let err = h.router.poll_once().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.router.offset(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_survives_poll_failures_until_shutdown() {
    let h = harness(20, RouterSettings::default());
    active_tenant(&h.store, "t1", "alice", "UTC").await;
    h.endpoint.push_batch(Ok(vec![message(1, "alice", "hi")]));
    h.endpoint
        .push_batch(Err(ControlPlaneError::TransientInfra("endpoint down".to_string())));
    h.endpoint.push_batch(Ok(vec![message(2, "alice", "again")]));

    let (tx, rx) = watch::channel(false);
    let stop = async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(h.router.run(rx), stop);

    result.unwrap();
    assert_eq!(h.router.offset(), 3);
    assert_eq!(h.gateway.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_forward_completes_the_update() {
    let h = harness(20, RouterSettings::default());
    active_tenant(&h.store, "t1", "alice", "UTC").await;
    h.gateway.delay_by(Duration::from_secs(5));
    h.endpoint.push_batch(Ok(vec![
        message(1, "alice", "first"),
        message(2, "alice", "second"),
    ]));

    let (tx, rx) = watch::channel(false);
    let stop = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(h.router.run(rx), stop);

    result.unwrap();
    assert_eq!(h.gateway.calls().len(), 1);
    assert_eq!(h.router.offset(), 2);
    assert_eq!(replies_to(&h.endpoint, "alice"), vec!["ok".to_string()]);
}

#[tokio::test]
async fn prune_forgets_idle_senders() {
    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(InMemoryRouteCache::new(Duration::from_secs(300)));
    let limiter = Arc::new(SlidingWindowRateLimiter::new(20, Duration::from_secs(60)));
    let router = Router::new(
        FakeEndpoint::new(),
        store.clone(),
        ScriptedGateway::new(),
        cache.clone(),
        limiter.clone(),
        RouterSettings::default(),
    );
    active_tenant(&store, "t1", "alice", "UTC").await;
    active_tenant(&store, "t2", "bob", "UTC").await;
    let now = at("2026-02-12T16:00:00Z");
    let ctx = CallContext::service();
    router.process_update(&ctx, &message(1, "alice", "hi"), now).await.unwrap();
    router.process_update(&ctx, &message(2, "bob", "hi"), now).await.unwrap();
    assert_eq!(limiter.tracked_keys(), 2);
    assert_eq!(cache.len(), 2);

    router.prune(now + chrono::Duration::seconds(61));
    assert_eq!(limiter.tracked_keys(), 0);
    assert_eq!(cache.len(), 2);

    router.prune(now + chrono::Duration::seconds(300));
    assert!(cache.is_empty());
}
