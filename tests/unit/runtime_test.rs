//! Tests for tokio spawner utilities and the trigger surface

use prometheus_control_plane::core::{RunFailure, Spawn};
use prometheus_control_plane::runtime::{health, TokioSpawner, TriggerResponse};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_spawner_requires_runtime() {
    assert!(TokioSpawner::current().is_err());
}

#[test]
fn test_trigger_response_is_camel_case_and_exits_zero() {
    let response = TriggerResponse {
        due_count: 2,
        processed_count: 1,
        succeeded: 0,
        failed: 1,
        skipped: 0,
        errors: vec![RunFailure {
            automation_id: "a1".to_string(),
            error: "not found: tenant `t9`".to_string(),
        }],
    };
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["dueCount"], 2);
    assert_eq!(json["processedCount"], 1);
    assert_eq!(json["errors"][0]["automationId"], "a1");
    assert_eq!(response.exit_code(), 0);
}

#[test]
fn test_health() {
    assert!(health().ok);
}
