//! Tests for audit sink

use prometheus_control_plane::core::{
    build_audit_event, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("tenant1", "run1", "run_succeeded", Some("ok".to_string()));
    sink.record(event.clone());

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], event);
    assert_eq!(events[0].tenant, "tenant1");
    assert_eq!(events[0].subject, "run1");
    assert_eq!(events[0].action, "run_succeeded");
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("tenant1", "run1", "run_succeeded", None));
    sink.record(build_audit_event("tenant1", "run2", "run_failed", None));
    sink.record(build_audit_event("tenant1", "run3", "run_skipped", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject, "run2"); // First one popped
    assert_eq!(events[1].subject, "run3");
}

#[test]
fn test_events_with_action_filters() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event("t1", "t1", "status_provisioning", None));
    sink.record(build_audit_event("t1", "t1", "status_active", None));
    sink.record(build_audit_event("t2", "t2", "status_active", None));

    let active = sink.events_with_action("status_active");
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|e| e.action == "status_active"));
}

#[test]
fn test_event_ids_are_unique() {
    let a = build_audit_event("t1", "s", "a", None);
    let b = build_audit_event("t1", "s", "a", None);
    assert_ne!(a.event_id, b.event_id);
}

#[test]
fn test_noop_sink_accepts_events() {
    NoopAuditSink.record(build_audit_event("t1", "s", "a", None));
}

#[test]
fn test_tracing_sink_and_serialization() {
    let event = build_audit_event("t1", "job-1", "lifecycle_retry", Some("provision attempt 1".to_string()));
    TracingAuditSink.record(event.clone());

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["tenant"], "t1");
    assert_eq!(json["action"], "lifecycle_retry");
    assert!(json["createdAtMs"].is_number());
}
