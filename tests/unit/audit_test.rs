//! Tests for audit sink

use gen_dispatch::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    sink.record(build_audit_event(1, AuditAction::Reserve, None));
    sink.record(build_audit_event(1, AuditAction::Load, Some("sdxl".to_string())));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].backend, 1);
    assert_eq!(events[1].action, AuditAction::Load);
    assert_eq!(events[1].detail.as_deref(), Some("sdxl"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(1, AuditAction::Reserve, None));
    sink.record(build_audit_event(2, AuditAction::Reserve, None));
    sink.record(build_audit_event(3, AuditAction::Reserve, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].backend, 2); // First one popped
    assert_eq!(events[1].backend, 3);
}

#[test]
fn test_count_filters_backend_and_action() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event(1, AuditAction::Reserve, None));
    sink.record(build_audit_event(1, AuditAction::Release, None));
    sink.record(build_audit_event(2, AuditAction::Release, None));

    assert_eq!(sink.count(1, AuditAction::Release), 1);
    assert_eq!(sink.count(2, AuditAction::Reserve), 0);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(7, AuditAction::Register, None);
    assert_eq!(event.backend, 7);
    assert_eq!(event.action, AuditAction::Register);
    assert!(event.created_at_ms > 0);
}
