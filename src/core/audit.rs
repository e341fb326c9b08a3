//! Audit trail for backend occupancy transitions.
//!
//! The registry records one event per register/reserve/load/busy/release/remove
//! when a sink is attached.

use std::collections::VecDeque;

use crate::core::BackendId;
use crate::util::clock::now_ms;

/// Backend transition being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Backend added to the registry.
    Register,
    /// Backend moved Free → Reserved.
    Reserve,
    /// Model loaded while reserved.
    Load,
    /// Backend moved Reserved → Busy.
    Busy,
    /// Backend returned to Free.
    Release,
    /// Backend removed from the registry.
    Remove,
}

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Backend the event concerns.
    pub backend: BackendId,
    /// Transition taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context, such as the model loaded.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Number of stored events for `backend` with `action`.
    #[must_use]
    pub fn count(&self, backend: BackendId, action: AuditAction) -> usize {
        self.events
            .iter()
            .filter(|e| e.backend == backend && e.action == action)
            .count()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Shared sinks let callers inspect events the registry recorded.
impl<S: AuditSink> AuditSink for std::sync::Arc<parking_lot::Mutex<S>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_audit_event(
    backend: BackendId,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        backend,
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
