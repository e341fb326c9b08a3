//! Live set of worker backends and their occupancy.
//!
//! Every state transition happens under one `parking_lot::Mutex` over the
//! backend list, so no two allocation attempts can reserve the same backend.
//! Transitions that can unblock a waiter (release, register, remove, shutdown)
//! wake all registered waiters through a `tokio::sync::Notify`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::core::{
    build_audit_event, AuditAction, AuditSink, CancellationToken, GenerationBackend,
};

/// Registry-assigned backend identifier.
pub type BackendId = u64;

/// Occupancy of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    /// Available for reservation.
    Free,
    /// Held by one caller, possibly loading a model.
    Reserved,
    /// Held by one caller and generating.
    Busy,
}

/// Capability metadata of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendInfo {
    /// Backend type tag, compared case-insensitively.
    pub type_tag: String,
    /// Models this backend can load; empty means any.
    pub available_models: BTreeSet<String>,
    /// Model currently loaded, if any.
    pub loaded_model: Option<String>,
}

impl BackendInfo {
    /// Info for a backend of `type_tag` that can load any model.
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            ..Self::default()
        }
    }

    /// Restrict the models this backend can load.
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Mark `model` as already loaded.
    #[must_use]
    pub fn with_loaded(mut self, model: impl Into<String>) -> Self {
        self.loaded_model = Some(model.into());
        self
    }

    /// Whether this backend can serve `model`, loading it if needed.
    #[must_use]
    pub fn can_serve(&self, model: Option<&str>) -> bool {
        model.is_none_or(|m| {
            self.available_models.is_empty()
                || self.available_models.contains(m)
                || self.loaded_model.as_deref() == Some(m)
        })
    }

    /// Whether `model` is usable without a load step.
    #[must_use]
    pub fn has_loaded(&self, model: Option<&str>) -> bool {
        model.is_none_or(|m| self.loaded_model.as_deref() == Some(m))
    }
}

/// Closed set of backend selection criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFilter {
    /// Only backends with this type tag (case-insensitive).
    pub type_tag: Option<String>,
    /// Only this exact backend.
    pub backend_id: Option<BackendId>,
}

impl BackendFilter {
    /// Match every backend.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Match backends of one type.
    pub fn of_type(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: Some(type_tag.into()),
            backend_id: None,
        }
    }

    /// Match exactly one backend.
    #[must_use]
    pub const fn backend(id: BackendId) -> Self {
        Self {
            type_tag: None,
            backend_id: Some(id),
        }
    }

    /// Evaluate the filter against one backend.
    #[must_use]
    pub fn matches(&self, id: BackendId, info: &BackendInfo) -> bool {
        if self.backend_id.is_some_and(|wanted| wanted != id) {
            return false;
        }
        self.type_tag
            .as_deref()
            .is_none_or(|tag| tag.eq_ignore_ascii_case(&info.type_tag))
    }
}

/// Read-only view of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSnapshot {
    /// Backend identifier.
    pub id: BackendId,
    /// Capability metadata.
    pub info: BackendInfo,
    /// Occupancy at snapshot time.
    pub state: Occupancy,
}

struct BackendEntry {
    id: BackendId,
    info: BackendInfo,
    state: Occupancy,
    backend: Arc<dyn GenerationBackend>,
}

impl BackendEntry {
    fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id,
            info: self.info.clone(),
            state: self.state,
        }
    }
}

/// Outcome of one reservation attempt.
pub(crate) enum ReserveAttempt {
    /// A backend moved Free → Reserved for the caller.
    Reserved {
        id: BackendId,
        backend: Arc<dyn GenerationBackend>,
        info: BackendInfo,
    },
    /// Capable backends exist but none is free.
    AllBusy,
    /// No backend matches the filter and model at all.
    NoneCapable,
    /// The registry is shutting down.
    ShutDown,
}

/// Process-wide registry of generation backends.
pub struct BackendRegistry {
    entries: Mutex<Vec<BackendEntry>>,
    changed: Notify,
    next_id: AtomicU64,
    program: CancellationToken,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Create an empty registry with its own program-level cancel signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            changed: Notify::new(),
            next_id: AtomicU64::new(1),
            program: CancellationToken::new(),
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Program-level signal; fired by [`Self::shutdown`].
    pub const fn program_signal(&self) -> &CancellationToken {
        &self.program
    }

    pub(crate) const fn changed(&self) -> &Notify {
        &self.changed
    }

    fn record(&self, id: BackendId, action: AuditAction, detail: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.lock().record(build_audit_event(id, action, detail));
        }
    }

    /// Add a backend; it starts Free.
    pub fn register(&self, info: BackendInfo, backend: Arc<dyn GenerationBackend>) -> BackendId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(backend = id, type_tag = %info.type_tag, "backend registered");
        self.entries.lock().push(BackendEntry {
            id,
            info,
            state: Occupancy::Free,
            backend,
        });
        self.record(id, AuditAction::Register, None);
        self.changed.notify_waiters();
        id
    }

    /// Remove a backend. An outstanding reservation on it becomes inert.
    pub fn remove(&self, id: BackendId) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| e.id != id);
            entries.len() != before
        };
        if removed {
            info!(backend = id, "backend removed");
            self.record(id, AuditAction::Remove, None);
            self.changed.notify_waiters();
        }
        removed
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of every backend.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.entries.lock().iter().map(BackendEntry::snapshot).collect()
    }

    /// Snapshot of backends that match `filter` and can serve `model`.
    pub fn list_capable(&self, model: Option<&str>, filter: &BackendFilter) -> Vec<BackendSnapshot> {
        self.entries
            .lock()
            .iter()
            .filter(|e| filter.matches(e.id, &e.info) && e.info.can_serve(model))
            .map(BackendEntry::snapshot)
            .collect()
    }

    /// Current occupancy of one backend.
    pub fn state_of(&self, id: BackendId) -> Option<Occupancy> {
        self.entries.lock().iter().find(|e| e.id == id).map(|e| e.state)
    }

    /// Models loaded on at least one backend.
    pub fn loaded_models(&self) -> BTreeSet<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| e.info.loaded_model.clone())
            .collect()
    }

    fn transition(&self, id: BackendId, from: &[Occupancy], to: Occupancy) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        if !from.contains(&entry.state) {
            return false;
        }
        debug!(backend = id, from = ?entry.state, to = ?to, "backend transition");
        entry.state = to;
        true
    }

    /// Free → Reserved. Returns false if the backend was not free.
    pub fn mark_reserved(&self, id: BackendId) -> bool {
        let ok = self.transition(id, &[Occupancy::Free], Occupancy::Reserved);
        if ok {
            self.record(id, AuditAction::Reserve, None);
        }
        ok
    }

    /// Reserved → Busy. Returns false if the backend was not reserved.
    pub fn mark_busy(&self, id: BackendId) -> bool {
        let ok = self.transition(id, &[Occupancy::Reserved], Occupancy::Busy);
        if ok {
            self.record(id, AuditAction::Busy, None);
        }
        ok
    }

    /// Reserved/Busy → Free, waking waiters. Returns false if already free or gone.
    pub fn mark_free(&self, id: BackendId) -> bool {
        let ok = self.transition(id, &[Occupancy::Reserved, Occupancy::Busy], Occupancy::Free);
        if ok {
            self.record(id, AuditAction::Release, None);
            self.changed.notify_waiters();
        }
        ok
    }

    /// Record that `model` is now loaded on `id`.
    pub fn set_loaded_model(&self, id: BackendId, model: &str) {
        if let Some(entry) = self.entries.lock().iter_mut().find(|e| e.id == id) {
            entry.info.loaded_model = Some(model.to_string());
        }
        self.record(id, AuditAction::Load, Some(model.to_string()));
    }

    /// Stop serving: fires the program signal and wakes every waiter.
    pub fn shutdown(&self) {
        info!("backend registry shutting down");
        self.program.cancel();
        self.changed.notify_waiters();
    }

    /// Whether [`Self::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.program.is_cancelled()
    }

    /// Pick and reserve one backend in a single critical section.
    ///
    /// Prefers a free backend with `model` already loaded, then any free
    /// backend able to load it.
    pub(crate) fn try_reserve(&self, model: Option<&str>, filter: &BackendFilter) -> ReserveAttempt {
        if self.is_shut_down() {
            return ReserveAttempt::ShutDown;
        }
        let attempt = {
            let mut entries = self.entries.lock();
            let capable: Vec<usize> = entries
                .iter()
                .enumerate()
                .filter(|(_, e)| filter.matches(e.id, &e.info) && e.info.can_serve(model))
                .map(|(i, _)| i)
                .collect();
            if capable.is_empty() {
                return ReserveAttempt::NoneCapable;
            }
            let free = |i: &&usize| entries[**i].state == Occupancy::Free;
            let pick = capable
                .iter()
                .filter(free)
                .find(|i| entries[**i].info.has_loaded(model))
                .or_else(|| capable.iter().find(free))
                .copied();
            match pick {
                Some(i) => {
                    let entry = &mut entries[i];
                    entry.state = Occupancy::Reserved;
                    ReserveAttempt::Reserved {
                        id: entry.id,
                        backend: Arc::clone(&entry.backend),
                        info: entry.info.clone(),
                    }
                }
                None => ReserveAttempt::AllBusy,
            }
        };
        if let ReserveAttempt::Reserved { id, .. } = &attempt {
            debug!(backend = id, "backend reserved");
            self.record(*id, AuditAction::Reserve, None);
        }
        attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Artifact, DispatchError, GenerationParams};
    use async_trait::async_trait;

    struct NullBackend;

    #[async_trait]
    impl GenerationBackend for NullBackend {
        async fn load_model(&self, _model: &str) -> Result<(), DispatchError> {
            Ok(())
        }

        async fn generate(&self, _params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn filter_matches_type_case_insensitively() {
        let info = BackendInfo::new("ComfyUI");
        assert!(BackendFilter::of_type("comfyui").matches(1, &info));
        assert!(!BackendFilter::of_type("auto").matches(1, &info));
        assert!(BackendFilter::backend(1).matches(1, &info));
        assert!(!BackendFilter::backend(2).matches(1, &info));
    }

    #[test]
    fn reserve_prefers_backend_with_model_loaded() {
        let registry = BackendRegistry::new();
        let cold = registry.register(BackendInfo::new("a"), Arc::new(NullBackend));
        let warm = registry.register(BackendInfo::new("a").with_loaded("m1"), Arc::new(NullBackend));

        match registry.try_reserve(Some("m1"), &BackendFilter::any()) {
            ReserveAttempt::Reserved { id, .. } => assert_eq!(id, warm),
            _ => panic!("expected a reservation"),
        }
        assert_eq!(registry.state_of(cold), Some(Occupancy::Free));
    }

    #[test]
    fn reserve_distinguishes_busy_from_incapable() {
        let registry = BackendRegistry::new();
        let id = registry.register(BackendInfo::new("a").with_models(["m1"]), Arc::new(NullBackend));

        assert!(matches!(
            registry.try_reserve(Some("m2"), &BackendFilter::any()),
            ReserveAttempt::NoneCapable
        ));
        assert!(registry.mark_reserved(id));
        assert!(matches!(
            registry.try_reserve(Some("m1"), &BackendFilter::any()),
            ReserveAttempt::AllBusy
        ));
        assert!(registry.mark_busy(id));
        assert!(registry.mark_free(id));
        assert!(!registry.mark_free(id));
    }
}
