//! Per-session and per-batch generation accounting.
//!
//! A [`Session`] aggregates counters across every live [`GenClaim`] and
//! publishes them as a [`StatusSnapshot`] on a `watch` channel. A claim holds
//! its own share of each counter and gives all of it back when dropped, so the
//! session returns to its baseline however the batch ended.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::CancellationToken;

/// Counter categories tracked per claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimCategory {
    /// Generations requested but not yet finished.
    QueuedGens,
    /// Items waiting for a backend.
    BackendWaits,
    /// Model loads in progress.
    ModelLoads,
    /// Generations running on a backend.
    LiveGens,
    /// Generations finished in this claim.
    CompletedGens,
}

impl ClaimCategory {
    /// Every category, in snapshot order.
    pub const ALL: [Self; 5] = [
        Self::QueuedGens,
        Self::BackendWaits,
        Self::ModelLoads,
        Self::LiveGens,
        Self::CompletedGens,
    ];

    const fn index(self) -> usize {
        match self {
            Self::QueuedGens => 0,
            Self::BackendWaits => 1,
            Self::ModelLoads => 2,
            Self::LiveGens => 3,
            Self::CompletedGens => 4,
        }
    }
}

/// Aggregate counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Generations queued.
    pub waiting_gens: u32,
    /// Items waiting for a backend.
    pub waiting_backends: u32,
    /// Model loads in progress.
    pub loading_models: u32,
    /// Generations running.
    pub live_gens: u32,
    /// Generations finished within live claims.
    pub completed_gens: u32,
}

impl StatusSnapshot {
    /// Counter for one category.
    #[must_use]
    pub const fn get(&self, category: ClaimCategory) -> u32 {
        match category {
            ClaimCategory::QueuedGens => self.waiting_gens,
            ClaimCategory::BackendWaits => self.waiting_backends,
            ClaimCategory::ModelLoads => self.loading_models,
            ClaimCategory::LiveGens => self.live_gens,
            ClaimCategory::CompletedGens => self.completed_gens,
        }
    }

    fn slot_mut(&mut self, category: ClaimCategory) -> &mut u32 {
        match category {
            ClaimCategory::QueuedGens => &mut self.waiting_gens,
            ClaimCategory::BackendWaits => &mut self.waiting_backends,
            ClaimCategory::ModelLoads => &mut self.loading_models,
            ClaimCategory::LiveGens => &mut self.live_gens,
            ClaimCategory::CompletedGens => &mut self.completed_gens,
        }
    }

    /// Whether every counter is zero.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        ClaimCategory::ALL.iter().all(|c| self.get(*c) == 0)
    }
}

struct SessionInner {
    id: Uuid,
    status: watch::Sender<StatusSnapshot>,
    parent: CancellationToken,
    interrupt: Mutex<CancellationToken>,
}

/// One caller's session: status counters and an interrupt signal.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Session {
    /// Create a session whose interrupt is a child of `parent`.
    #[must_use]
    pub fn new(parent: &CancellationToken) -> Self {
        let (status, _) = watch::channel(StatusSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                status,
                parent: parent.clone(),
                interrupt: Mutex::new(parent.child_token()),
            }),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current aggregate counters.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        *self.inner.status.borrow()
    }

    /// Receive every re-rendered snapshot.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.status.subscribe()
    }

    /// Open a claim for `queued` generations.
    #[must_use]
    pub fn claim(&self, queued: u32) -> Arc<GenClaim> {
        let local = self.inner.interrupt.lock().child_token();
        let claim = GenClaim {
            session: self.clone(),
            counts: Default::default(),
            local,
        };
        claim.extend(ClaimCategory::QueuedGens, queued);
        Arc::new(claim)
    }

    /// Cancel every claim opened so far; later claims are unaffected.
    pub fn interrupt(&self) {
        let mut current = self.inner.interrupt.lock();
        current.cancel();
        *current = self.inner.parent.child_token();
        debug!(session = %self.inner.id, "session interrupted");
    }

    fn adjust(&self, category: ClaimCategory, add: u32, sub: u32) {
        self.inner.status.send_modify(|snapshot| {
            let slot = snapshot.slot_mut(category);
            *slot = slot.saturating_add(add).saturating_sub(sub);
        });
    }
}

/// Accounting for one batch, tied to its session.
pub struct GenClaim {
    session: Session,
    counts: [AtomicU32; 5],
    local: CancellationToken,
}

impl std::fmt::Debug for GenClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<u32> = ClaimCategory::ALL.iter().map(|c| self.count(*c)).collect();
        f.debug_struct("GenClaim")
            .field("session", &self.session.id())
            .field("counts", &counts)
            .field("cancelled", &self.should_cancel())
            .finish()
    }
}

impl GenClaim {
    /// Session this claim reports to.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// This claim's own count for `category`.
    pub fn count(&self, category: ClaimCategory) -> u32 {
        self.counts[category.index()].load(Ordering::Acquire)
    }

    /// Add `n` to `category` and re-render the session snapshot.
    pub fn extend(&self, category: ClaimCategory, n: u32) {
        if n == 0 {
            return;
        }
        self.counts[category.index()].fetch_add(n, Ordering::AcqRel);
        self.session.adjust(category, n, 0);
    }

    /// Take `n` back from `category`, never going below zero.
    ///
    /// Returns how much was actually completed.
    pub fn complete(&self, category: ClaimCategory, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        let counter = &self.counts[category.index()];
        let mut current = counter.load(Ordering::Acquire);
        let taken = loop {
            let take = current.min(n);
            match counter.compare_exchange_weak(
                current,
                current - take,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break take,
                Err(actual) => current = actual,
            }
        };
        if taken < n {
            warn!(?category, requested = n, taken, "claim over-completed");
        }
        self.session.adjust(category, 0, taken);
        taken
    }

    /// Extend `category` by `n` until the returned guard drops.
    pub fn hold(&self, category: ClaimCategory, n: u32) -> ClaimHold<'_> {
        self.extend(category, n);
        ClaimHold {
            claim: self,
            category,
            held: AtomicU32::new(n),
        }
    }

    /// Whether this claim, its session or the program has been cancelled.
    pub fn should_cancel(&self) -> bool {
        self.local.is_cancelled()
    }

    /// Stop new items of this claim from starting.
    ///
    /// Items already running continue to their next checkpoint.
    pub fn cancel(&self) {
        self.local.cancel();
    }

    /// Signal observed by waits made on behalf of this claim.
    pub const fn cancel_signal(&self) -> &CancellationToken {
        &self.local
    }
}

impl Drop for GenClaim {
    fn drop(&mut self) {
        for category in ClaimCategory::ALL {
            let remaining = self.counts[category.index()].swap(0, Ordering::AcqRel);
            if remaining > 0 {
                self.session.adjust(category, 0, remaining);
            }
        }
    }
}

/// Scoped extension of one claim category.
pub struct ClaimHold<'a> {
    claim: &'a GenClaim,
    category: ClaimCategory,
    held: AtomicU32,
}

impl ClaimHold<'_> {
    /// Extend the held category by `n` more.
    pub fn add(&self, n: u32) {
        self.held.fetch_add(n, Ordering::AcqRel);
        self.claim.extend(self.category, n);
    }

    /// Amount currently held.
    pub fn held(&self) -> u32 {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for ClaimHold<'_> {
    fn drop(&mut self) {
        let held = self.held.swap(0, Ordering::AcqRel);
        self.claim.complete(self.category, held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_drop_restores_session_baseline() {
        let session = Session::new(&CancellationToken::new());
        {
            let claim = session.claim(3);
            claim.extend(ClaimCategory::LiveGens, 2);
            claim.extend(ClaimCategory::CompletedGens, 1);
            assert_eq!(session.status().waiting_gens, 3);
            assert_eq!(session.status().live_gens, 2);
        }
        assert!(session.status().is_idle());
    }

    #[test]
    fn complete_never_goes_negative() {
        let session = Session::new(&CancellationToken::new());
        let claim = session.claim(1);
        assert_eq!(claim.complete(ClaimCategory::QueuedGens, 5), 1);
        assert_eq!(claim.count(ClaimCategory::QueuedGens), 0);
        assert_eq!(session.status().waiting_gens, 0);
    }

    #[test]
    fn hold_completes_on_drop() {
        let session = Session::new(&CancellationToken::new());
        let claim = session.claim(0);
        {
            let loads = claim.hold(ClaimCategory::ModelLoads, 0);
            loads.add(1);
            loads.add(1);
            assert_eq!(session.status().loading_models, 2);
        }
        assert_eq!(session.status().loading_models, 0);
    }

    #[test]
    fn interrupt_cancels_existing_claims_only() {
        let session = Session::new(&CancellationToken::new());
        let before = session.claim(1);
        session.interrupt();
        let after = session.claim(1);
        assert!(before.should_cancel());
        assert!(!after.should_cancel());
    }

    #[tokio::test]
    async fn interrupt_wakes_waiters_and_program_cancel_reaches_new_claims() {
        let program = CancellationToken::new();
        let session = Session::new(&program);
        let claim = session.claim(1);
        let signal = claim.cancel_signal().clone();
        let waiter = tokio::spawn(async move { signal.cancelled().await });

        session.interrupt();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("interrupt did not wake the claim")
            .unwrap();
        assert!(!program.is_cancelled());

        let later = session.claim(1);
        assert!(!later.should_cancel());
        program.cancel();
        assert!(later.should_cancel());
        assert!(session.claim(1).should_cancel());
    }

    #[test]
    fn claims_share_session_counters() {
        let session = Session::new(&CancellationToken::new());
        let a = session.claim(2);
        let b = session.claim(3);
        assert_eq!(session.status().waiting_gens, 5);
        drop(a);
        assert_eq!(session.status().waiting_gens, 3);
        drop(b);
        assert!(session.status().is_idle());
    }
}
