//! Fan-out dispatch of a parameter sweep.
//!
//! A main-run task walks the expanded points and spawns one item per point,
//! bounded by a concurrency cap. Items push stored references onto a
//! crossbeam queue which the caller drains, waking on "an item finished" or a
//! periodic backstop. The first failure latches a shared [`ErrorSlot`] and
//! cancels the claim, which stops new items from starting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::core::{
    CancellationToken, ClaimCategory, DispatchError, GenClaim, GenerationParams, SaveTarget,
    Session,
};
use crate::dispatch::axes::{expand_axes, SweepAxis, SweepPoint};
use crate::dispatch::pipeline::acquire_and_generate;
use crate::dispatch::{DispatchEvent, Dispatcher, EventSink};

const FORBIDDEN_FOLDER_CHARS: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];

/// A sweep over the cross product of `axes` applied to `base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRequest {
    /// Parameters shared by every point.
    pub base: GenerationParams,
    /// Axes to expand, in declaration order.
    pub axes: Vec<SweepAxis>,
    /// Folder the artifacts are stored under.
    pub output_folder: String,
    /// Regenerate points whose target already exists.
    #[serde(default)]
    pub overwrite: bool,
    /// Validate and expand only.
    #[serde(default)]
    pub dry_run: bool,
    /// Cap on concurrently running points; the dispatcher default if absent.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl SweepRequest {
    /// A sweep writing to `output_folder`, skipping existing outputs.
    #[must_use]
    pub fn new(base: GenerationParams, axes: Vec<SweepAxis>, output_folder: impl Into<String>) -> Self {
        Self {
            base,
            axes,
            output_folder: output_folder.into(),
            overwrite: false,
            dry_run: false,
            max_concurrent: None,
        }
    }

    /// Regenerate existing outputs.
    #[must_use]
    pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Stop after validation and expansion.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Override the concurrency cap.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }
}

/// Outcome of a finished sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sanitised output folder.
    pub folder: String,
    /// Points in the expansion.
    pub points: usize,
    /// Points generated and stored.
    pub generated: usize,
    /// Points skipped because their output already existed.
    pub skipped: usize,
}

/// Clean a caller-supplied output folder name.
///
/// Forbidden path characters and control characters are removed, as are
/// leading and trailing slashes.
///
/// # Errors
///
/// `InvalidData` if the cleaned name is empty or contains a dot.
pub fn sanitize_folder_name(raw: &str) -> Result<String, DispatchError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !FORBIDDEN_FOLDER_CHARS.contains(c))
        .collect();
    let cleaned = cleaned.trim().trim_matches('/').trim();
    if cleaned.contains('.') {
        return Err(DispatchError::InvalidData(
            "output folder name cannot contain dots".into(),
        ));
    }
    if cleaned.is_empty() {
        return Err(DispatchError::InvalidData(
            "output folder name cannot be empty".into(),
        ));
    }
    Ok(cleaned.to_string())
}

/// Write-once slot holding the first failure of a run and the point it hit.
#[derive(Debug, Default)]
pub struct ErrorSlot(OnceLock<(Option<usize>, DispatchError)>);

impl ErrorSlot {
    /// Empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self(OnceLock::new())
    }

    /// Store `error` for point `index` unless something is already latched.
    /// Returns whether it won.
    pub fn latch(&self, index: Option<usize>, error: DispatchError) -> bool {
        self.0.set((index, error)).is_ok()
    }

    /// The latched point index and error, if any.
    #[must_use]
    pub fn get(&self) -> Option<(Option<usize>, &DispatchError)> {
        self.0.get().map(|(index, error)| (*index, error))
    }

    /// Whether an error has been latched.
    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.0.get().is_some()
    }
}

struct SweepState {
    errors: ErrorSlot,
    produced_tx: Sender<(usize, String)>,
    produced_rx: Receiver<(usize, String)>,
    active: AtomicUsize,
    item_done: Notify,
    generated: AtomicUsize,
    skipped: AtomicUsize,
    folder: String,
    format: String,
    overwrite: bool,
    max_concurrent: usize,
}

impl SweepState {
    fn new(folder: String, format: String, overwrite: bool, max_concurrent: usize) -> Self {
        let (produced_tx, produced_rx) = crossbeam_channel::unbounded();
        Self {
            errors: ErrorSlot::new(),
            produced_tx,
            produced_rx,
            active: AtomicUsize::new(0),
            item_done: Notify::new(),
            generated: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            folder,
            format,
            overwrite,
            max_concurrent,
        }
    }

    fn target(&self, point: &SweepPoint) -> SaveTarget {
        SaveTarget {
            scope: self.folder.clone(),
            name: point.path.clone(),
            format: self.format.clone(),
        }
    }

    fn fail(&self, claim: &GenClaim, index: Option<usize>, error: DispatchError) {
        if self.errors.latch(index, error.clone()) {
            warn!(?index, error = %error, "sweep failed, stopping remaining points");
        } else {
            debug!(?index, error = %error, "additional sweep failure ignored");
        }
        claim.cancel();
    }

    async fn forward(&self, sink: &EventSink) {
        let ready: Vec<_> = self.produced_rx.try_iter().collect();
        for (index, reference) in ready {
            sink.send(DispatchEvent::Image { index, reference }).await;
        }
    }

    fn report(&self, points: usize) -> SweepReport {
        SweepReport {
            folder: self.folder.clone(),
            points,
            generated: self.generated.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
        }
    }
}

/// A failed sweep: the error and, for point failures, the point's index.
struct SweepFailure {
    index: Option<usize>,
    error: DispatchError,
}

impl From<DispatchError> for SweepFailure {
    fn from(error: DispatchError) -> Self {
        Self { index: None, error }
    }
}

/// Marks one item as running until dropped.
struct ActiveGuard(Arc<SweepState>);

impl ActiveGuard {
    fn enter(state: &Arc<SweepState>) -> Self {
        state.active.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(state))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
        self.0.item_done.notify_waiters();
    }
}

impl Dispatcher {
    /// Run a sweep, streaming stored references to `sink`.
    ///
    /// Ends with [`DispatchEvent::Complete`] on success. Any other failure is
    /// also sent as an [`DispatchEvent::Error`] before being returned, carrying
    /// the failed point's index when one point caused it. An abort returns
    /// `Cancelled` once running points have stopped.
    ///
    /// # Errors
    ///
    /// The first point failure, a validation error, or `Cancelled`.
    pub async fn run_sweep(
        self: &Arc<Self>,
        session: &Session,
        request: SweepRequest,
        sink: &EventSink,
        abort: &CancellationToken,
    ) -> Result<SweepReport, DispatchError> {
        match self.sweep(session, request, sink, abort).await {
            Ok(report) => Ok(report),
            Err(SweepFailure { index, error }) => {
                if !error.is_cancellation() {
                    sink.send(DispatchEvent::Error {
                        index,
                        error: error.clone(),
                    })
                    .await;
                }
                Err(error)
            }
        }
    }

    async fn sweep(
        self: &Arc<Self>,
        session: &Session,
        request: SweepRequest,
        sink: &EventSink,
        abort: &CancellationToken,
    ) -> Result<SweepReport, SweepFailure> {
        let folder = sanitize_folder_name(&request.output_folder)?;
        let mut base = request.base;
        base.resolve_seeds();
        let mut points = expand_axes(&base, &request.axes, self.config().max_sweep_points)?;
        for point in &mut points {
            self.check_model(point.params.model.as_deref())?;
            point.params.resolve_seeds();
        }
        let total = points.len();
        let max_concurrent = request
            .max_concurrent
            .unwrap_or(self.config().max_concurrent)
            .max(1);
        let state = Arc::new(SweepState::new(
            folder,
            self.config().output_format.clone(),
            request.overwrite,
            max_concurrent,
        ));
        if request.dry_run {
            info!(folder = %state.folder, points = total, "sweep dry run");
            return Ok(state.report(total));
        }

        let queued = u32::try_from(total)
            .map_err(|_| DispatchError::InvalidData("sweep has too many points".into()))?;
        let claim = session.claim(queued);
        info!(folder = %state.folder, points = total, max_concurrent, "sweep started");
        let main = tokio::spawn(Arc::clone(self).sweep_main(
            points,
            Arc::clone(&claim),
            Arc::clone(&state),
        ));

        let backstop = self.config().drain_backstop();
        loop {
            let done = state.item_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();

            state.forward(sink).await;
            if main.is_finished() && state.active.load(Ordering::Acquire) == 0 {
                break;
            }
            tokio::select! {
                () = &mut done => {}
                () = tokio::time::sleep(backstop) => {}
                () = abort.cancelled() => {
                    info!(folder = %state.folder, "sweep aborted");
                    claim.cancel();
                    if let Err(join_error) = main.await {
                        warn!(error = %join_error, "sweep main run failed during abort");
                    }
                    return Err(DispatchError::Cancelled.into());
                }
            }
        }

        main.await.map_err(|e| DispatchError::Internal(e.to_string()))?;
        if let Some((index, error)) = state.errors.get() {
            return Err(SweepFailure {
                index,
                error: error.clone(),
            });
        }
        state.forward(sink).await;
        if claim.should_cancel() {
            return Err(DispatchError::Cancelled.into());
        }
        let report = state.report(total);
        info!(
            folder = %report.folder,
            generated = report.generated,
            skipped = report.skipped,
            "sweep complete"
        );
        sink.send(DispatchEvent::Complete).await;
        Ok(report)
    }

    async fn sweep_main(
        self: Arc<Self>,
        points: Vec<SweepPoint>,
        claim: Arc<GenClaim>,
        state: Arc<SweepState>,
    ) {
        let mut items = JoinSet::new();
        for point in points {
            while items.len() >= state.max_concurrent {
                if let Some(joined) = items.join_next().await {
                    handle_join(joined, &claim, &state);
                }
            }
            if state.errors.is_latched() || claim.should_cancel() {
                break;
            }
            if !state.overwrite && self.store().exists(&state.target(&point)).await {
                debug!(path = %point.path, "output exists, skipping point");
                state.skipped.fetch_add(1, Ordering::AcqRel);
                claim.complete(ClaimCategory::QueuedGens, 1);
                continue;
            }
            let active = ActiveGuard::enter(&state);
            items.spawn(Arc::clone(&self).sweep_item(
                point,
                Arc::clone(&claim),
                Arc::clone(&state),
                active,
            ));
        }
        while let Some(joined) = items.join_next().await {
            handle_join(joined, &claim, &state);
        }
        state.item_done.notify_waiters();
    }

    async fn sweep_item(
        self: Arc<Self>,
        point: SweepPoint,
        claim: Arc<GenClaim>,
        state: Arc<SweepState>,
        _active: ActiveGuard,
    ) {
        let result = self.sweep_point(&point, &claim, &state).await;
        claim.complete(ClaimCategory::QueuedGens, 1);
        match result {
            Ok(Some(reference)) => {
                state.generated.fetch_add(1, Ordering::AcqRel);
                claim.extend(ClaimCategory::CompletedGens, 1);
                // The receiver lives in `state`, which we hold.
                let _ = state.produced_tx.send((point.index, reference));
            }
            Ok(None) => {}
            Err(DispatchError::Cancelled) => {
                debug!(index = point.index, "sweep point stopped by cancellation");
            }
            Err(error) => state.fail(&claim, Some(point.index), error),
        }
    }

    async fn sweep_point(
        &self,
        point: &SweepPoint,
        claim: &GenClaim,
        state: &SweepState,
    ) -> Result<Option<String>, DispatchError> {
        let outputs = acquire_and_generate(
            self.allocator(),
            claim,
            &point.params,
            self.config().sweep_backend_timeout(),
            None,
        )
        .await?;
        let [artifact] = outputs.as_slice() else {
            return Err(DispatchError::InvalidData(format!(
                "server generated {} images when only expecting 1",
                outputs.len()
            )));
        };
        if state.errors.is_latched() || claim.should_cancel() {
            debug!(index = point.index, "discarding output of a stopped sweep");
            return Ok(None);
        }
        let reference = self.store().save(artifact, &state.target(point)).await?;
        debug!(index = point.index, reference = %reference, "sweep point stored");
        Ok(Some(reference))
    }
}

fn handle_join(joined: Result<(), JoinError>, claim: &GenClaim, state: &SweepState) {
    if let Err(join_error) = joined {
        state.fail(claim, None, DispatchError::Internal(join_error.to_string()));
    }
}
