//! Bounded concurrent dispatch of a flat batch of generations.
//!
//! A driver task keeps at most `max_concurrent` items in a `JoinSet`, spawning
//! item `i` with seed `base + i` once a slot is free. Items report through the
//! batch's [`EventSink`]; the driver joins every item before it lets go of the
//! claim, so the claim is released exactly when the last item is done.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::{
    CancellationToken, ClaimCategory, DispatchError, GenClaim, GenerationParams, SaveTarget,
};
use crate::dispatch::pipeline::{acquire_and_generate, report_failure};
use crate::dispatch::{DispatchEvent, Dispatcher, EventSink};

/// One batch of `count` generations derived from common parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    /// Number of items.
    pub count: usize,
    /// Base parameters; item `i` uses `seed + i`.
    pub params: GenerationParams,
    /// Cap on concurrently running items.
    pub max_concurrent: usize,
    /// Artifacts each item must produce.
    pub outputs_per_item: usize,
    /// Push a status snapshot at every item transition.
    pub live_status: bool,
}

impl BatchRequest {
    /// A batch with one output per item and no live status.
    #[must_use]
    pub const fn new(count: usize, params: GenerationParams, max_concurrent: usize) -> Self {
        Self {
            count,
            params,
            max_concurrent,
            outputs_per_item: 1,
            live_status: false,
        }
    }

    /// Expect `n` artifacts from each item.
    #[must_use]
    pub const fn with_outputs_per_item(mut self, n: usize) -> Self {
        self.outputs_per_item = n;
        self
    }

    /// Enable or disable status pushes.
    #[must_use]
    pub const fn with_live_status(mut self, live: bool) -> Self {
        self.live_status = live;
        self
    }
}

/// Images produced by a batch up to its first error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// References of stored images, in arrival order.
    pub images: Vec<String>,
    /// First error reported, if any.
    pub error: Option<DispatchError>,
}

/// Lazy, finite sequence of events from one batch.
///
/// Dropping the stream abandons the batch: items not yet started are skipped
/// and running ones finish on their own.
pub struct BatchStream {
    rx: mpsc::Receiver<DispatchEvent>,
    driver: JoinHandle<()>,
    abandon: CancellationToken,
}

impl BatchStream {
    /// Next event, or `None` once every item has finished.
    pub async fn next_event(&mut self) -> Option<DispatchEvent> {
        self.rx.recv().await
    }

    /// Collect images until the first error or the end of the batch.
    pub async fn into_summary(mut self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        while let Some(event) = self.rx.recv().await {
            match event {
                DispatchEvent::Image { reference, .. } => summary.images.push(reference),
                DispatchEvent::Error { error, .. } => {
                    summary.error = Some(error);
                    break;
                }
                DispatchEvent::Status(_) | DispatchEvent::Complete => {}
            }
        }
        summary
    }

    /// Whether the driver has joined all items.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }
}

impl Stream for BatchStream {
    type Item = DispatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if !self.driver.is_finished() {
            self.abandon.cancel();
        }
    }
}

struct BatchRun {
    id: Uuid,
    request: BatchRequest,
    sink: EventSink,
}

impl Dispatcher {
    /// Drive `request` under `claim`, streaming per-item results.
    ///
    /// Must be called within a Tokio runtime. The batch never fails as a
    /// whole; item failures arrive as [`DispatchEvent::Error`].
    pub fn run_batch(self: &Arc<Self>, claim: Arc<GenClaim>, request: BatchRequest) -> BatchStream {
        let (sink, rx) = EventSink::channel(self.config().event_buffer, self.config().send_timeout());
        let abandon = claim.cancel_signal().clone();
        let run = Arc::new(BatchRun {
            id: Uuid::new_v4(),
            request,
            sink,
        });
        let driver = tokio::spawn(Arc::clone(self).drive_batch(claim, run));
        BatchStream {
            rx,
            driver,
            abandon,
        }
    }

    async fn drive_batch(self: Arc<Self>, claim: Arc<GenClaim>, run: Arc<BatchRun>) {
        let max_concurrent = run.request.max_concurrent.max(1);
        info!(batch = %run.id, count = run.request.count, max_concurrent, "batch started");
        let mut items = JoinSet::new();
        for index in 0..run.request.count {
            if claim.should_cancel() {
                break;
            }
            while items.len() >= max_concurrent {
                if let Some(joined) = items.join_next().await {
                    handle_join(joined, &claim, &run.sink).await;
                }
            }
            if claim.should_cancel() {
                break;
            }
            let params = run.request.params.for_batch_index(index);
            items.spawn(Arc::clone(&self).run_batch_item(
                index,
                params,
                Arc::clone(&claim),
                Arc::clone(&run),
            ));
        }
        while let Some(joined) = items.join_next().await {
            handle_join(joined, &claim, &run.sink).await;
        }
        info!(batch = %run.id, cancelled = claim.should_cancel(), "batch finished");
        // Release the claim before the sink closes the stream.
        drop(claim);
        drop(run);
    }

    async fn run_batch_item(
        self: Arc<Self>,
        index: usize,
        params: GenerationParams,
        claim: Arc<GenClaim>,
        run: Arc<BatchRun>,
    ) {
        let result = self.batch_item(index, &params, &claim, &run).await;
        claim.complete(ClaimCategory::QueuedGens, 1);
        match result {
            Ok(()) => claim.extend(ClaimCategory::CompletedGens, 1),
            Err(failure) => report_failure(&claim, &run.sink, Some(index), failure).await,
        }
        if run.request.live_status {
            run.sink
                .send(DispatchEvent::Status(claim.session().status()))
                .await;
        }
    }

    async fn batch_item(
        &self,
        index: usize,
        params: &GenerationParams,
        claim: &GenClaim,
        run: &BatchRun,
    ) -> Result<(), DispatchError> {
        let status = run.request.live_status.then_some(&run.sink);
        let outputs = acquire_and_generate(
            self.allocator(),
            claim,
            params,
            self.config().backend_timeout(),
            status,
        )
        .await?;
        if outputs.len() != run.request.outputs_per_item {
            return Err(DispatchError::InvalidData(format!(
                "backend generated {} images when expecting {}",
                outputs.len(),
                run.request.outputs_per_item
            )));
        }
        for (n, artifact) in outputs.iter().enumerate() {
            let target = SaveTarget {
                scope: claim.session().id().to_string(),
                name: format!("{}-{index}-{n}", run.id.simple()),
                format: self.config().output_format.clone(),
            };
            let reference = self.store().save(artifact, &target).await?;
            debug!(batch = %run.id, index, reference = %reference, "image stored");
            run.sink
                .send(DispatchEvent::Image { index, reference })
                .await;
        }
        Ok(())
    }
}

async fn handle_join(joined: Result<(), JoinError>, claim: &GenClaim, sink: &EventSink) {
    if let Err(join_error) = joined {
        report_failure(
            claim,
            sink,
            None,
            DispatchError::Internal(join_error.to_string()),
        )
        .await;
    }
}
