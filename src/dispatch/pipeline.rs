//! Allocate → generate steps shared by batch and sweep items.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::core::{
    AcquireRequest, Artifact, BackendAllocator, BackendFilter, ClaimCategory, DispatchError,
    GenClaim, GenerationParams,
};
use crate::dispatch::{DispatchEvent, EventSink};

// Never waits: these pushes happen around a held reservation.
fn push_status(claim: &GenClaim, status: Option<&EventSink>) {
    if let Some(sink) = status {
        sink.try_send(DispatchEvent::Status(claim.session().status()));
    }
}

/// Backend request derived from generation parameters.
pub(crate) fn acquire_request(params: &GenerationParams, timeout: Duration) -> AcquireRequest {
    AcquireRequest::new(params.model.clone(), timeout).with_filter(BackendFilter {
        type_tag: params.backend_type.clone(),
        backend_id: None,
    })
}

/// Run one item up to (not including) persistence.
///
/// Checkpoints on the claim's cancellation before reserving, after reserving
/// and before generating. Status snapshots are pushed without waiting, and a
/// full sink drops them. Every claim extension made here is completed before
/// returning, and the reservation is released before the outputs are handed
/// back.
pub(crate) async fn acquire_and_generate(
    allocator: &BackendAllocator,
    claim: &GenClaim,
    params: &GenerationParams,
    timeout: Duration,
    status: Option<&EventSink>,
) -> Result<Vec<Artifact>, DispatchError> {
    if claim.should_cancel() {
        return Err(DispatchError::Cancelled);
    }
    let request = acquire_request(params, timeout);
    let reservation = {
        let _waiting = claim.hold(ClaimCategory::BackendWaits, 1);
        let loads = claim.hold(ClaimCategory::ModelLoads, 0);
        push_status(claim, status);
        let on_will_load = || loads.add(1);
        allocator
            .acquire(&request, claim.cancel_signal(), &on_will_load)
            .await
    };
    push_status(claim, status);
    let reservation = reservation?;
    if claim.should_cancel() {
        return Err(DispatchError::Cancelled);
    }

    let _live = claim.hold(ClaimCategory::LiveGens, 1);
    push_status(claim, status);
    if claim.should_cancel() {
        return Err(DispatchError::Cancelled);
    }
    debug!(backend = reservation.id(), seed = params.seed, "generating");
    let outputs = reservation.generate(params).await;
    reservation.release();
    outputs
}

/// Log a failed item, stop its siblings and tell the caller.
///
/// Cancellation is a clean stop and produces no event.
pub(crate) async fn report_failure(
    claim: &GenClaim,
    sink: &EventSink,
    index: Option<usize>,
    failure: DispatchError,
) {
    match &failure {
        DispatchError::Cancelled => {
            debug!(?index, "item stopped by cancellation");
            return;
        }
        DispatchError::Internal(detail) => {
            error!(?index, detail = %detail, "internal error processing generation request");
        }
        other => warn!(?index, error = %other, "generation item failed"),
    }
    claim.cancel();
    sink.send(DispatchEvent::Error {
        index,
        error: failure,
    })
    .await;
}
