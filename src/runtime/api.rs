//! API-facing request/response models.
//!
//! Thin adapters between JSON payloads and [`Dispatcher`] calls. Errors are
//! rendered with [`DispatchError::user_message`], so internal details stay in
//! the logs.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::core::{BackendSnapshot, DispatchError, GenerationParams, Session};
use crate::dispatch::{BatchStream, Dispatcher, SweepAxis, SweepRequest};

const fn one() -> usize {
    1
}

/// Generation submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Number of images.
    #[serde(default = "one")]
    pub images: usize,
    /// Generation parameters, inline.
    #[serde(flatten)]
    pub params: GenerationParams,
}

/// Sweep submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSubmission {
    /// Parameters shared by every point.
    #[serde(default)]
    pub base: GenerationParams,
    /// Axes to expand.
    pub axes: Vec<SweepAxis>,
    /// Output folder name.
    pub output_folder: String,
    /// Regenerate existing outputs.
    #[serde(default)]
    pub overwrite: bool,
    /// Validate only.
    #[serde(default)]
    pub dry_run: bool,
}

impl From<SweepSubmission> for SweepRequest {
    fn from(sub: SweepSubmission) -> Self {
        Self::new(sub.base, sub.axes, sub.output_folder)
            .with_overwrite(sub.overwrite)
            .with_dry_run(sub.dry_run)
    }
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Accepting work.
    pub ok: bool,
    /// Registered backends.
    pub backends: usize,
}

fn error_json(error: &DispatchError) -> Value {
    json!({ "error": error.user_message() })
}

/// Generate and wait for the whole batch.
///
/// Returns `{"images": [...]}`, or `{"error": ...}` on the first failure.
pub async fn generate_direct(dispatcher: &Arc<Dispatcher>, session: &Session, req: GenerateRequest) -> Value {
    let stream = match dispatcher.generate(session, req.images, req.params) {
        Ok(stream) => stream,
        Err(e) => return error_json(&e),
    };
    let summary = stream.into_summary().await;
    match summary.error {
        Some(e) => error_json(&e),
        None => json!({ "images": summary.images }),
    }
}

/// Render a running batch as its JSON event sequence.
pub fn event_stream(stream: BatchStream) -> impl Stream<Item = Value> {
    stream.map(|event| {
        debug!(?event, "forwarding event");
        event.to_json()
    })
}

/// `{"models": [...]}` of models loaded on any backend.
#[must_use]
pub fn list_loaded_models(dispatcher: &Dispatcher) -> Value {
    json!({ "models": dispatcher.loaded_models() })
}

/// Every registered backend and its occupancy.
#[must_use]
pub fn list_backends(dispatcher: &Dispatcher) -> Vec<BackendSnapshot> {
    dispatcher.registry().snapshot()
}

/// Load `model` everywhere; `{"success": true, "backends": n}` or `{"error": ...}`.
pub async fn select_model(dispatcher: &Dispatcher, session: &Session, model: &str) -> Value {
    match dispatcher.select_model(session, model).await {
        Ok(backends) => json!({ "success": true, "backends": backends }),
        Err(e) => error_json(&e),
    }
}

/// Liveness summary.
#[must_use]
pub fn health(dispatcher: &Dispatcher) -> Health {
    Health {
        ok: !dispatcher.registry().is_shut_down(),
        backends: dispatcher.registry().len(),
    }
}
