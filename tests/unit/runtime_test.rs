//! Tests for the JSON API surface

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use gen_dispatch::builders::DispatcherBuilder;
use gen_dispatch::core::{Artifact, BackendInfo, DispatchError, GenerationBackend, GenerationParams};
use gen_dispatch::runtime::{
    event_stream, generate_direct, health, list_backends, list_loaded_models, select_model,
    GenerateRequest, SweepSubmission,
};
use gen_dispatch::dispatch::SweepRequest;

struct Echo;

#[async_trait]
impl GenerationBackend for Echo {
    async fn load_model(&self, _model: &str) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn generate(&self, params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError> {
        Ok(vec![Artifact::new(params.prompt.clone().into_bytes(), "png")])
    }
}

#[test]
fn test_generate_request_parses_inline_params() {
    let req: GenerateRequest =
        serde_json::from_str(r#"{"images": 3, "prompt": "a fox", "steps": 30}"#).unwrap();
    assert_eq!(req.images, 3);
    assert_eq!(req.params.prompt, "a fox");
    assert_eq!(req.params.steps, 30);

    let req: GenerateRequest = serde_json::from_str(r#"{"prompt": "a fox"}"#).unwrap();
    assert_eq!(req.images, 1);
}

#[test]
fn test_sweep_submission_converts() {
    let sub: SweepSubmission = serde_json::from_str(
        r#"{"axes": [{"param": "steps", "values": ["10", "20"]}], "output_folder": "grid", "dry_run": true}"#,
    )
    .unwrap();
    let request = SweepRequest::from(sub);
    assert!(request.dry_run);
    assert!(!request.overwrite);
    assert_eq!(request.axes.len(), 1);
}

#[tokio::test]
async fn test_generate_direct_returns_images() {
    let dispatcher = DispatcherBuilder::new()
        .with_backend(BackendInfo::new("echo"), Arc::new(Echo))
        .build()
        .unwrap();
    let session = dispatcher.open_session();
    let req: GenerateRequest = serde_json::from_str(r#"{"images": 2, "prompt": "a fox", "seed": 1}"#).unwrap();

    let out = generate_direct(&dispatcher, &session, req).await;
    assert_eq!(out["images"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_generate_direct_reports_errors() {
    let dispatcher = DispatcherBuilder::new()
        .with_backend(BackendInfo::new("echo").with_models(["sdxl"]), Arc::new(Echo))
        .build()
        .unwrap();
    let session = dispatcher.open_session();
    let req: GenerateRequest = serde_json::from_str(r#"{"model": "missing"}"#).unwrap();

    let out = generate_direct(&dispatcher, &session, req).await;
    assert!(out["error"].as_str().unwrap().starts_with("Invalid data"));
}

#[tokio::test]
async fn test_event_stream_renders_json() {
    let dispatcher = DispatcherBuilder::new()
        .with_backend(BackendInfo::new("echo"), Arc::new(Echo))
        .build()
        .unwrap();
    let session = dispatcher.open_session();
    let stream = dispatcher
        .generate(&session, 1, GenerationParams::default())
        .unwrap();

    let events: Vec<_> = event_stream(stream).collect().await;
    assert_eq!(events.len(), 1);
    assert!(events[0]["image"].is_string());
}

#[tokio::test]
async fn test_select_model_and_listing() {
    let dispatcher = DispatcherBuilder::new()
        .with_backend(BackendInfo::new("echo").with_models(["sdxl"]), Arc::new(Echo))
        .build()
        .unwrap();
    let session = dispatcher.open_session();

    let out = select_model(&dispatcher, &session, "sdxl").await;
    assert_eq!(out["success"], true);
    assert_eq!(out["backends"], 1);
    assert_eq!(list_loaded_models(&dispatcher)["models"][0], "sdxl");
    assert_eq!(list_backends(&dispatcher).len(), 1);

    let out = select_model(&dispatcher, &session, "missing").await;
    assert!(out["error"].is_string());

    assert!(health(&dispatcher).ok);
    dispatcher.shutdown();
    assert!(!health(&dispatcher).ok);
}
