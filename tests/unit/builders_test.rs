//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use gen_dispatch::builders::DispatcherBuilder;
use gen_dispatch::config::DispatchConfig;
use gen_dispatch::core::{Artifact, BackendInfo, DispatchError, GenerationBackend, GenerationParams};

struct Idle;

#[async_trait]
impl GenerationBackend for Idle {
    async fn load_model(&self, _model: &str) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn generate(&self, _params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError> {
        Ok(Vec::new())
    }
}

#[test]
fn test_builder_defaults() {
    let builder = DispatcherBuilder::new();
    assert_eq!(builder.config(), &DispatchConfig::default());
    assert_eq!(builder.backend_count(), 0);
}

#[test]
fn test_builder_registers_backends_and_models() {
    let dispatcher = DispatcherBuilder::new()
        .with_backend(BackendInfo::new("comfy").with_models(["sdxl"]), Arc::new(Idle))
        .with_backend(BackendInfo::new("comfy").with_loaded("flux"), Arc::new(Idle))
        .build()
        .unwrap();
    assert_eq!(dispatcher.registry().len(), 2);
    assert!(dispatcher.catalog().resolve("sdxl").is_some());
    assert!(dispatcher.catalog().resolve("flux").is_some());
    assert!(dispatcher.catalog().resolve("other").is_none());
    assert!(dispatcher.loaded_models().contains("flux"));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let result = DispatcherBuilder::new()
        .with_config(DispatchConfig {
            event_buffer: 0,
            ..DispatchConfig::default()
        })
        .build();
    assert!(matches!(result, Err(DispatchError::InvalidConfig(_))));
}
