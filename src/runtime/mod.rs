//! JSON-facing API surface over the dispatcher.

pub mod api;

pub use api::{
    event_stream, generate_direct, health, list_backends, list_loaded_models, select_model,
    GenerateRequest, Health, SweepSubmission,
};
