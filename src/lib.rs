//! # gen_dispatch
//!
//! Backend allocation and bounded concurrent dispatch for image generation.
//!
//! A pool of heterogeneous generation backends sits behind a
//! [`core::BackendRegistry`]. Requests reserve exactly one backend through the
//! [`core::BackendAllocator`], waiting when every capable backend is busy and
//! loading the requested model when needed. Each request runs under a
//! [`core::GenClaim`] that keeps its session's status counters honest and
//! carries a hierarchical cancel signal.
//!
//! ## Key Features
//!
//! - **Exclusive reservation**: a backend serves one request at a time and is
//!   always returned, on success, failure or cancellation
//! - **Bounded batches**: `n` generations with at most `K` in flight, streaming
//!   each stored image as it lands
//! - **Parameter sweeps**: a cross product of axes fanned out over the pool,
//!   stopping on the first failure
//! - **Session accounting**: waiting, loading, live and completed counters per
//!   session, published on a `watch` channel
//! - **Cancellation tree**: program → session → claim, checked cooperatively
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use gen_dispatch::builders::DispatcherBuilder;
//! use gen_dispatch::core::{BackendInfo, GenerationParams};
//!
//! let dispatcher = DispatcherBuilder::new()
//!     .with_backend(BackendInfo::new("comfy").with_models(["sdxl"]), backend)
//!     .build()?;
//! let session = dispatcher.open_session();
//! let params = GenerationParams { prompt: "a lighthouse".into(), ..Default::default() };
//! let summary = dispatcher.generate(&session, 4, params)?.into_summary().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Allocation, cancellation and claim accounting.
pub mod core;
/// Configuration models for timeouts, concurrency and buffers.
pub mod config;
/// Builders to construct a dispatcher from configuration.
pub mod builders;
/// Batch and sweep dispatch.
pub mod dispatch;
/// Infrastructure adapters for artifact storage and model lookup.
pub mod infra;
/// JSON-facing API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
