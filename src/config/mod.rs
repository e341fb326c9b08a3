//! Configuration models for timeouts, concurrency and buffers.

pub mod dispatch;

pub use dispatch::{DispatchConfig, ENV_PREFIX};
