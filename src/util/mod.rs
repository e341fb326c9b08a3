//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use clock::now_ms;
pub use telemetry::{init_tracing, DEFAULT_FILTER};
