//! Error types for allocation and dispatch operations.

use thiserror::Error;

/// Message shown to callers in place of internal fault details.
pub const GENERIC_INTERNAL_MESSAGE: &str = "Something went wrong while generating images.";

/// Errors produced by the allocator, claim accounting and dispatch loops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No registered backend can ever serve the request.
    #[error("no backend is capable of serving this request")]
    NoCapableBackend,
    /// Every capable backend stayed busy past the wait budget.
    #[error("timed out waiting for a free backend")]
    Timeout,
    /// The caller (or a higher scope) cancelled the work.
    #[error("cancelled")]
    Cancelled,
    /// The backend rejected the request content.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// An artifact was produced but could not be stored.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    /// Unexpected fault; detail is for logs only.
    #[error("internal error: {0}")]
    Internal(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Text safe to surface to the caller.
    ///
    /// `Internal` details are replaced by a generic message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NoCapableBackend => {
                "Invalid operation: no backends match the request.".to_string()
            }
            Self::Timeout => "Timeout! All backends are occupied with other tasks.".to_string(),
            Self::Cancelled => "Generation was cancelled.".to_string(),
            Self::InvalidData(msg) => format!("Invalid data: {msg}"),
            Self::PersistenceFailure(_) => "Server failed to save images.".to_string(),
            Self::Internal(_) => GENERIC_INTERNAL_MESSAGE.to_string(),
            Self::InvalidConfig(msg) => format!("Invalid configuration: {msg}"),
        }
    }

    /// Whether retrying the same request can never succeed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoCapableBackend | Self::InvalidData(_) | Self::InvalidConfig(_)
        )
    }

    /// Whether the same request may succeed if retried later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Cancellation is a clean stop, not a failure to report.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Application-facing result using anyhow for bootstrap contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
