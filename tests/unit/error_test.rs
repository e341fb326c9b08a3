//! Tests for error types

use gen_dispatch::core::{DispatchError, GENERIC_INTERNAL_MESSAGE};

#[test]
fn test_timeout_error() {
    let err = DispatchError::Timeout;
    assert_eq!(format!("{err}"), "timed out waiting for a free backend");
    assert_eq!(
        err.user_message(),
        "Timeout! All backends are occupied with other tasks."
    );
    assert!(err.is_retryable());
    assert!(!err.is_terminal());
}

#[test]
fn test_internal_error_is_masked() {
    let err = DispatchError::Internal("thread panicked at src/main.rs".to_string());
    assert!(format!("{err}").contains("panicked"));
    assert_eq!(err.user_message(), GENERIC_INTERNAL_MESSAGE);
}

#[test]
fn test_invalid_data_keeps_message() {
    let err = DispatchError::InvalidData("model not found: sdxl".to_string());
    assert_eq!(err.user_message(), "Invalid data: model not found: sdxl");
    assert!(err.is_terminal());
}

#[test]
fn test_cancellation() {
    assert!(DispatchError::Cancelled.is_cancellation());
    assert!(!DispatchError::NoCapableBackend.is_cancellation());
    assert!(DispatchError::NoCapableBackend.is_terminal());
}
