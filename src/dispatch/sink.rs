//! Live progress events and the best-effort sink that carries them.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::{debug, warn};

use crate::core::{DispatchError, StatusSnapshot};

/// One notification pushed to a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Re-rendered session counters.
    Status(StatusSnapshot),
    /// An artifact was stored.
    Image {
        /// Batch index or sweep point index the artifact belongs to.
        index: usize,
        /// Reference returned by the store.
        reference: String,
    },
    /// An item (or the whole run) failed.
    Error {
        /// Item that failed, if attributable.
        index: Option<usize>,
        /// The failure.
        error: DispatchError,
    },
    /// A sweep finished successfully.
    Complete,
}

impl DispatchEvent {
    /// Wire shape: `{"status":..}`, `{"image":..}`, `{"error":..}` or `{"success":"complete"}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Status(status) => json!({ "status": status }),
            Self::Image { index, reference } => json!({ "image": reference, "index": index }),
            Self::Error { error, .. } => json!({ "error": error.user_message() }),
            Self::Complete => json!({ "success": "complete" }),
        }
    }
}

/// Bounded event channel with a per-send timeout.
///
/// A send that times out is logged and dropped; a closed receiver is ignored.
/// [`EventSink::try_send`] never waits and is used for status snapshots pushed
/// while a backend is reserved.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<DispatchEvent>,
    send_timeout: Duration,
}

impl EventSink {
    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn channel(buffer: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, send_timeout }, rx)
    }

    /// Push one event, waiting at most the send timeout.
    pub async fn send(&self, event: DispatchEvent) {
        match self.tx.send_timeout(event, self.send_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                warn!(timeout = ?self.send_timeout, ?event, "progress send timed out, dropping event");
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("progress receiver closed");
            }
        }
    }

    /// Push one event only if the buffer has room right now.
    ///
    /// Returns whether the event was queued.
    pub fn try_send(&self, event: DispatchEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!(?event, "progress buffer full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the receiving side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_timeout_is_not_fatal() {
        let (sink, mut rx) = EventSink::channel(1, Duration::from_millis(20));
        sink.send(DispatchEvent::Complete).await;
        // Buffer full: this one times out and is dropped.
        sink.send(DispatchEvent::Complete).await;
        assert_eq!(rx.recv().await, Some(DispatchEvent::Complete));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn try_send_drops_when_full_without_waiting() {
        let (sink, mut rx) = EventSink::channel(1, Duration::from_secs(60));
        assert!(sink.try_send(DispatchEvent::Complete));
        let full = tokio::time::timeout(Duration::from_millis(50), async {
            sink.try_send(DispatchEvent::Complete)
        })
        .await;
        assert_eq!(full, Ok(false));
        assert_eq!(rx.recv().await, Some(DispatchEvent::Complete));
        assert!(rx.try_recv().is_err());
        drop(rx);
        assert!(!sink.try_send(DispatchEvent::Complete));
    }

    #[test]
    fn events_render_to_wire_shape() {
        let image = DispatchEvent::Image {
            index: 2,
            reference: "/out/a.png".into(),
        };
        assert_eq!(image.to_json()["image"], "/out/a.png");
        let error = DispatchEvent::Error {
            index: None,
            error: DispatchError::Internal("stack trace".into()),
        };
        assert_eq!(
            error.to_json()["error"],
            crate::core::GENERIC_INTERNAL_MESSAGE
        );
        assert_eq!(DispatchEvent::Complete.to_json()["success"], "complete");
    }
}
