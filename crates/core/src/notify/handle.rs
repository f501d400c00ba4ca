use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::Notification;

/// Envelope wrapping a notification with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub timestamp: DateTime<Utc>,
    pub notification: Notification,
}

/// Receiver of terminal-transition notifications.
///
/// Called by the orchestrator outside of its state lock. Implementations must
/// not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that forwards notifications into a bounded channel
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NotificationEnvelope>,
}

impl ChannelSink {
    /// Create a new sink from a channel sender
    pub fn new(tx: mpsc::Sender<NotificationEnvelope>) -> Self {
        Self { tx }
    }

    /// Try to send a notification without blocking
    ///
    /// Returns true if the notification was sent, false if it was dropped.
    pub fn try_emit(&self, notification: Notification) -> bool {
        let envelope = NotificationEnvelope {
            timestamp: Utc::now(),
            notification,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    subject = envelope.notification.subject_id(),
                    kind = envelope.notification.notification_type(),
                    "Notification channel full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                tracing::debug!(
                    subject = envelope.notification.subject_id(),
                    "Notification channel closed, dropping notification"
                );
                false
            }
        }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        self.try_emit(notification);
    }
}

/// Create a bounded notification channel and its sink.
pub fn create_notification_channel(
    buffer: usize,
) -> (ChannelSink, mpsc::Receiver<NotificationEnvelope>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelSink::new(tx), rx)
}
