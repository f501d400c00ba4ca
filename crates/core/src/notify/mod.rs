//! Terminal-transition notifications.
//!
//! The orchestrator reports every job and batch that reaches a final state
//! through a [`NotificationSink`]. Delivery is at-most-once: a full or closed
//! channel drops the notification and logs it.

mod events;
mod handle;

pub use events::Notification;
pub use handle::{create_notification_channel, ChannelSink, NotificationEnvelope, NotificationSink};
