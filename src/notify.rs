use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Ms;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Approved,
    Rejected,
    Returned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityRef {
    Reservation { id: Ulid, facility_id: Ulid },
    Rental { id: Ulid, item_id: Ulid },
}

/// Outcome of an administrator transition, addressed to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub entity: EntityRef,
    pub requester_id: String,
    pub reason: Option<String>,
    pub at: Ms,
}

/// Receives domain events after they are committed. Fire-and-forget:
/// implementations must not block and cannot fail the transition.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// In-process fan-out over a broadcast channel.
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationSink for NotifyHub {
    fn publish(&self, notification: Notification) {
        // Err only means nobody is listening.
        let _ = self.sender.send(notification);
    }
}

/// Log every notification until the hub is dropped.
pub async fn run_logger(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(n) => match serde_json::to_string(&n) {
                Ok(json) => tracing::info!(target: "allocd::notify", "{json}"),
                Err(e) => tracing::warn!("unencodable notification: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("notification logger lagged, skipped {skipped}");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
