use super::types::LifecycleEvent;
use crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast publisher for lifecycle notifications
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Notification as delivered to subscribers
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub event: LifecycleEvent,
    pub published_at: DateTime<Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        let published = PublishedEvent {
            name: event.name(),
            event,
            published_at: Utc::now(),
        };

        // send() only fails when there are no subscribers, which is fine
        if self.sender.send(published).is_err() {
            trace!("Lifecycle event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}
