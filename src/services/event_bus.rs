//! Process-local event bus.
//!
//! Multi-producer broadcast plane for domain events. `publish` stamps a
//! monotone sequence number and returns as soon as the event is enqueued on
//! the underlying broadcast channel; the gateway's broadcast worker drains a
//! subscription and fans out to sessions. Emitters never block on slow
//! consumers.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::models::{DomainEvent, EventPayload};

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the broadcast channel. Subscribers that fall further
    /// behind than this observe a `Lagged` error and miss events.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// The process-wide publish/subscribe plane for domain events.
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Stamp and publish an event. Send errors (no subscribers) are ignored.
    pub fn publish(&self, payload: EventPayload) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut event = DomainEvent::new(payload);
        event.sequence = sequence;
        trace!(sequence, event = event.payload.event_type(), "publish");
        let _ = self.sender.send(event);
        sequence
    }

    /// Subscribe to all events from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// The sequence number of the most recently published event.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(EventPayload::GoalCompleted { goal_id: Uuid::new_v4() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload.event_type(), "goal.completed");
        assert_eq!(event.sequence, 1);
    }

    #[tokio::test]
    async fn test_sequence_is_monotone() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            bus.publish(EventPayload::SessionLagged { dropped: 0 });
        }

        let mut last = 0;
        for _ in 0..5 {
            let event = rx.recv().await.unwrap();
            assert!(event.sequence > last);
            last = event.sequence;
        }
        assert_eq!(bus.current_sequence(), 5);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_error() {
        let bus = EventBus::default();
        let seq = bus.publish(EventPayload::SessionLagged { dropped: 2 });
        assert_eq!(seq, 1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
