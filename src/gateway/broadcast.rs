//! Event broadcast fan-out.
//!
//! One worker drains the bus subscription and fans each event out to every
//! authenticated session whose filter matches. Per-session ordering follows
//! bus emission order because a single worker pushes into each session's
//! outbound queue; slow sessions lose oldest events in their own queue, not
//! here.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::models::DomainEvent;
use crate::gateway::connection::ConnectionManager;
use crate::gateway::wire::Frame;
use crate::services::event_bus::EventBus;

/// Translates bus events into outbound `event` frames.
pub struct BroadcastManager {
    connections: Arc<ConnectionManager>,
    event_bus: Arc<EventBus>,
}

impl BroadcastManager {
    pub fn new(connections: Arc<ConnectionManager>, event_bus: Arc<EventBus>) -> Self {
        Self {
            connections,
            event_bus,
        }
    }

    /// Spawn the broadcast worker. It runs until the bus is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut rx = self.event_bus.subscribe();
            loop {
                match rx.recv().await {
                    Ok(event) => self.fan_out(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "broadcast worker lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("broadcast worker stopped");
        })
    }

    async fn fan_out(&self, event: &DomainEvent) {
        let event_type = event.payload.event_type();
        let goal_id = event.payload.goal_id();
        let frame_json = wire_frame(event).to_json();

        for handle in self.connections.authenticated_handles().await {
            let Some(session) = handle.session().await else {
                continue;
            };
            let Some(subscription) = &session.subscription else {
                continue;
            };
            if subscription.matches(event_type, goal_id) {
                handle.outbound.push_event(frame_json.clone());
            }
        }
    }
}

/// Build the outbound `event` frame for a bus event. The envelope's sequence
/// and timestamp ride inside `data` next to the payload fields.
pub fn wire_frame(event: &DomainEvent) -> Frame {
    let payload_value = serde_json::to_value(&event.payload).unwrap_or_default();
    let mut data = payload_value
        .get("data")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    if let Some(map) = data.as_object_mut() {
        map.insert("sequence".to_string(), serde_json::json!(event.sequence));
        map.insert(
            "timestamp".to_string(),
            serde_json::json!(event.timestamp.to_rfc3339()),
        );
    }
    Frame::event(event.payload.event_type(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EventPayload;
    use uuid::Uuid;

    #[test]
    fn test_wire_frame_shape() {
        let goal_id = Uuid::new_v4();
        let mut event = DomainEvent::new(EventPayload::GoalCompleted { goal_id });
        event.sequence = 9;
        let frame = wire_frame(&event);
        match frame {
            Frame::Event { event, data } => {
                assert_eq!(event, "goal.completed");
                assert_eq!(data["goal_id"], serde_json::json!(goal_id));
                assert_eq!(data["sequence"], 9);
                assert!(data["timestamp"].is_string());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
