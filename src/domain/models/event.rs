//! Domain event vocabulary.
//!
//! Every observable state change is published on the event bus as a
//! [`DomainEvent`] envelope wrapping one [`EventPayload`] variant. The
//! variant set is closed: gateway clients subscribe by dotted type prefix
//! (`goal.`, `run.completed`, ...), so variant names here are the wire
//! vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::Approval;
use super::escalation::Escalation;
use super::goal::{Goal, GoalStatus};
use super::run::RunStatus;
use super::work_item::{WorkItem, WorkItemStatus};

/// Payload of one domain event, tagged with its dotted wire name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum EventPayload {
    #[serde(rename = "goal.created")]
    GoalCreated { goal: Goal },
    #[serde(rename = "goal.updated")]
    GoalUpdated { goal_id: Uuid, status: GoalStatus },
    #[serde(rename = "goal.completed")]
    GoalCompleted { goal_id: Uuid },
    #[serde(rename = "goal.cancelled")]
    GoalCancelled { goal_id: Uuid },
    #[serde(rename = "goal.blocked")]
    GoalBlocked { goal_id: Uuid, reason: String },

    #[serde(rename = "workitem.created")]
    WorkItemCreated { work_item: WorkItem },
    #[serde(rename = "workitem.updated")]
    WorkItemUpdated {
        work_item_id: Uuid,
        goal_id: Uuid,
        status: WorkItemStatus,
    },
    #[serde(rename = "workitem.completed")]
    WorkItemCompleted { work_item_id: Uuid, goal_id: Uuid },
    #[serde(rename = "workitem.failed")]
    WorkItemFailed {
        work_item_id: Uuid,
        goal_id: Uuid,
        error: String,
    },

    #[serde(rename = "run.started")]
    RunStarted {
        run_id: Uuid,
        work_item_id: Uuid,
        goal_id: Uuid,
        run_sequence: u32,
        lane: String,
        model: String,
    },
    #[serde(rename = "run.completed")]
    RunCompleted {
        run_id: Uuid,
        work_item_id: Uuid,
        goal_id: Uuid,
        status: RunStatus,
        tokens_used: u64,
        cost_usd: f64,
    },

    #[serde(rename = "escalation.created")]
    EscalationCreated { escalation: Escalation },
    #[serde(rename = "escalation.resolved")]
    EscalationResolved { escalation_id: Uuid, goal_id: Uuid },

    #[serde(rename = "approval.requested")]
    ApprovalRequested { approval: Approval },
    #[serde(rename = "approval.granted")]
    ApprovalGranted { approval_id: Uuid, decided_by: String },
    #[serde(rename = "approval.denied")]
    ApprovalDenied { approval_id: Uuid, decided_by: String },

    #[serde(rename = "connection.authenticated")]
    ConnectionAuthenticated { session_id: String },
    #[serde(rename = "connection.disconnected")]
    ConnectionDisconnected { session_id: String },

    #[serde(rename = "llm.stream.start")]
    LlmStreamStart {
        request_id: Uuid,
        goal_id: Option<Uuid>,
        work_item_id: Option<Uuid>,
        run_id: Option<Uuid>,
        model: String,
    },
    #[serde(rename = "llm.stream.chunk")]
    LlmStreamChunk {
        request_id: Uuid,
        goal_id: Option<Uuid>,
        work_item_id: Option<Uuid>,
        run_id: Option<Uuid>,
        content: String,
        index: u64,
    },
    #[serde(rename = "llm.stream.end")]
    LlmStreamEnd {
        request_id: Uuid,
        total_chunks: u64,
        tokens_used: u64,
        finish_reason: Option<String>,
    },
    #[serde(rename = "llm.stream.error")]
    LlmStreamError { request_id: Uuid, error: String },

    #[serde(rename = "session.lagged")]
    SessionLagged { dropped: u64 },
}

impl EventPayload {
    /// The dotted wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GoalCreated { .. } => "goal.created",
            Self::GoalUpdated { .. } => "goal.updated",
            Self::GoalCompleted { .. } => "goal.completed",
            Self::GoalCancelled { .. } => "goal.cancelled",
            Self::GoalBlocked { .. } => "goal.blocked",
            Self::WorkItemCreated { .. } => "workitem.created",
            Self::WorkItemUpdated { .. } => "workitem.updated",
            Self::WorkItemCompleted { .. } => "workitem.completed",
            Self::WorkItemFailed { .. } => "workitem.failed",
            Self::RunStarted { .. } => "run.started",
            Self::RunCompleted { .. } => "run.completed",
            Self::EscalationCreated { .. } => "escalation.created",
            Self::EscalationResolved { .. } => "escalation.resolved",
            Self::ApprovalRequested { .. } => "approval.requested",
            Self::ApprovalGranted { .. } => "approval.granted",
            Self::ApprovalDenied { .. } => "approval.denied",
            Self::ConnectionAuthenticated { .. } => "connection.authenticated",
            Self::ConnectionDisconnected { .. } => "connection.disconnected",
            Self::LlmStreamStart { .. } => "llm.stream.start",
            Self::LlmStreamChunk { .. } => "llm.stream.chunk",
            Self::LlmStreamEnd { .. } => "llm.stream.end",
            Self::LlmStreamError { .. } => "llm.stream.error",
            Self::SessionLagged { .. } => "session.lagged",
        }
    }

    /// The goal this event concerns, for broadcast filtering.
    pub fn goal_id(&self) -> Option<Uuid> {
        match self {
            Self::GoalCreated { goal } => Some(goal.id),
            Self::GoalUpdated { goal_id, .. }
            | Self::GoalCompleted { goal_id }
            | Self::GoalCancelled { goal_id }
            | Self::GoalBlocked { goal_id, .. }
            | Self::WorkItemUpdated { goal_id, .. }
            | Self::WorkItemCompleted { goal_id, .. }
            | Self::WorkItemFailed { goal_id, .. }
            | Self::RunStarted { goal_id, .. }
            | Self::RunCompleted { goal_id, .. }
            | Self::EscalationResolved { goal_id, .. } => Some(*goal_id),
            Self::WorkItemCreated { work_item } => Some(work_item.goal_id),
            Self::EscalationCreated { escalation } => Some(escalation.goal_id),
            Self::LlmStreamStart { goal_id, .. } | Self::LlmStreamChunk { goal_id, .. } => *goal_id,
            _ => None,
        }
    }
}

/// The envelope published on the bus: sequence-stamped and timestamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Monotone per-process sequence number, stamped by the bus.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Build an unstamped envelope; the bus assigns the sequence.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde_tags() {
        let payload = EventPayload::GoalCompleted { goal_id: Uuid::new_v4() };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["event"], payload.event_type());
    }

    #[test]
    fn test_goal_id_extraction() {
        let g = Uuid::new_v4();
        let payload = EventPayload::RunStarted {
            run_id: Uuid::new_v4(),
            work_item_id: Uuid::new_v4(),
            goal_id: g,
            run_sequence: 1,
            lane: "main".into(),
            model: "sonnet".into(),
        };
        assert_eq!(payload.goal_id(), Some(g));

        let payload = EventPayload::SessionLagged { dropped: 3 };
        assert_eq!(payload.goal_id(), None);
    }

    #[test]
    fn test_envelope_round_trip() {
        let event = DomainEvent::new(EventPayload::SessionLagged { dropped: 1 });
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload.event_type(), "session.lagged");
    }
}
