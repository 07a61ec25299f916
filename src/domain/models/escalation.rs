//! Escalation domain model.
//!
//! An escalation is a structured request for human intervention. Open or
//! acknowledged escalations of severity `High` or above block all progress
//! on their goal until resolved or dismissed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Why the escalation was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// No forward progress (retries exhausted, repeated errors, timeouts).
    Stuck,
    /// The work item cannot be interpreted without human input.
    Ambiguous,
    /// The action carries risk requiring sign-off.
    Risk,
    /// Missing or invalid credentials.
    Credential,
    /// Verification rejected the result in a non-retryable way.
    ValidationFailed,
}

impl EscalationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stuck => "stuck",
            Self::Ambiguous => "ambiguous",
            Self::Risk => "risk",
            Self::Credential => "credential",
            Self::ValidationFailed => "validation_failed",
        }
    }
}

/// Ordered severity; `High` and above block the goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EscalationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Lifecycle of an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Open,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    /// Resolved and dismissed escalations never block again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }
}

/// A structured request for human intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub goal_id: Uuid,
    pub run_id: Option<Uuid>,
    pub kind: EscalationKind,
    pub severity: EscalationSeverity,
    pub status: EscalationStatus,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(
        work_item_id: Uuid,
        goal_id: Uuid,
        kind: EscalationKind,
        severity: EscalationSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            goal_id,
            run_id: None,
            kind,
            severity,
            status: EscalationStatus::Open,
            title: title.into(),
            description: description.into(),
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// True while this escalation prevents progress on its goal.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self.status,
            EscalationStatus::Open | EscalationStatus::Acknowledged
        ) && self.severity >= EscalationSeverity::High
    }
}
