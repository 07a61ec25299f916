//! Approval domain model.
//!
//! Approvals are explicit human sign-off requests, kept as a subsystem
//! separate from escalations. They live behind the repository port so the
//! in-memory first cut can be replaced by persistence without touching
//! handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Granted,
    Denied,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A human sign-off request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Session id or subsystem that raised the request.
    pub requested_by: String,
    pub status: ApprovalStatus,
    /// Session id that decided, once decided.
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            requested_by: requested_by.into(),
            status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Record a decision. Fails if already decided.
    pub fn decide(&mut self, status: ApprovalStatus, decided_by: impl Into<String>) -> Result<(), String> {
        if self.status.is_decided() {
            return Err(format!("Approval {} is already {}", self.id, self.status.as_str()));
        }
        if !status.is_decided() {
            return Err("Decision must be granted or denied".to_string());
        }
        self.status = status;
        self.decided_by = Some(decided_by.into());
        self.decided_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_once() {
        let mut a = Approval::new("Deploy", "Push to prod", "scheduler");
        assert_eq!(a.status, ApprovalStatus::Pending);

        a.decide(ApprovalStatus::Granted, "local:127.0.0.1").unwrap();
        assert_eq!(a.status, ApprovalStatus::Granted);
        assert!(a.decided_at.is_some());

        assert!(a.decide(ApprovalStatus::Denied, "other").is_err());
    }

    #[test]
    fn test_pending_is_not_a_decision() {
        let mut a = Approval::new("t", "d", "r");
        assert!(a.decide(ApprovalStatus::Pending, "x").is_err());
    }
}
