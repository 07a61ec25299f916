//! Goal domain model.
//!
//! A goal is one unit of user intent. The scheduler decomposes it into a
//! dependency graph of work items and drives it to a terminal state while
//! honoring the goal's budgets and blocking escalations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a goal in the system.
///
/// `Completed` and `Cancelled` are terminal: once a goal reaches either, no
/// further transition is valid. `Blocked` is always recoverable back to
/// `Active` (budget topped up, escalation resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Submitted, not yet picked up by the scheduler.
    Queued,
    /// Currently being driven by the scheduler.
    Active,
    /// Progress suspended by a blocking escalation or exhausted budget.
    Blocked,
    /// All work items are done.
    Completed,
    /// Cancelled by a client; cascades to non-terminal work items.
    Cancelled,
}

impl Default for GoalStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "active" => Some(Self::Active),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this status can transition to another status.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        matches!(
            (self, new_status),
            (Self::Queued, Self::Active)
                | (Self::Queued, Self::Cancelled)
                | (Self::Active, Self::Blocked)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Cancelled)
                | (Self::Blocked, Self::Active)
                | (Self::Blocked, Self::Cancelled)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// How a success criterion is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    /// Checked by running a command or comparing concrete outputs.
    Deterministic,
    /// Checked by judgment (typically an LLM review).
    Heuristic,
}

/// One acceptance criterion attached to a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub description: String,
    pub kind: CriterionKind,
    /// Free-form description of how the criterion is verified.
    pub verification_method: String,
    /// Required criteria gate goal completion; optional ones are advisory.
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// Optional per-goal spend limits. Absent axes are unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalBudgets {
    pub tokens: Option<u64>,
    pub time_minutes: Option<u64>,
    pub cost_usd: Option<f64>,
}

impl GoalBudgets {
    /// Returns true if no axis is limited.
    pub fn is_unlimited(&self) -> bool {
        self.tokens.is_none() && self.time_minutes.is_none() && self.cost_usd.is_none()
    }
}

/// Running spend counters for a goal.
///
/// Counters are monotone-nondecreasing. Spend may legitimately overshoot the
/// configured budget: the last run that crosses the limit still records its
/// full usage, and the overshoot is what the budget tracker detects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalSpend {
    pub tokens: u64,
    pub time_minutes: u64,
    pub cost_usd: f64,
}

impl GoalSpend {
    /// Add usage to the counters. Negative cost deltas are ignored so the
    /// counters never decrease.
    pub fn add(&mut self, tokens: u64, time_minutes: u64, cost_usd: f64) {
        self.tokens = self.tokens.saturating_add(tokens);
        self.time_minutes = self.time_minutes.saturating_add(time_minutes);
        if cost_usd > 0.0 {
            self.cost_usd += cost_usd;
        }
    }
}

/// A user-submitted goal, decomposed into work items by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Detailed description
    pub description: String,
    /// Ordered acceptance criteria
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
    /// Current status
    pub status: GoalStatus,
    /// Priority; lower value means higher priority
    pub priority: i32,
    /// Optional spend limits
    #[serde(default)]
    pub budgets: GoalBudgets,
    /// Running spend counters
    #[serde(default)]
    pub spend: GoalSpend,
    /// Parent goal (for sub-goals)
    pub parent_id: Option<Uuid>,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque context carried through to work items
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// When this goal was created
    pub created_at: DateTime<Utc>,
    /// When this goal was last updated
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Create a new queued goal with the given title and description.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            success_criteria: Vec::new(),
            status: GoalStatus::default(),
            priority: 0,
            budgets: GoalBudgets::default(),
            spend: GoalSpend::default(),
            parent_id: None,
            tags: Vec::new(),
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the priority of this goal (lower is higher priority).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the spend limits of this goal.
    pub fn with_budgets(mut self, budgets: GoalBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Set the parent goal.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Add a success criterion.
    pub fn with_criterion(mut self, criterion: SuccessCriterion) -> Self {
        self.success_criteria.push(criterion);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Check if this goal is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if this goal can transition to the given status.
    pub fn can_transition_to(&self, new_status: GoalStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, updating the timestamp.
    pub fn transition_to(&mut self, new_status: GoalStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition goal from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Validate this goal.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.is_empty() {
            return Err("Goal title cannot be empty".to_string());
        }
        if self.title.len() > 255 {
            return Err("Goal title cannot exceed 255 characters".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_creation() {
        let goal = Goal::new("Test Goal", "A test description");
        assert_eq!(goal.title, "Test Goal");
        assert_eq!(goal.status, GoalStatus::Queued);
        assert_eq!(goal.priority, 0);
        assert!(goal.budgets.is_unlimited());
    }

    #[test]
    fn test_goal_state_transitions() {
        let mut goal = Goal::new("Test", "Description");

        assert!(goal.can_transition_to(GoalStatus::Active));
        assert!(goal.can_transition_to(GoalStatus::Cancelled));
        assert!(!goal.can_transition_to(GoalStatus::Completed));

        goal.transition_to(GoalStatus::Active).unwrap();
        assert!(goal.can_transition_to(GoalStatus::Blocked));
        assert!(goal.can_transition_to(GoalStatus::Completed));

        goal.transition_to(GoalStatus::Blocked).unwrap();
        assert!(goal.can_transition_to(GoalStatus::Active));
        assert!(!goal.can_transition_to(GoalStatus::Completed));
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let mut goal = Goal::new("Test", "Description");
        goal.transition_to(GoalStatus::Active).unwrap();
        goal.transition_to(GoalStatus::Completed).unwrap();

        assert!(goal.is_terminal());
        assert!(goal.transition_to(GoalStatus::Active).is_err());
        assert!(goal.transition_to(GoalStatus::Cancelled).is_err());

        let mut cancelled = Goal::new("Test", "Description");
        cancelled.transition_to(GoalStatus::Cancelled).unwrap();
        assert!(cancelled.transition_to(GoalStatus::Active).is_err());
    }

    #[test]
    fn test_spend_is_monotone() {
        let mut spend = GoalSpend::default();
        spend.add(100, 2, 0.01);
        spend.add(50, 0, -5.0); // negative cost ignored
        assert_eq!(spend.tokens, 150);
        assert_eq!(spend.time_minutes, 2);
        assert!((spend.cost_usd - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_goal_validation() {
        let goal = Goal::new("", "Empty title");
        assert!(goal.validate().is_err());

        let goal = Goal::new("Valid", "Description");
        assert!(goal.validate().is_ok());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            GoalStatus::Queued,
            GoalStatus::Active,
            GoalStatus::Blocked,
            GoalStatus::Completed,
            GoalStatus::Cancelled,
        ] {
            assert_eq!(GoalStatus::from_str(status.as_str()), Some(status));
        }
        assert!(GoalStatus::from_str("retired").is_none());
    }
}
