//! Work item domain model.
//!
//! A work item is one node in a goal's dependency DAG. Items move from
//! `queued` to `ready` when every dependency is `done`, get dispatched to the
//! execution engine as runs, pass through `verify`, and land in a terminal
//! state. The verification plan (quality gates plus acceptance criteria)
//! rides along on the item itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The kind of work an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    Code,
    Test,
    Doc,
    Refactor,
    Analysis,
}

impl WorkItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Test => "test",
            Self::Doc => "doc",
            Self::Refactor => "refactor",
            Self::Analysis => "analysis",
        }
    }
}

/// Status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Waiting on dependencies.
    Queued,
    /// All dependencies done; eligible for dispatch.
    Ready,
    /// A run is executing.
    InProgress,
    /// Run succeeded; quality gates are being evaluated.
    Verify,
    /// Verification passed.
    Done,
    /// Retries exhausted or non-recoverable failure.
    Failed,
    /// Waiting on an escalation.
    Blocked,
    /// Cancelled as part of a goal cascade.
    Cancelled,
}

impl Default for WorkItemStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Verify => "verify",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "ready" => Some(Self::Ready),
            "in_progress" => Some(Self::InProgress),
            "verify" => Some(Self::Verify),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this status can transition to another status.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        matches!(
            (self, new_status),
            (Self::Queued, Self::Ready)
                | (Self::Queued, Self::Blocked)
                | (Self::Queued, Self::Cancelled)
                | (Self::Ready, Self::InProgress)
                | (Self::Ready, Self::Blocked)
                | (Self::Ready, Self::Cancelled)
                | (Self::InProgress, Self::Verify)
                | (Self::InProgress, Self::Ready)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Blocked)
                | (Self::InProgress, Self::Cancelled)
                | (Self::Verify, Self::Done)
                | (Self::Verify, Self::Ready)
                | (Self::Verify, Self::Failed)
                | (Self::Verify, Self::Blocked)
                | (Self::Verify, Self::Cancelled)
                | (Self::Blocked, Self::Ready)
                | (Self::Blocked, Self::Queued)
                | (Self::Blocked, Self::Cancelled)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Rough effort estimate used by lane and model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EstimatedEffort {
    S,
    M,
    L,
    XL,
}

impl Default for EstimatedEffort {
    fn default() -> Self {
        Self::M
    }
}

impl EstimatedEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::M => "M",
            Self::L => "L",
            Self::XL => "XL",
        }
    }
}

/// The kind of check a quality gate performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    /// Run a command; pass iff the exit code matches.
    Deterministic,
    /// Ask an LLM reviewer for a pass/fail verdict.
    LlmReview,
}

/// A single verification gate.
///
/// Invariant: `Deterministic` gates carry a command, `LlmReview` gates carry
/// a review prompt. Use the constructors to uphold this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGate {
    pub name: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    pub command: Option<String>,
    #[serde(default)]
    pub expected_exit_code: i32,
    pub review_prompt: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl QualityGate {
    /// A deterministic command gate passing on the default exit code 0.
    pub fn deterministic(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gate_type: GateType::Deterministic,
            command: Some(command.into()),
            expected_exit_code: 0,
            review_prompt: None,
            required: true,
        }
    }

    /// An LLM-review gate with the given prompt.
    pub fn llm_review(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gate_type: GateType::LlmReview,
            command: None,
            expected_exit_code: 0,
            review_prompt: Some(prompt.into()),
            required: true,
        }
    }

    /// Mark this gate as advisory (its failure does not fail verification).
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Override the expected exit code of a deterministic gate.
    pub fn expecting_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = code;
        self
    }

    /// Validate the type/field invariant.
    pub fn validate(&self) -> Result<(), String> {
        match self.gate_type {
            GateType::Deterministic if self.command.is_none() => {
                Err(format!("Deterministic gate '{}' has no command", self.name))
            }
            GateType::LlmReview if self.review_prompt.is_none() => {
                Err(format!("LLM-review gate '{}' has no prompt", self.name))
            }
            _ => Ok(()),
        }
    }
}

/// How a work item gets verified after a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationPlan {
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl VerificationPlan {
    pub fn is_empty(&self) -> bool {
        self.quality_gates.is_empty()
    }
}

/// Outcome of the most recent verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NotStarted,
    Passed,
    Failed,
    Skipped,
}

impl Default for VerificationStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

/// A node in a goal's dependency DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier
    pub id: Uuid,
    /// Owning goal
    pub goal_id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Detailed description
    pub description: String,
    /// Kind of work
    pub item_type: WorkItemType,
    /// Current status
    pub status: WorkItemStatus,
    /// Priority; lower value means higher priority
    pub priority: i32,
    /// Ids of work items (same goal) that must be done first
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Inverse edges: items waiting on this one
    #[serde(default)]
    pub blocks: Vec<Uuid>,
    /// Agent type assigned to execute this item
    pub assigned_agent: Option<String>,
    /// Rough effort estimate
    #[serde(default)]
    pub estimated_effort: EstimatedEffort,
    /// Number of failed runs so far
    #[serde(default)]
    pub retry_count: u32,
    /// Maximum retries before escalating
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Verification plan applied after a successful run
    pub verification_plan: Option<VerificationPlan>,
    /// Outcome of the latest verification pass
    #[serde(default)]
    pub verification_status: VerificationStatus,
    /// Opaque context (lane/tier overrides, interactive flags)
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// When this item was created
    pub created_at: DateTime<Utc>,
    /// When this item was last updated
    pub updated_at: DateTime<Utc>,
}

fn default_max_retries() -> u32 {
    3
}

impl WorkItem {
    /// Create a new queued work item for a goal.
    pub fn new(
        goal_id: Uuid,
        title: impl Into<String>,
        description: impl Into<String>,
        item_type: WorkItemType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal_id,
            title: title.into(),
            description: description.into(),
            item_type,
            status: WorkItemStatus::default(),
            priority: 0,
            dependencies: Vec::new(),
            blocks: Vec::new(),
            assigned_agent: None,
            estimated_effort: EstimatedEffort::default(),
            retry_count: 0,
            max_retries: default_max_retries(),
            verification_plan: None,
            verification_status: VerificationStatus::default(),
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_effort(mut self, effort: EstimatedEffort) -> Self {
        self.estimated_effort = effort;
        self
    }

    pub fn with_dependency(mut self, dep: Uuid) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn with_verification_plan(mut self, plan: VerificationPlan) -> Self {
        self.verification_plan = Some(plan);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Insert a context value (lane override, tier override, flags).
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Check if this item is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if this item can transition to the given status.
    pub fn can_transition_to(&self, new_status: WorkItemStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, updating the timestamp.
    pub fn transition_to(&mut self, new_status: WorkItemStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition work item from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// A boolean context flag, false when absent or not a boolean.
    pub fn context_flag(&self, key: &str) -> bool {
        self.context
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// A string context value, None when absent or not a string.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> WorkItem {
        WorkItem::new(Uuid::new_v4(), "Implement parser", "", WorkItemType::Code)
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut w = item();
        assert_eq!(w.status, WorkItemStatus::Queued);
        w.transition_to(WorkItemStatus::Ready).unwrap();
        w.transition_to(WorkItemStatus::InProgress).unwrap();
        w.transition_to(WorkItemStatus::Verify).unwrap();
        w.transition_to(WorkItemStatus::Done).unwrap();
        assert!(w.is_terminal());
    }

    #[test]
    fn test_cannot_skip_ready() {
        let w = item();
        assert!(!w.can_transition_to(WorkItemStatus::InProgress));
        assert!(!w.can_transition_to(WorkItemStatus::Done));
    }

    #[test]
    fn test_verify_failure_returns_to_ready_for_retry() {
        let mut w = item();
        w.transition_to(WorkItemStatus::Ready).unwrap();
        w.transition_to(WorkItemStatus::InProgress).unwrap();
        w.transition_to(WorkItemStatus::Verify).unwrap();
        // Retryable verification failure re-queues the item.
        assert!(w.can_transition_to(WorkItemStatus::Ready));
        // Exhausted retries fail it.
        assert!(w.can_transition_to(WorkItemStatus::Failed));
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut w = item();
        w.transition_to(WorkItemStatus::Cancelled).unwrap();
        assert!(w.transition_to(WorkItemStatus::Ready).is_err());
    }

    #[test]
    fn test_gate_constructors_uphold_invariant() {
        let det = QualityGate::deterministic("build", "cargo check");
        assert!(det.validate().is_ok());
        assert_eq!(det.expected_exit_code, 0);

        let review = QualityGate::llm_review("style", "Does this read well?").optional();
        assert!(review.validate().is_ok());
        assert!(!review.required);

        let broken = QualityGate {
            name: "broken".into(),
            gate_type: GateType::Deterministic,
            command: None,
            expected_exit_code: 0,
            review_prompt: None,
            required: true,
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_context_accessors() {
        let w = item()
            .with_context("interactive", serde_json::json!(true))
            .with_context("lane", serde_json::json!("cron"));
        assert!(w.context_flag("interactive"));
        assert!(!w.context_flag("scheduled"));
        assert_eq!(w.context_str("lane"), Some("cron"));
    }
}
