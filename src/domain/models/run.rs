//! Run domain model.
//!
//! A run is one execution attempt of a work item. Runs are strictly ordered
//! per work item by `run_sequence`, and at most one run per work item may be
//! `running` at any instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
    Timeout,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
        }
    }

    /// Returns true once the run can no longer change status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One execution attempt of a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier
    pub id: Uuid,
    /// The work item this run executes
    pub work_item_id: Uuid,
    /// The owning goal
    pub goal_id: Uuid,
    /// Agent type that performed the run
    pub agent_type: String,
    /// 1-based, strictly increasing per work item
    pub run_sequence: u32,
    /// Current status
    pub status: RunStatus,
    /// Process exit code, when the engine reports one
    pub exit_code: Option<i32>,
    /// Human-readable failure description
    pub error_message: Option<String>,
    /// Stable signature used to detect repeated identical failures
    pub error_signature: Option<String>,
    /// Tokens consumed by this run
    #[serde(default)]
    pub tokens_used: u64,
    /// Wall-clock seconds spent
    #[serde(default)]
    pub time_seconds: u64,
    /// Dollar cost of this run
    #[serde(default)]
    pub cost_usd: f64,
    /// Opaque artifact ids produced by the run
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Optional captured execution log
    pub execution_log: Option<String>,
    /// When this run was created
    pub created_at: DateTime<Utc>,
    /// When this run was last updated
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a new `Running` run with the given sequence number.
    pub fn new(work_item_id: Uuid, goal_id: Uuid, agent_type: impl Into<String>, run_sequence: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            goal_id,
            agent_type: agent_type.into(),
            run_sequence,
            status: RunStatus::Running,
            exit_code: None,
            error_message: None,
            error_signature: None,
            tokens_used: 0,
            time_seconds: 0,
            cost_usd: 0.0,
            artifacts: Vec::new(),
            execution_log: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true while the run is executing.
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Record a terminal outcome on this run.
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// An opaque artifact produced by a run, referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Stable artifact id (engine-assigned, unique per process).
    pub id: String,
    pub run_id: Uuid,
    pub name: String,
    pub content_type: String,
    /// Where the artifact lives; interpretation is up to the engine.
    pub uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(run_id: Uuid, name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id,
            name: name.into(),
            content_type: content_type.into(),
            uri: None,
            created_at: Utc::now(),
        }
    }
}
