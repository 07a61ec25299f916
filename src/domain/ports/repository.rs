//! Work-order repository port.
//!
//! The repository is the sole source of truth for goals, work items, runs,
//! escalations, artifacts, and approvals. The scheduler never keeps durable
//! state of its own: every transition is written here before the matching
//! event is emitted. Concrete persistence is an external collaborator; the
//! crate ships an in-memory implementation for tests and single-process use.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Approval, Artifact, Escalation, EscalationStatus, Goal, GoalStatus, Run, RunStatus, WorkItem,
    WorkItemStatus,
};

/// Filter criteria for listing goals.
#[derive(Debug, Clone, Default)]
pub struct GoalFilter {
    pub status: Option<GoalStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// A page of goals plus the unpaged total.
#[derive(Debug, Clone)]
pub struct GoalPage {
    pub goals: Vec<Goal>,
    pub total: usize,
}

/// Repository interface for all scheduler-owned entities.
///
/// Status-changing operations are conditional: they verify the stored
/// entity's state machine permits the transition and return
/// [`DomainError::Conflict`](crate::domain::errors::DomainError::Conflict)
/// or `InvalidStateTransition` otherwise, so the scheduler observes
/// linearizable transitions without holding locks of its own.
#[async_trait]
pub trait WorkOrderRepository: Send + Sync {
    // -------------------------------------------------------------------------
    // Goals
    // -------------------------------------------------------------------------

    async fn create_goal(&self, goal: &Goal) -> DomainResult<()>;

    async fn get_goal(&self, id: Uuid) -> DomainResult<Option<Goal>>;

    async fn list_goals(&self, filter: GoalFilter) -> DomainResult<GoalPage>;

    /// Transition a goal's status; rejects invalid transitions.
    async fn update_goal_status(&self, id: Uuid, status: GoalStatus) -> DomainResult<Goal>;

    /// Atomically add usage to a goal's monotone spend counters.
    async fn add_goal_spend(
        &self,
        id: Uuid,
        tokens: u64,
        time_minutes: u64,
        cost_usd: f64,
    ) -> DomainResult<Goal>;

    // -------------------------------------------------------------------------
    // Work items
    // -------------------------------------------------------------------------

    async fn create_work_item(&self, item: &WorkItem) -> DomainResult<()>;

    async fn get_work_item(&self, id: Uuid) -> DomainResult<Option<WorkItem>>;

    async fn get_work_items_by_goal(&self, goal_id: Uuid) -> DomainResult<Vec<WorkItem>>;

    /// Replace a stored work item (retry counters, verification status).
    async fn update_work_item(&self, item: &WorkItem) -> DomainResult<()>;

    /// Transition a work item's status; rejects invalid transitions.
    async fn update_work_item_status(
        &self,
        id: Uuid,
        status: WorkItemStatus,
    ) -> DomainResult<WorkItem>;

    /// Promote a queued item to `ready` iff every dependency is `done`.
    /// Returns the updated item, or `None` when dependencies are not met.
    async fn update_work_item_status_if_dependencies_met(
        &self,
        id: Uuid,
    ) -> DomainResult<Option<WorkItem>>;

    // -------------------------------------------------------------------------
    // Runs
    // -------------------------------------------------------------------------

    /// Create a run. Rejects a second `running` run for the same work item.
    async fn create_run(&self, run: &Run) -> DomainResult<()>;

    async fn get_run(&self, id: Uuid) -> DomainResult<Option<Run>>;

    /// Replace a stored run (usage counters, error fields, artifacts).
    async fn update_run(&self, run: &Run) -> DomainResult<()>;

    async fn update_run_status(&self, id: Uuid, status: RunStatus) -> DomainResult<Run>;

    /// All runs of a work item, ordered by `run_sequence`.
    async fn get_runs_by_work_item(&self, work_item_id: Uuid) -> DomainResult<Vec<Run>>;

    // -------------------------------------------------------------------------
    // Escalations
    // -------------------------------------------------------------------------

    async fn create_escalation(&self, escalation: &Escalation) -> DomainResult<()>;

    async fn get_escalation(&self, id: Uuid) -> DomainResult<Option<Escalation>>;

    async fn update_escalation_status(
        &self,
        id: Uuid,
        status: EscalationStatus,
    ) -> DomainResult<Escalation>;

    /// Shorthand for `update_escalation_status(id, Resolved)`.
    async fn resolve_escalation(&self, id: Uuid) -> DomainResult<Escalation>;

    /// Open or acknowledged escalations, optionally restricted to one goal.
    async fn get_open_escalations(&self, goal_id: Option<Uuid>) -> DomainResult<Vec<Escalation>>;

    /// All escalations matching the optional goal and status filters.
    async fn list_escalations(
        &self,
        goal_id: Option<Uuid>,
        status: Option<EscalationStatus>,
    ) -> DomainResult<Vec<Escalation>>;

    // -------------------------------------------------------------------------
    // Artifacts
    // -------------------------------------------------------------------------

    async fn create_artifact(&self, artifact: &Artifact) -> DomainResult<()>;

    async fn get_artifact(&self, id: &str) -> DomainResult<Option<Artifact>>;

    // -------------------------------------------------------------------------
    // Approvals
    // -------------------------------------------------------------------------

    async fn create_approval(&self, approval: &Approval) -> DomainResult<()>;

    async fn get_approval(&self, id: Uuid) -> DomainResult<Option<Approval>>;

    async fn list_approvals(
        &self,
        status: Option<crate::domain::models::ApprovalStatus>,
    ) -> DomainResult<Vec<Approval>>;

    /// Replace a stored approval (used to record decisions).
    async fn update_approval(&self, approval: &Approval) -> DomainResult<()>;
}
