//! In-memory work-order repository.
//!
//! Reference implementation of the repository port used by tests and
//! single-process deployments. It enforces the same transition and
//! concurrency rules a persistent implementation must: status changes are
//! checked against the entity state machines, terminal entities conflict,
//! and at most one run per work item may be `running`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Approval, ApprovalStatus, Artifact, Escalation, EscalationStatus, Goal, GoalStatus, Run,
    RunStatus, WorkItem, WorkItemStatus,
};
use crate::domain::ports::{GoalFilter, GoalPage, WorkOrderRepository};

#[derive(Default)]
struct Store {
    goals: HashMap<Uuid, Goal>,
    work_items: HashMap<Uuid, WorkItem>,
    runs: HashMap<Uuid, Run>,
    escalations: HashMap<Uuid, Escalation>,
    artifacts: HashMap<String, Artifact>,
    approvals: HashMap<Uuid, Approval>,
}

/// Thread-safe in-memory store behind the repository port.
#[derive(Default)]
pub struct InMemoryWorkOrderRepository {
    store: RwLock<Store>,
}

impl InMemoryWorkOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkOrderRepository for InMemoryWorkOrderRepository {
    // -------------------------------------------------------------------------
    // Goals
    // -------------------------------------------------------------------------

    async fn create_goal(&self, goal: &Goal) -> DomainResult<()> {
        let mut store = self.store.write().await;
        store.goals.insert(goal.id, goal.clone());
        Ok(())
    }

    async fn get_goal(&self, id: Uuid) -> DomainResult<Option<Goal>> {
        Ok(self.store.read().await.goals.get(&id).cloned())
    }

    async fn list_goals(&self, filter: GoalFilter) -> DomainResult<GoalPage> {
        let store = self.store.read().await;
        let mut goals: Vec<Goal> = store
            .goals
            .values()
            .filter(|g| filter.status.is_none_or(|s| g.status == s))
            .cloned()
            .collect();
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let total = goals.len();
        let offset = filter.offset.unwrap_or(0).min(total);
        let end = filter
            .limit
            .map_or(total, |limit| (offset + limit).min(total));
        Ok(GoalPage {
            goals: goals[offset..end].to_vec(),
            total,
        })
    }

    async fn update_goal_status(&self, id: Uuid, status: GoalStatus) -> DomainResult<Goal> {
        let mut store = self.store.write().await;
        let goal = store
            .goals
            .get_mut(&id)
            .ok_or(DomainError::GoalNotFound(id))?;
        if goal.is_terminal() {
            return Err(DomainError::Conflict {
                entity: "goal".to_string(),
                id: id.to_string(),
            });
        }
        if !goal.can_transition_to(status) {
            return Err(DomainError::InvalidStateTransition {
                entity: "goal".to_string(),
                from: goal.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        goal.status = status;
        goal.updated_at = Utc::now();
        Ok(goal.clone())
    }

    async fn add_goal_spend(
        &self,
        id: Uuid,
        tokens: u64,
        time_minutes: u64,
        cost_usd: f64,
    ) -> DomainResult<Goal> {
        let mut store = self.store.write().await;
        let goal = store
            .goals
            .get_mut(&id)
            .ok_or(DomainError::GoalNotFound(id))?;
        goal.spend.add(tokens, time_minutes, cost_usd);
        goal.updated_at = Utc::now();
        Ok(goal.clone())
    }

    // -------------------------------------------------------------------------
    // Work items
    // -------------------------------------------------------------------------

    async fn create_work_item(&self, item: &WorkItem) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.goals.contains_key(&item.goal_id) {
            return Err(DomainError::GoalNotFound(item.goal_id));
        }
        store.work_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_work_item(&self, id: Uuid) -> DomainResult<Option<WorkItem>> {
        Ok(self.store.read().await.work_items.get(&id).cloned())
    }

    async fn get_work_items_by_goal(&self, goal_id: Uuid) -> DomainResult<Vec<WorkItem>> {
        let store = self.store.read().await;
        let mut items: Vec<WorkItem> = store
            .work_items
            .values()
            .filter(|w| w.goal_id == goal_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn update_work_item(&self, item: &WorkItem) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.work_items.contains_key(&item.id) {
            return Err(DomainError::WorkItemNotFound(item.id));
        }
        let mut updated = item.clone();
        updated.updated_at = Utc::now();
        store.work_items.insert(item.id, updated);
        Ok(())
    }

    async fn update_work_item_status(
        &self,
        id: Uuid,
        status: WorkItemStatus,
    ) -> DomainResult<WorkItem> {
        let mut store = self.store.write().await;
        let item = store
            .work_items
            .get_mut(&id)
            .ok_or(DomainError::WorkItemNotFound(id))?;
        if item.is_terminal() {
            return Err(DomainError::Conflict {
                entity: "work_item".to_string(),
                id: id.to_string(),
            });
        }
        if !item.can_transition_to(status) {
            return Err(DomainError::InvalidStateTransition {
                entity: "work_item".to_string(),
                from: item.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        item.status = status;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn update_work_item_status_if_dependencies_met(
        &self,
        id: Uuid,
    ) -> DomainResult<Option<WorkItem>> {
        let mut store = self.store.write().await;
        let Some(item) = store.work_items.get(&id) else {
            return Err(DomainError::WorkItemNotFound(id));
        };
        if item.status != WorkItemStatus::Queued {
            return Ok(None);
        }
        let deps_met = item.dependencies.iter().all(|dep| {
            store
                .work_items
                .get(dep)
                .is_some_and(|d| d.status == WorkItemStatus::Done)
        });
        if !deps_met {
            return Ok(None);
        }
        let item = store
            .work_items
            .get_mut(&id)
            .ok_or(DomainError::WorkItemNotFound(id))?;
        item.status = WorkItemStatus::Ready;
        item.updated_at = Utc::now();
        Ok(Some(item.clone()))
    }

    // -------------------------------------------------------------------------
    // Runs
    // -------------------------------------------------------------------------

    async fn create_run(&self, run: &Run) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.work_items.contains_key(&run.work_item_id) {
            return Err(DomainError::WorkItemNotFound(run.work_item_id));
        }
        let existing: Vec<&Run> = store
            .runs
            .values()
            .filter(|r| r.work_item_id == run.work_item_id)
            .collect();
        if existing.iter().any(|r| r.status == RunStatus::Running) {
            return Err(DomainError::Conflict {
                entity: "run".to_string(),
                id: run.work_item_id.to_string(),
            });
        }
        let last_sequence = existing.iter().map(|r| r.run_sequence).max().unwrap_or(0);
        if run.run_sequence <= last_sequence {
            return Err(DomainError::ValidationFailed(format!(
                "run_sequence {} must exceed {last_sequence}",
                run.run_sequence
            )));
        }
        store.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> DomainResult<Option<Run>> {
        Ok(self.store.read().await.runs.get(&id).cloned())
    }

    async fn update_run(&self, run: &Run) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.runs.contains_key(&run.id) {
            return Err(DomainError::RunNotFound(run.id));
        }
        let mut updated = run.clone();
        updated.updated_at = Utc::now();
        store.runs.insert(run.id, updated);
        Ok(())
    }

    async fn update_run_status(&self, id: Uuid, status: RunStatus) -> DomainResult<Run> {
        let mut store = self.store.write().await;
        let run = store.runs.get_mut(&id).ok_or(DomainError::RunNotFound(id))?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(run.clone())
    }

    async fn get_runs_by_work_item(&self, work_item_id: Uuid) -> DomainResult<Vec<Run>> {
        let store = self.store.read().await;
        let mut runs: Vec<Run> = store
            .runs
            .values()
            .filter(|r| r.work_item_id == work_item_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.run_sequence);
        Ok(runs)
    }

    // -------------------------------------------------------------------------
    // Escalations
    // -------------------------------------------------------------------------

    async fn create_escalation(&self, escalation: &Escalation) -> DomainResult<()> {
        let mut store = self.store.write().await;
        store.escalations.insert(escalation.id, escalation.clone());
        Ok(())
    }

    async fn get_escalation(&self, id: Uuid) -> DomainResult<Option<Escalation>> {
        Ok(self.store.read().await.escalations.get(&id).cloned())
    }

    async fn update_escalation_status(
        &self,
        id: Uuid,
        status: EscalationStatus,
    ) -> DomainResult<Escalation> {
        let mut store = self.store.write().await;
        let escalation = store
            .escalations
            .get_mut(&id)
            .ok_or(DomainError::EscalationNotFound(id))?;
        if escalation.status.is_terminal() {
            return Err(DomainError::Conflict {
                entity: "escalation".to_string(),
                id: id.to_string(),
            });
        }
        escalation.status = status;
        escalation.updated_at = Utc::now();
        Ok(escalation.clone())
    }

    async fn resolve_escalation(&self, id: Uuid) -> DomainResult<Escalation> {
        self.update_escalation_status(id, EscalationStatus::Resolved)
            .await
    }

    async fn get_open_escalations(&self, goal_id: Option<Uuid>) -> DomainResult<Vec<Escalation>> {
        let store = self.store.read().await;
        Ok(store
            .escalations
            .values()
            .filter(|e| !e.status.is_terminal())
            .filter(|e| goal_id.is_none_or(|g| e.goal_id == g))
            .cloned()
            .collect())
    }

    async fn list_escalations(
        &self,
        goal_id: Option<Uuid>,
        status: Option<EscalationStatus>,
    ) -> DomainResult<Vec<Escalation>> {
        let store = self.store.read().await;
        let mut escalations: Vec<Escalation> = store
            .escalations
            .values()
            .filter(|e| goal_id.is_none_or(|g| e.goal_id == g))
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        escalations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(escalations)
    }

    // -------------------------------------------------------------------------
    // Artifacts
    // -------------------------------------------------------------------------

    async fn create_artifact(&self, artifact: &Artifact) -> DomainResult<()> {
        let mut store = self.store.write().await;
        store.artifacts.insert(artifact.id.clone(), artifact.clone());
        Ok(())
    }

    async fn get_artifact(&self, id: &str) -> DomainResult<Option<Artifact>> {
        Ok(self.store.read().await.artifacts.get(id).cloned())
    }

    // -------------------------------------------------------------------------
    // Approvals
    // -------------------------------------------------------------------------

    async fn create_approval(&self, approval: &Approval) -> DomainResult<()> {
        let mut store = self.store.write().await;
        store.approvals.insert(approval.id, approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: Uuid) -> DomainResult<Option<Approval>> {
        Ok(self.store.read().await.approvals.get(&id).cloned())
    }

    async fn list_approvals(&self, status: Option<ApprovalStatus>) -> DomainResult<Vec<Approval>> {
        let store = self.store.read().await;
        let mut approvals: Vec<Approval> = store
            .approvals
            .values()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        approvals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(approvals)
    }

    async fn update_approval(&self, approval: &Approval) -> DomainResult<()> {
        let mut store = self.store.write().await;
        if !store.approvals.contains_key(&approval.id) {
            return Err(DomainError::ApprovalNotFound(approval.id));
        }
        store.approvals.insert(approval.id, approval.clone());
        Ok(())
    }
}
