//! Escalation management and stuck-state detection.
//!
//! Escalations are written through the repository before the matching event
//! is emitted, so a client that misses the event still sees the escalation
//! on its next list. The stuck detector runs from the scheduler's periodic
//! sweep and turns stalled items into `stuck` escalations; acknowledged
//! items are suppressed for a window so the sweep does not re-raise them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Escalation, EscalationKind, EscalationSeverity, EventPayload, RunStatus, WorkItem,
    WorkItemStatus,
};
use crate::domain::ports::WorkOrderRepository;
use crate::services::event_bus::EventBus;
use crate::services::retry_handler::trailing_signature_streak;
use crate::services::work_item_manager::WorkItemManager;

/// Stuck-detection windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckConfig {
    /// How long an item may sit `in_progress` before it is stuck.
    #[serde(default = "default_in_progress_ms")]
    pub max_in_progress_duration_ms: u64,
    /// How long an item may sit `ready` undispatched before it is stuck.
    #[serde(default = "default_ready_ms")]
    pub max_ready_duration_ms: u64,
    /// How long a single run may stay `running`.
    #[serde(default = "default_run_ms")]
    pub max_run_duration_ms: u64,
    /// Consecutive identical failure signatures tolerated by the sweep.
    #[serde(default = "default_same_error")]
    pub max_same_error_retries: u32,
    /// Default acknowledgement suppression window.
    #[serde(default = "default_ack_ms")]
    pub ack_suppression_ms: u64,
}

fn default_in_progress_ms() -> u64 {
    30 * 60 * 1000
}
fn default_ready_ms() -> u64 {
    10 * 60 * 1000
}
fn default_run_ms() -> u64 {
    30 * 60 * 1000
}
fn default_same_error() -> u32 {
    2
}
fn default_ack_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            max_in_progress_duration_ms: default_in_progress_ms(),
            max_ready_duration_ms: default_ready_ms(),
            max_run_duration_ms: default_run_ms(),
            max_same_error_retries: default_same_error(),
            ack_suppression_ms: default_ack_ms(),
        }
    }
}

/// Creates escalations, answers blocking queries, and sweeps stuck states.
pub struct EscalationHandler {
    repository: Arc<dyn WorkOrderRepository>,
    event_bus: Arc<EventBus>,
    config: StuckConfig,
    /// Suppression windows from `acknowledge_stuck`, by work item.
    suppressed: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl EscalationHandler {
    pub fn new(
        repository: Arc<dyn WorkOrderRepository>,
        event_bus: Arc<EventBus>,
        config: StuckConfig,
    ) -> Self {
        Self {
            repository,
            event_bus,
            config,
            suppressed: RwLock::new(HashMap::new()),
        }
    }

    /// True when any open/acknowledged escalation of severity ≥ high exists
    /// for the goal.
    pub async fn has_blocking_escalations(&self, goal_id: Uuid) -> DomainResult<bool> {
        let open = self.repository.get_open_escalations(Some(goal_id)).await?;
        Ok(open.iter().any(Escalation::is_blocking))
    }

    /// Persist an escalation and emit `escalation.created`.
    pub async fn create_escalation(&self, escalation: Escalation) -> DomainResult<Escalation> {
        self.repository.create_escalation(&escalation).await?;
        info!(
            escalation_id = %escalation.id,
            goal_id = %escalation.goal_id,
            kind = escalation.kind.as_str(),
            severity = escalation.severity.as_str(),
            "escalation created"
        );
        self.event_bus.publish(EventPayload::EscalationCreated {
            escalation: escalation.clone(),
        });
        Ok(escalation)
    }

    /// Suppress stuck detection for one item, default window 5 minutes.
    pub async fn acknowledge_stuck(&self, work_item_id: Uuid, duration: Option<Duration>) {
        let window = duration.unwrap_or(Duration::from_millis(self.config.ack_suppression_ms));
        let until = Utc::now()
            + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(5));
        self.suppressed.write().await.insert(work_item_id, until);
    }

    async fn is_suppressed(&self, work_item_id: Uuid) -> bool {
        let now = Utc::now();
        let mut suppressed = self.suppressed.write().await;
        match suppressed.get(&work_item_id) {
            Some(until) if *until > now => true,
            Some(_) => {
                suppressed.remove(&work_item_id);
                false
            }
            None => false,
        }
    }

    /// Sweep one goal for stuck states, creating an escalation per finding.
    ///
    /// Items that already have an open escalation are skipped, as are items
    /// inside an acknowledgement window.
    pub async fn sweep_goal(&self, goal_id: Uuid) -> DomainResult<Vec<Escalation>> {
        let items = self.repository.get_work_items_by_goal(goal_id).await?;
        let open = self.repository.get_open_escalations(Some(goal_id)).await?;
        let already_escalated: HashMap<Uuid, ()> =
            open.iter().map(|e| (e.work_item_id, ())).collect();

        let now = Utc::now();
        let mut created = Vec::new();

        for item in &items {
            if already_escalated.contains_key(&item.id) || self.is_suppressed(item.id).await {
                continue;
            }
            if let Some(finding) = self.check_item(item, &items, now).await? {
                created.push(self.create_escalation(finding).await?);
            }
        }

        // Cycles involve several items at once; raise one escalation per
        // cycle, anchored on its first member.
        for cycle in WorkItemManager::detect_cycles(&items) {
            let Some(&anchor) = cycle.first() else { continue };
            if already_escalated.contains_key(&anchor) {
                continue;
            }
            let escalation = Escalation::new(
                anchor,
                goal_id,
                EscalationKind::Stuck,
                EscalationSeverity::High,
                "Dependency cycle",
                format!("{} work items form a dependency cycle", cycle.len()),
            )
            .with_context("reason", serde_json::json!("dependency_cycle"))
            .with_context("cycle", serde_json::json!(cycle));
            created.push(self.create_escalation(escalation).await?);
        }

        Ok(created)
    }

    async fn check_item(
        &self,
        item: &WorkItem,
        all_items: &[WorkItem],
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Escalation>> {
        let age_ms = (now - item.updated_at).num_milliseconds().max(0) as u64;

        let reason = match item.status {
            WorkItemStatus::InProgress if age_ms > self.config.max_in_progress_duration_ms => {
                Some(("timeout_in_progress", EscalationSeverity::High))
            }
            WorkItemStatus::Ready if age_ms > self.config.max_ready_duration_ms => {
                Some(("timeout_ready", EscalationSeverity::Medium))
            }
            WorkItemStatus::Failed if item.retry_count >= item.max_retries => {
                Some(("max_retries_exceeded", EscalationSeverity::High))
            }
            _ => None,
        };

        if let Some((reason, severity)) = reason {
            return Ok(Some(self.stuck_escalation(item, reason, severity, None)));
        }

        // A dependency id that resolves to no work item can never complete.
        let missing = WorkItemManager::missing_dependencies(all_items);
        if let Some((_, dep)) = missing.iter().find(|(id, _)| *id == item.id) {
            return Ok(Some(self.stuck_escalation(
                item,
                "missing_dependency",
                EscalationSeverity::High,
                Some(serde_json::json!(dep.to_string())),
            )));
        }

        // Per-run checks: overlong running runs and repeated signatures.
        let runs = self.repository.get_runs_by_work_item(item.id).await?;
        for run in &runs {
            if run.status == RunStatus::Running {
                let run_age_ms = (now - run.created_at).num_milliseconds().max(0) as u64;
                if run_age_ms > self.config.max_run_duration_ms {
                    return Ok(Some(
                        self.stuck_escalation(item, "run_timeout", EscalationSeverity::High, None)
                            .with_run(run.id),
                    ));
                }
            }
        }
        if let Some(signature) = runs.last().and_then(|r| r.error_signature.clone()) {
            let streak = trailing_signature_streak(&runs, &signature);
            if streak >= self.config.max_same_error_retries as usize && streak > 1 {
                return Ok(Some(self.stuck_escalation(
                    item,
                    "repeated_same_error",
                    EscalationSeverity::High,
                    Some(serde_json::json!(signature)),
                )));
            }
        }

        Ok(None)
    }

    fn stuck_escalation(
        &self,
        item: &WorkItem,
        reason: &str,
        severity: EscalationSeverity,
        detail: Option<serde_json::Value>,
    ) -> Escalation {
        let mut escalation = Escalation::new(
            item.id,
            item.goal_id,
            EscalationKind::Stuck,
            severity,
            format!("Work item '{}' is stuck", item.title),
            format!("Stuck detector fired: {reason}"),
        )
        .with_context("reason", serde_json::json!(reason));
        if let Some(detail) = detail {
            escalation = escalation.with_context("detail", detail);
        }
        escalation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let config = StuckConfig::default();
        assert_eq!(config.ack_suppression_ms, 5 * 60 * 1000);
        assert_eq!(config.max_same_error_retries, 2);
    }
}
