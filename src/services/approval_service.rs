//! Approval workflow service.
//!
//! Thin layer over the repository's approval operations. Decisions are
//! recorded through the domain model's `decide`, so double-decisions surface
//! as conflicts instead of silently flipping state.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Approval, ApprovalStatus, EventPayload};
use crate::domain::ports::WorkOrderRepository;
use crate::services::event_bus::EventBus;

/// Create, list, and decide approval requests.
pub struct ApprovalService {
    repository: Arc<dyn WorkOrderRepository>,
    event_bus: Arc<EventBus>,
}

impl ApprovalService {
    pub fn new(repository: Arc<dyn WorkOrderRepository>, event_bus: Arc<EventBus>) -> Self {
        Self {
            repository,
            event_bus,
        }
    }

    /// Create a pending approval and emit `approval.requested`.
    pub async fn create(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> DomainResult<Approval> {
        let approval = Approval::new(title, description, requested_by);
        self.repository.create_approval(&approval).await?;
        self.event_bus.publish(EventPayload::ApprovalRequested {
            approval: approval.clone(),
        });
        Ok(approval)
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Approval> {
        self.repository
            .get_approval(id)
            .await?
            .ok_or(DomainError::ApprovalNotFound(id))
    }

    pub async fn list(&self, status: Option<ApprovalStatus>) -> DomainResult<Vec<Approval>> {
        self.repository.list_approvals(status).await
    }

    pub async fn pending(&self) -> DomainResult<Vec<Approval>> {
        self.list(Some(ApprovalStatus::Pending)).await
    }

    pub async fn grant(&self, id: Uuid, decided_by: impl Into<String>) -> DomainResult<Approval> {
        self.decide(id, ApprovalStatus::Granted, decided_by.into())
            .await
    }

    pub async fn deny(&self, id: Uuid, decided_by: impl Into<String>) -> DomainResult<Approval> {
        self.decide(id, ApprovalStatus::Denied, decided_by.into())
            .await
    }

    async fn decide(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decided_by: String,
    ) -> DomainResult<Approval> {
        let mut approval = self.get(id).await?;
        approval
            .decide(status, decided_by.clone())
            .map_err(|_| DomainError::Conflict {
                entity: "approval".to_string(),
                id: id.to_string(),
            })?;
        self.repository.update_approval(&approval).await?;

        let payload = match status {
            ApprovalStatus::Granted => EventPayload::ApprovalGranted {
                approval_id: id,
                decided_by,
            },
            _ => EventPayload::ApprovalDenied {
                approval_id: id,
                decided_by,
            },
        };
        self.event_bus.publish(payload);
        Ok(approval)
    }
}
