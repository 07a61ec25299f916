//! Domain errors for the Foreman orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Foreman system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Goal not found: {0}")]
    GoalNotFound(Uuid),

    #[error("Work item not found: {0}")]
    WorkItemNotFound(Uuid),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(Uuid),

    #[error("Approval not found: {0}")]
    ApprovalNotFound(Uuid),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Invalid state transition for {entity} from {from} to {to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Dependency cycle detected involving work item: {0}")]
    DependencyCycle(Uuid),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflict: {entity} {id} is in a terminal or concurrent state")]
    Conflict { entity: String, id: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
