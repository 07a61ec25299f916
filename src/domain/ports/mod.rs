//! Ports: interfaces to external collaborators.

pub mod command_executor;
pub mod execution_engine;
pub mod llm_reviewer;
pub mod repository;

pub use command_executor::{CommandExecutor, CommandOutput};
pub use execution_engine::{CancelToken, ExecutionEngine, ExecutionOutcome, ExecutionRequest};
pub use llm_reviewer::{LlmReviewer, ReviewVerdict};
pub use repository::{GoalFilter, GoalPage, WorkOrderRepository};
