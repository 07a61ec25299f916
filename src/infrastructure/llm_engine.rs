//! LLM-backed execution engine.
//!
//! The production execution engine (agents, tools, sandboxes) is an external
//! collaborator. This default engine performs each run as a single
//! completion against the selected model, which is enough to drive the full
//! scheduling, verification, and budget pipeline end to end.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::RunStatus;
use crate::domain::ports::{ExecutionEngine, ExecutionOutcome, ExecutionRequest};
use crate::llm::{ChatMessage, CompletionOptions, ModelTarget, ProviderError, ProviderManager};

pub struct LlmExecutionEngine {
    provider: Arc<ProviderManager>,
}

impl LlmExecutionEngine {
    pub fn new(provider: Arc<ProviderManager>) -> Self {
        Self { provider }
    }

    fn outcome_for_error(error: &ProviderError, elapsed_secs: u64) -> ExecutionOutcome {
        let (status, signature) = match error {
            ProviderError::Timeout => (RunStatus::Timeout, "llm_timeout"),
            // Bad request shapes are not retryable; the retry handler
            // escalates these instead of spinning.
            ProviderError::InvalidRequest(_) => (RunStatus::Failure, "invalid_params"),
            ProviderError::InvalidApiKey | ProviderError::Forbidden(_) => {
                (RunStatus::Failure, "credential_error")
            }
            _ => (RunStatus::Failure, "llm_error"),
        };
        ExecutionOutcome {
            status,
            tokens_used: 0,
            time_seconds: elapsed_secs,
            cost_usd: 0.0,
            error_message: Some(error.to_string()),
            error_signature: Some(signature.to_string()),
            artifacts: Vec::new(),
        }
    }
}

#[async_trait]
impl ExecutionEngine for LlmExecutionEngine {
    async fn execute(&self, request: ExecutionRequest) -> DomainResult<ExecutionOutcome> {
        let started = Instant::now();
        let item = &request.work_item;

        let system = format!(
            "You are a {} agent executing one work item of a larger goal. \
             Produce the complete deliverable for the item; do not ask questions.",
            request.run.agent_type
        );
        let user = format!("# {}\n\n{}", item.title, item.description);
        let options = CompletionOptions {
            goal_id: Some(item.goal_id),
            work_item_id: Some(item.id),
            run_id: Some(request.run.id),
            ..CompletionOptions::default()
        };

        let target = ModelTarget::Model(request.model.clone());
        let result = tokio::select! {
            result = self.provider.complete(
                &target,
                vec![ChatMessage::system(system), ChatMessage::user(user)],
                options,
                None,
            ) => result,
            () = request.cancel.cancelled() => {
                return Ok(ExecutionOutcome {
                    status: RunStatus::Aborted,
                    tokens_used: 0,
                    time_seconds: started.elapsed().as_secs(),
                    cost_usd: 0.0,
                    error_message: Some("aborted".to_string()),
                    error_signature: None,
                    artifacts: Vec::new(),
                });
            }
        };

        let elapsed_secs = started.elapsed().as_secs();
        match result {
            Ok(response) => Ok(ExecutionOutcome {
                status: RunStatus::Success,
                tokens_used: response.tokens_used,
                time_seconds: elapsed_secs,
                cost_usd: self
                    .provider
                    .estimate_cost(&request.model, response.tokens_used),
                error_message: None,
                error_signature: None,
                artifacts: Vec::new(),
            }),
            Err(error) => Ok(Self::outcome_for_error(&error, elapsed_secs)),
        }
    }
}
