//! Execution engine port and run cancellation.
//!
//! The engine that actually performs a run (spawning agents, invoking tools)
//! is an external collaborator. The scheduler hands it one request per run
//! together with a cancellation token; the engine is expected to observe the
//! token and return an `Aborted` outcome promptly once it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Run, RunStatus, WorkItem};

/// A cheaply cloneable cancellation signal bound to one run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled. Safe against the
    /// notify-before-wait race: the waiter is registered before the flag is
    /// checked.
    pub async fn cancelled(&self) {
        let mut notified = std::pin::pin!(self.inner.notify.notified());
        loop {
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.inner.notify.notified());
        }
    }
}

/// One dispatch handed to the engine.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub work_item: WorkItem,
    pub run: Run,
    /// Concrete model id resolved from the work item's tier.
    pub model: String,
    pub cancel: CancelToken,
}

/// What the engine reports back for one run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Terminal status: success, failure, timeout, or aborted.
    pub status: RunStatus,
    pub tokens_used: u64,
    pub time_seconds: u64,
    pub cost_usd: f64,
    pub error_message: Option<String>,
    /// Stable signature for repeated-failure detection.
    pub error_signature: Option<String>,
    /// Ids of artifacts the engine registered with the repository.
    pub artifacts: Vec<String>,
}

impl ExecutionOutcome {
    /// A successful outcome with the given usage.
    pub fn success(tokens_used: u64, time_seconds: u64, cost_usd: f64) -> Self {
        Self {
            status: RunStatus::Success,
            tokens_used,
            time_seconds,
            cost_usd,
            error_message: None,
            error_signature: None,
            artifacts: Vec::new(),
        }
    }

    /// A failed outcome carrying an error message and signature.
    pub fn failure(message: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failure,
            tokens_used: 0,
            time_seconds: 0,
            cost_usd: 0.0,
            error_message: Some(message.into()),
            error_signature: Some(signature.into()),
            artifacts: Vec::new(),
        }
    }
}

/// External collaborator performing runs.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> DomainResult<ExecutionOutcome>;
}
