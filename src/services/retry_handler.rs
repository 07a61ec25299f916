//! Retry decisions for failed runs.
//!
//! Given a failed run and the item's run history, decide whether to retry
//! with backoff or to stop and escalate. The handler is pure: the scheduler
//! applies the decision (re-queueing the item or writing the escalation).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::models::{
    EscalationKind, EscalationSeverity, Run, WorkItem,
};

/// Tunables for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Consecutive identical failure signatures tolerated before escalating.
    #[serde(default = "default_max_same_error")]
    pub max_same_error_retries: u32,
    /// Base backoff; doubles per retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_same_error() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_same_error_retries: default_max_same_error(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// What to raise when retries stop.
#[derive(Debug, Clone)]
pub struct EscalationSpec {
    pub kind: EscalationKind,
    pub severity: EscalationSeverity,
    pub title: String,
    pub description: String,
    pub error_signature: Option<String>,
}

/// The handler's verdict for one failure.
#[derive(Debug, Clone)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Option<Duration>,
    pub escalation: Option<EscalationSpec>,
}

impl RetryDecision {
    fn retry_after(delay: Duration) -> Self {
        Self {
            retry: true,
            delay: Some(delay),
            escalation: None,
        }
    }

    fn escalate(spec: EscalationSpec) -> Self {
        Self {
            retry: false,
            delay: None,
            escalation: Some(spec),
        }
    }
}

/// Decides retry-vs-escalate for failed runs.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Decide what to do after `failed_run` failed.
    ///
    /// `runs` is the item's full run history including `failed_run`, ordered
    /// by `run_sequence`. Precedence: repeated identical failures beat the
    /// plain retry cap so the escalation carries the offending signature.
    pub fn decide(&self, work_item: &WorkItem, failed_run: &Run, runs: &[Run]) -> RetryDecision {
        // Non-recoverable failure classes never retry.
        if let Some(spec) = self.classify_non_recoverable(work_item, failed_run) {
            return RetryDecision::escalate(spec);
        }

        // Strictly more than `max_same_error_retries` consecutive identical
        // signatures means retrying is not changing the outcome.
        if let Some(signature) = failed_run.error_signature.as_deref() {
            let streak = trailing_signature_streak(runs, signature);
            if streak > self.config.max_same_error_retries as usize {
                return RetryDecision::escalate(EscalationSpec {
                    kind: EscalationKind::Stuck,
                    severity: EscalationSeverity::High,
                    title: format!("Work item '{}' repeats the same failure", work_item.title),
                    description: format!(
                        "{streak} consecutive runs failed with signature '{signature}'"
                    ),
                    error_signature: Some(signature.to_string()),
                });
            }
        }

        if work_item.retry_count + 1 > work_item.max_retries {
            return RetryDecision::escalate(EscalationSpec {
                kind: EscalationKind::Stuck,
                severity: EscalationSeverity::High,
                title: format!("Work item '{}' exhausted retries", work_item.title),
                description: format!(
                    "{} of {} retries used",
                    work_item.retry_count, work_item.max_retries
                ),
                error_signature: failed_run.error_signature.clone(),
            });
        }

        RetryDecision::retry_after(self.backoff(work_item.retry_count))
    }

    /// Exponential backoff: `base · 2^retry_count`, capped.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let ms = self
            .config
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(retry_count))
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn classify_non_recoverable(
        &self,
        work_item: &WorkItem,
        failed_run: &Run,
    ) -> Option<EscalationSpec> {
        let signature = failed_run.error_signature.as_deref()?;
        let kind = match signature {
            "validation_failed" => EscalationKind::ValidationFailed,
            "invalid_params" => EscalationKind::Ambiguous,
            _ => return None,
        };
        Some(EscalationSpec {
            kind,
            severity: EscalationSeverity::High,
            title: format!("Work item '{}' failed non-recoverably", work_item.title),
            description: failed_run
                .error_message
                .clone()
                .unwrap_or_else(|| signature.to_string()),
            error_signature: Some(signature.to_string()),
        })
    }
}

/// Length of the trailing streak of runs whose signature equals `signature`.
pub fn trailing_signature_streak(runs: &[Run], signature: &str) -> usize {
    runs.iter()
        .rev()
        .take_while(|r| r.error_signature.as_deref() == Some(signature))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{RunStatus, WorkItemType};
    use uuid::Uuid;

    fn item(max_retries: u32, retry_count: u32) -> WorkItem {
        let mut w = WorkItem::new(Uuid::new_v4(), "w", "", WorkItemType::Code)
            .with_max_retries(max_retries);
        w.retry_count = retry_count;
        w
    }

    fn failed_run(w: &WorkItem, sequence: u32, signature: &str) -> Run {
        let mut run = Run::new(w.id, w.goal_id, "coder", sequence);
        run.status = RunStatus::Failure;
        run.error_signature = Some(signature.to_string());
        run
    }

    #[test]
    fn test_first_failure_retries_with_base_backoff() {
        let handler = RetryHandler::with_defaults();
        let w = item(2, 0);
        let run = failed_run(&w, 1, "E");
        let decision = handler.decide(&w, &run, std::slice::from_ref(&run));
        assert!(decision.retry);
        assert_eq!(decision.delay, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let handler = RetryHandler::with_defaults();
        assert_eq!(handler.backoff(0), Duration::from_secs(2));
        assert_eq!(handler.backoff(1), Duration::from_secs(4));
        assert_eq!(handler.backoff(2), Duration::from_secs(8));
        assert_eq!(handler.backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn test_same_error_three_times_escalates_with_signature() {
        // maxRetries=2, maxSameErrorRetries=2: retries 1 and 2 are permitted,
        // the third identical failure escalates.
        let handler = RetryHandler::with_defaults();

        let w0 = item(2, 0);
        let r1 = failed_run(&w0, 1, "E");
        assert!(handler.decide(&w0, &r1, &[r1.clone()]).retry);

        let w1 = item(2, 1);
        let r2 = failed_run(&w1, 2, "E");
        assert!(handler.decide(&w1, &r2, &[r1.clone(), r2.clone()]).retry);

        let w2 = item(2, 2);
        let r3 = failed_run(&w2, 3, "E");
        let decision = handler.decide(&w2, &r3, &[r1, r2, r3.clone()]);
        assert!(!decision.retry);
        let spec = decision.escalation.unwrap();
        assert_eq!(spec.kind, EscalationKind::Stuck);
        assert_eq!(spec.severity, EscalationSeverity::High);
        assert_eq!(spec.error_signature.as_deref(), Some("E"));
    }

    #[test]
    fn test_differing_signatures_fall_to_retry_cap() {
        let handler = RetryHandler::with_defaults();
        let w = item(1, 1);
        let r1 = failed_run(&w, 1, "A");
        let r2 = failed_run(&w, 2, "B");
        let decision = handler.decide(&w, &r2, &[r1, r2.clone()]);
        assert!(!decision.retry);
        assert_eq!(decision.escalation.unwrap().kind, EscalationKind::Stuck);
    }

    #[test]
    fn test_validation_failed_never_retries() {
        let handler = RetryHandler::with_defaults();
        let w = item(5, 0);
        let run = failed_run(&w, 1, "validation_failed");
        let decision = handler.decide(&w, &run, std::slice::from_ref(&run));
        assert!(!decision.retry);
        assert_eq!(
            decision.escalation.unwrap().kind,
            EscalationKind::ValidationFailed
        );
    }

    #[test]
    fn test_invalid_params_escalates_as_ambiguous() {
        let handler = RetryHandler::with_defaults();
        let w = item(5, 0);
        let run = failed_run(&w, 1, "invalid_params");
        let decision = handler.decide(&w, &run, std::slice::from_ref(&run));
        assert_eq!(decision.escalation.unwrap().kind, EscalationKind::Ambiguous);
    }

    #[test]
    fn test_trailing_streak() {
        let w = item(3, 0);
        let runs = vec![
            failed_run(&w, 1, "A"),
            failed_run(&w, 2, "E"),
            failed_run(&w, 3, "E"),
        ];
        assert_eq!(trailing_signature_streak(&runs, "E"), 2);
        assert_eq!(trailing_signature_streak(&runs, "A"), 0);
    }
}
