//! Quality-gate verification.
//!
//! Runs a work item's verification plan: deterministic command gates through
//! the command executor, review gates through the LLM reviewer. Gates run in
//! declared order; by default a required failure short-circuits the rest.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{GateType, QualityGate, Run, WorkItem};
use crate::domain::ports::{CommandExecutor, LlmReviewer};

/// Tunables for gate execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Per-gate cap for deterministic commands.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Per-gate cap for LLM reviews.
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    /// Keep executing gates after a required failure.
    #[serde(default)]
    pub continue_on_required_failure: bool,
}

fn default_command_timeout_ms() -> u64 {
    60_000
}
fn default_llm_timeout_ms() -> u64 {
    120_000
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            llm_timeout_ms: default_llm_timeout_ms(),
            continue_on_required_failure: false,
        }
    }
}

/// Result of one gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub gate_type: GateType,
    pub passed: bool,
    pub required: bool,
    pub duration_ms: u64,
    /// Captured command output, when deterministic.
    pub output: Option<String>,
    /// Reviewer reasoning, when llm_review.
    pub reasoning: Option<String>,
    pub error: Option<String>,
}

/// Outcome of one verification pass over a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub work_item_id: Uuid,
    pub run_id: Uuid,
    pub all_passed: bool,
    pub required_passed: bool,
    pub results: Vec<GateResult>,
    pub total_duration_ms: u64,
    pub summary: String,
}

/// Executes verification plans.
pub struct QualityGateRunner {
    commands: Arc<dyn CommandExecutor>,
    reviewer: Arc<dyn LlmReviewer>,
    config: VerificationConfig,
}

impl QualityGateRunner {
    pub fn new(
        commands: Arc<dyn CommandExecutor>,
        reviewer: Arc<dyn LlmReviewer>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            commands,
            reviewer,
            config,
        }
    }

    /// Run the item's verification plan against the given run.
    ///
    /// An absent or empty plan passes trivially.
    pub async fn run_verification(&self, work_item: &WorkItem, run: &Run) -> VerificationReport {
        let gates = work_item
            .verification_plan
            .as_ref()
            .map(|p| p.quality_gates.as_slice())
            .unwrap_or_default();

        if gates.is_empty() {
            return VerificationReport {
                work_item_id: work_item.id,
                run_id: run.id,
                all_passed: true,
                required_passed: true,
                results: Vec::new(),
                total_duration_ms: 0,
                summary: "no verification plan".to_string(),
            };
        }

        let mut results = Vec::with_capacity(gates.len());
        let mut required_failed = false;
        let mut total_duration_ms = 0u64;

        for gate in gates {
            if required_failed && !self.config.continue_on_required_failure {
                results.push(GateResult {
                    name: gate.name.clone(),
                    gate_type: gate.gate_type,
                    passed: false,
                    required: gate.required,
                    duration_ms: 0,
                    output: None,
                    reasoning: None,
                    error: Some("Skipped due to earlier required failure".to_string()),
                });
                continue;
            }

            let result = self.run_gate(gate, work_item).await;
            total_duration_ms += result.duration_ms;
            if gate.required && !result.passed {
                required_failed = true;
            }
            results.push(result);
        }

        let required_passed = results.iter().filter(|r| r.required).all(|r| r.passed);
        let all_passed = results.iter().all(|r| r.passed);
        let passed_count = results.iter().filter(|r| r.passed).count();
        let summary = format!(
            "{passed_count}/{} gates passed{}",
            results.len(),
            if required_passed { "" } else { " (required failure)" }
        );

        debug!(
            work_item_id = %work_item.id,
            run_id = %run.id,
            all_passed,
            required_passed,
            summary = summary.as_str(),
            "verification finished"
        );

        VerificationReport {
            work_item_id: work_item.id,
            run_id: run.id,
            all_passed,
            required_passed,
            results,
            total_duration_ms,
            summary,
        }
    }

    async fn run_gate(&self, gate: &QualityGate, work_item: &WorkItem) -> GateResult {
        match gate.gate_type {
            GateType::Deterministic => self.run_command_gate(gate).await,
            GateType::LlmReview => self.run_review_gate(gate, work_item).await,
        }
    }

    async fn run_command_gate(&self, gate: &QualityGate) -> GateResult {
        let mut result = GateResult {
            name: gate.name.clone(),
            gate_type: GateType::Deterministic,
            passed: false,
            required: gate.required,
            duration_ms: 0,
            output: None,
            reasoning: None,
            error: None,
        };

        let Some(command) = gate.command.as_deref() else {
            result.error = Some("gate has no command".to_string());
            return result;
        };

        let cap = Duration::from_millis(self.config.command_timeout_ms);
        let started = std::time::Instant::now();
        match timeout(cap, self.commands.execute(command, cap)).await {
            Ok(Ok(output)) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                if output.timed_out {
                    result.duration_ms = self.config.command_timeout_ms;
                    result.error = Some("timeout".to_string());
                } else {
                    result.passed = output.exit_code == Some(gate.expected_exit_code);
                    result.output = Some(truncate(&output.stdout, 4096));
                    if !result.passed {
                        result.error = Some(format!(
                            "exit code {:?}, expected {}",
                            output.exit_code, gate.expected_exit_code
                        ));
                    }
                }
            }
            Ok(Err(err)) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                result.error = Some(err.to_string());
            }
            Err(_) => {
                warn!(gate = gate.name.as_str(), "command gate timed out");
                result.duration_ms = self.config.command_timeout_ms;
                result.error = Some("timeout".to_string());
            }
        }
        result
    }

    async fn run_review_gate(&self, gate: &QualityGate, work_item: &WorkItem) -> GateResult {
        let mut result = GateResult {
            name: gate.name.clone(),
            gate_type: GateType::LlmReview,
            passed: false,
            required: gate.required,
            duration_ms: 0,
            output: None,
            reasoning: None,
            error: None,
        };

        let Some(prompt) = gate.review_prompt.as_deref() else {
            result.error = Some("gate has no review prompt".to_string());
            return result;
        };

        let context = format!("{}\n\n{}", work_item.title, work_item.description);
        let cap = Duration::from_millis(self.config.llm_timeout_ms);
        let started = std::time::Instant::now();
        match timeout(cap, self.reviewer.review(prompt, Some(&context))).await {
            Ok(Ok(verdict)) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                result.passed = verdict.passed;
                result.reasoning = Some(verdict.reasoning);
            }
            Ok(Err(err)) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                result.error = Some(err.to_string());
            }
            Err(_) => {
                warn!(gate = gate.name.as_str(), "review gate timed out");
                result.duration_ms = self.config.llm_timeout_ms;
                result.error = Some("timeout".to_string());
            }
        }
        result
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainResult;
    use crate::domain::models::{VerificationPlan, WorkItemType};
    use crate::domain::ports::{CommandOutput, ReviewVerdict};
    use async_trait::async_trait;

    struct FixedExecutor {
        exit_code: i32,
    }

    #[async_trait]
    impl CommandExecutor for FixedExecutor {
        async fn execute(&self, _command: &str, _timeout: Duration) -> DomainResult<CommandOutput> {
            Ok(CommandOutput {
                exit_code: Some(self.exit_code),
                stdout: "out".to_string(),
                stderr: String::new(),
                timed_out: false,
            })
        }
    }

    struct FixedReviewer {
        passed: bool,
    }

    #[async_trait]
    impl LlmReviewer for FixedReviewer {
        async fn review(&self, _prompt: &str, _context: Option<&str>) -> DomainResult<ReviewVerdict> {
            Ok(ReviewVerdict {
                passed: self.passed,
                reasoning: "because".to_string(),
            })
        }
    }

    fn runner(exit_code: i32, review_passes: bool) -> QualityGateRunner {
        QualityGateRunner::new(
            Arc::new(FixedExecutor { exit_code }),
            Arc::new(FixedReviewer {
                passed: review_passes,
            }),
            VerificationConfig::default(),
        )
    }

    fn item_with_gates(gates: Vec<QualityGate>) -> WorkItem {
        WorkItem::new(Uuid::new_v4(), "w", "", WorkItemType::Code).with_verification_plan(
            VerificationPlan {
                quality_gates: gates,
                acceptance_criteria: Vec::new(),
            },
        )
    }

    fn run_for(w: &WorkItem) -> Run {
        Run::new(w.id, w.goal_id, "coder", 1)
    }

    #[tokio::test]
    async fn test_empty_plan_passes_trivially() {
        let runner = runner(0, true);
        let w = WorkItem::new(Uuid::new_v4(), "w", "", WorkItemType::Code);
        let report = runner.run_verification(&w, &run_for(&w)).await;
        assert!(report.all_passed);
        assert!(report.required_passed);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_command_gate_passes_on_expected_exit_code() {
        let runner = runner(0, true);
        let w = item_with_gates(vec![QualityGate::deterministic("build", "true")]);
        let report = runner.run_verification(&w, &run_for(&w)).await;
        assert!(report.all_passed);
        assert!(report.required_passed);
    }

    #[tokio::test]
    async fn test_nonzero_expected_exit_code() {
        let runner = runner(3, true);
        let w = item_with_gates(vec![
            QualityGate::deterministic("expect-3", "exit 3").expecting_exit_code(3)
        ]);
        let report = runner.run_verification(&w, &run_for(&w)).await;
        assert!(report.all_passed);
    }

    #[tokio::test]
    async fn test_required_failure_skips_remaining_gates() {
        let runner = runner(1, true);
        let w = item_with_gates(vec![
            QualityGate::deterministic("first", "false"),
            QualityGate::deterministic("second", "true"),
        ]);
        let report = runner.run_verification(&w, &run_for(&w)).await;
        assert!(!report.required_passed);
        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.results[1].error.as_deref(),
            Some("Skipped due to earlier required failure")
        );
    }

    #[tokio::test]
    async fn test_optional_failure_does_not_block() {
        let runner = runner(1, true);
        let w = item_with_gates(vec![
            QualityGate::deterministic("lint", "false").optional(),
            QualityGate::llm_review("style", "ok?"),
        ]);
        let report = runner.run_verification(&w, &run_for(&w)).await;
        assert!(report.required_passed);
        assert!(!report.all_passed);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[1].passed);
    }

    #[tokio::test]
    async fn test_review_gate_verdict_flows_through() {
        let runner = runner(0, false);
        let w = item_with_gates(vec![QualityGate::llm_review("review", "good?")]);
        let report = runner.run_verification(&w, &run_for(&w)).await;
        assert!(!report.required_passed);
        assert_eq!(report.results[0].reasoning.as_deref(), Some("because"));
    }
}
