//! Scheduler core.
//!
//! A single cooperative tick loop drives every active goal toward a terminal
//! state. Each tick drains the completion queue, refreshes the active goal
//! set, dispatches ready work items into lanes, and periodically sweeps for
//! stuck states. Engine dispatches are fire-and-forget: their completions
//! re-enter through an unbounded channel drained at the start of the next
//! tick, so the tick's critical section stays finite.
//!
//! All durable state lives in the repository; the scheduler only keeps
//! process-local lane counters, the in-flight run table, and retry backoff
//! deadlines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Escalation, EventPayload, Goal, GoalStatus, LaneId, LaneSnapshot, Run, RunStatus, WorkItem,
    WorkItemStatus,
};
use crate::domain::ports::{
    CancelToken, ExecutionEngine, ExecutionOutcome, ExecutionRequest, GoalFilter,
    WorkOrderRepository,
};
use crate::services::budget_tracker::BudgetTracker;
use crate::services::escalation_handler::EscalationHandler;
use crate::services::event_bus::EventBus;
use crate::services::lane_selector::{LaneRegistry, LaneSelector, LanesConfig};
use crate::services::model_selector::{ModelSelector, ModelTier};
use crate::services::quality_gate_runner::QualityGateRunner;
use crate::services::retry_handler::RetryHandler;
use crate::services::work_item_manager::WorkItemManager;

/// Resolves an abstract tier to a concrete model id (implemented by the LLM
/// provider layer; stubbed in tests).
pub trait TierResolver: Send + Sync {
    fn model_for_tier(&self, tier: ModelTier) -> String;
}

/// Scheduler tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_concurrent_goals")]
    pub max_concurrent_goals: usize,
    /// Start the tick loop at process start instead of on first submit.
    #[serde(default)]
    pub auto_start: bool,
    /// Run the stuck sweep every N ticks.
    #[serde(default = "default_sweep_every")]
    pub stuck_sweep_every_ticks: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_max_concurrent_goals() -> usize {
    5
}
fn default_sweep_every() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrent_goals: default_max_concurrent_goals(),
            auto_start: false,
            stuck_sweep_every_ticks: default_sweep_every(),
        }
    }
}

/// Counters surfaced through `system.stats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub dispatched_runs: u64,
    pub completed_runs: u64,
    pub aborted_runs: u64,
    pub escalations_raised: u64,
}

/// One engine completion re-entering the scheduler.
#[derive(Debug)]
struct RunCompletion {
    goal_id: Uuid,
    work_item_id: Uuid,
    run_id: Uuid,
    lane: LaneId,
    outcome: ExecutionOutcome,
}

#[derive(Debug)]
struct InFlight {
    run_id: Uuid,
    lane: LaneId,
    cancel: CancelToken,
}

struct Inner {
    lanes: LaneRegistry,
    in_flight: HashMap<Uuid, InFlight>,
    /// Earliest next dispatch per work item, from retry backoff.
    retry_not_before: HashMap<Uuid, DateTime<Utc>>,
    stats: SchedulerStats,
}

/// The scheduler: owns the tick loop and the dispatch bookkeeping.
pub struct SchedulerCore {
    /// Self-handle for spawning the tick loop from `&self`.
    me: Weak<SchedulerCore>,
    config: SchedulerConfig,
    repository: Arc<dyn WorkOrderRepository>,
    engine: Arc<dyn ExecutionEngine>,
    event_bus: Arc<EventBus>,
    tier_resolver: Arc<dyn TierResolver>,
    work_items: WorkItemManager,
    budget: BudgetTracker,
    retry: RetryHandler,
    escalations: Arc<EscalationHandler>,
    gates: Arc<QualityGateRunner>,
    inner: Mutex<Inner>,
    completions_tx: mpsc::UnboundedSender<RunCompletion>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<RunCompletion>>,
    running: AtomicBool,
    loop_spawned: AtomicBool,
}

impl SchedulerCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        lanes: LanesConfig,
        repository: Arc<dyn WorkOrderRepository>,
        engine: Arc<dyn ExecutionEngine>,
        event_bus: Arc<EventBus>,
        tier_resolver: Arc<dyn TierResolver>,
        retry: RetryHandler,
        escalations: Arc<EscalationHandler>,
        gates: Arc<QualityGateRunner>,
    ) -> Arc<Self> {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            repository: repository.clone(),
            engine,
            event_bus,
            tier_resolver,
            work_items: WorkItemManager::new(repository.clone()),
            budget: BudgetTracker::new(repository),
            retry,
            escalations,
            gates,
            inner: Mutex::new(Inner {
                lanes: LaneRegistry::new(&lanes),
                in_flight: HashMap::new(),
                retry_not_before: HashMap::new(),
                stats: SchedulerStats::default(),
            }),
            completions_tx,
            completions_rx: Mutex::new(completions_rx),
            running: AtomicBool::new(false),
            loop_spawned: AtomicBool::new(false),
        })
    }

    /// Spawn the tick loop. Idempotent.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        if self.loop_spawned.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(scheduler) = self.me.upgrade() else {
            return;
        };
        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            "scheduler starting"
        );
        tokio::spawn(async move {
            let tick_duration = Duration::from_millis(scheduler.config.tick_interval_ms.max(1));
            let mut interval = tokio::time::interval(tick_duration);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !scheduler.running.load(Ordering::SeqCst) {
                    break;
                }
                let started = std::time::Instant::now();
                scheduler.tick().await;
                let elapsed = started.elapsed();
                if elapsed > tick_duration {
                    // Overrunning ticks skip the missed slots instead of queueing.
                    let skipped = (elapsed.as_millis() / tick_duration.as_millis().max(1)) as u64;
                    let mut inner = scheduler.inner.lock().await;
                    inner.stats.skipped_ticks += skipped.max(1);
                }
            }
            info!("scheduler stopped");
        });
    }

    /// Stop the tick loop after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start lazily unless `auto_start` already started us.
    pub fn ensure_started(&self) {
        if !self.running.load(Ordering::SeqCst) {
            self.start();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.inner.lock().await.stats
    }

    pub async fn lane_snapshots(&self) -> Vec<LaneSnapshot> {
        self.inner.lock().await.lanes.snapshot()
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// One scheduler tick. Public for deterministic driving in tests.
    pub async fn tick(&self) {
        let tick_number = {
            let mut inner = self.inner.lock().await;
            inner.stats.ticks += 1;
            inner.stats.ticks
        };

        // 1. Completions first, so freed lane slots are visible below.
        let completions = self.drain_completions().await;
        for completion in completions {
            if let Err(err) = self.handle_completion(completion).await {
                error!(error = %err, "completion handling failed");
            }
        }

        // 2. Active goal set.
        let goals = match self.refresh_active_goals().await {
            Ok(goals) => goals,
            Err(err) => {
                error!(error = %err, "goal refresh failed");
                return;
            }
        };

        // 3. Per goal, in priority order.
        for goal in &goals {
            if let Err(err) = self.drive_goal(goal).await {
                error!(goal_id = %goal.id, error = %err, "goal drive failed");
            }
        }

        // 4. Periodic stuck sweep.
        if self.config.stuck_sweep_every_ticks > 0
            && tick_number % self.config.stuck_sweep_every_ticks == 0
        {
            for goal in &goals {
                match self.escalations.sweep_goal(goal.id).await {
                    Ok(created) if !created.is_empty() => {
                        let mut inner = self.inner.lock().await;
                        inner.stats.escalations_raised += created.len() as u64;
                        drop(inner);
                        if created.iter().any(Escalation::is_blocking) {
                            self.block_goal(goal.id, "stuck escalation").await;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!(goal_id = %goal.id, error = %err, "stuck sweep failed"),
                }
            }
        }
    }

    async fn drain_completions(&self) -> Vec<RunCompletion> {
        let mut rx = self.completions_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(completion) = rx.try_recv() {
            drained.push(completion);
        }
        drained
    }

    /// Promote queued goals into the active window and reactivate blocked
    /// goals whose blockers cleared. Returns active goals in dispatch order.
    async fn refresh_active_goals(&self) -> DomainResult<Vec<Goal>> {
        let page = self.repository.list_goals(GoalFilter::default()).await?;
        let mut goals = page.goals;
        goals.sort_by(goal_order);

        let mut active: Vec<Goal> = Vec::new();
        for goal in &goals {
            match goal.status {
                GoalStatus::Active => active.push(goal.clone()),
                GoalStatus::Blocked => {
                    if self.can_unblock(goal).await? {
                        let unblocked = self
                            .repository
                            .update_goal_status(goal.id, GoalStatus::Active)
                            .await?;
                        self.event_bus.publish(EventPayload::GoalUpdated {
                            goal_id: goal.id,
                            status: GoalStatus::Active,
                        });
                        active.push(unblocked);
                    }
                }
                _ => {}
            }
        }

        for goal in &goals {
            if active.len() >= self.config.max_concurrent_goals {
                break;
            }
            if goal.status == GoalStatus::Queued {
                let activated = self
                    .repository
                    .update_goal_status(goal.id, GoalStatus::Active)
                    .await?;
                self.event_bus.publish(EventPayload::GoalUpdated {
                    goal_id: goal.id,
                    status: GoalStatus::Active,
                });
                active.push(activated);
            }
        }

        active.sort_by(goal_order);
        active.truncate(self.config.max_concurrent_goals);
        Ok(active)
    }

    async fn can_unblock(&self, goal: &Goal) -> DomainResult<bool> {
        Ok(!self.escalations.has_blocking_escalations(goal.id).await?
            && !BudgetTracker::is_exhausted(goal))
    }

    async fn drive_goal(&self, goal: &Goal) -> DomainResult<()> {
        // a. Blocking escalations stop the goal cold.
        if self.escalations.has_blocking_escalations(goal.id).await? {
            self.block_goal(goal.id, "blocking escalation").await;
            return Ok(());
        }

        // b. Exhausted budget on any axis blocks too.
        if BudgetTracker::is_exhausted(goal) {
            let level = BudgetTracker::warning_level(goal);
            self.block_goal(goal.id, &format!("budget exhausted ({level:?})"))
                .await;
            return Ok(());
        }

        // c/d. Dispatch the ready set in priority order.
        let ready = self.work_items.ready_work_items(goal.id).await?;
        let now = Utc::now();
        let mut held_back: HashMap<LaneId, usize> = HashMap::new();

        for item in ready {
            {
                let inner = self.inner.lock().await;
                if inner.in_flight.contains_key(&item.id) {
                    continue;
                }
                if let Some(not_before) = inner.retry_not_before.get(&item.id) {
                    if *not_before > now {
                        continue;
                    }
                }
            }

            let lane = {
                let inner = self.inner.lock().await;
                LaneSelector::select(&item, &inner.lanes)
            };

            let reserved = {
                let mut inner = self.inner.lock().await;
                inner.lanes.increment_active(lane)
            };
            if !reserved {
                *held_back.entry(lane).or_default() += 1;
                continue;
            }

            if let Err(err) = self.dispatch(goal, item.clone(), lane).await {
                warn!(work_item_id = %item.id, error = %err, "dispatch failed");
                let mut inner = self.inner.lock().await;
                inner.lanes.decrement_active(lane);
            }
        }

        {
            let mut inner = self.inner.lock().await;
            for lane in LaneId::all() {
                inner
                    .lanes
                    .set_queued(lane, held_back.get(&lane).copied().unwrap_or(0));
            }
        }

        // e. Completion check: every item done finishes the goal.
        if self.work_items.all_done(goal.id).await? {
            self.complete_goal(goal.id).await?;
        }

        Ok(())
    }

    async fn dispatch(&self, goal: &Goal, item: WorkItem, lane: LaneId) -> DomainResult<()> {
        let selection = ModelSelector::select(&item, item.retry_count);
        let model = self.tier_resolver.model_for_tier(selection.tier);

        let item = self
            .repository
            .update_work_item_status(item.id, WorkItemStatus::InProgress)
            .await?;
        self.event_bus.publish(EventPayload::WorkItemUpdated {
            work_item_id: item.id,
            goal_id: goal.id,
            status: WorkItemStatus::InProgress,
        });

        let previous_runs = self.repository.get_runs_by_work_item(item.id).await?;
        let sequence = previous_runs.last().map_or(0, |r| r.run_sequence) + 1;
        let agent_type = item
            .assigned_agent
            .clone()
            .unwrap_or_else(|| item.item_type.as_str().to_string());
        let run = Run::new(item.id, goal.id, agent_type, sequence);
        self.repository.create_run(&run).await?;

        let cancel = CancelToken::new();
        {
            let mut inner = self.inner.lock().await;
            inner.in_flight.insert(
                item.id,
                InFlight {
                    run_id: run.id,
                    lane,
                    cancel: cancel.clone(),
                },
            );
            inner.retry_not_before.remove(&item.id);
            inner.stats.dispatched_runs += 1;
        }

        debug!(
            work_item_id = %item.id,
            run_id = %run.id,
            sequence,
            lane = lane.as_str(),
            tier = selection.tier.as_str(),
            model = model.as_str(),
            reason = selection.reason.as_str(),
            "dispatching run"
        );
        self.event_bus.publish(EventPayload::RunStarted {
            run_id: run.id,
            work_item_id: item.id,
            goal_id: goal.id,
            run_sequence: sequence,
            lane: lane.as_str().to_string(),
            model: model.clone(),
        });

        let engine = Arc::clone(&self.engine);
        let tx = self.completions_tx.clone();
        let goal_id = goal.id;
        let work_item_id = item.id;
        let run_id = run.id;
        let request = ExecutionRequest {
            work_item: item,
            run,
            model,
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = engine.execute(request) => match result {
                    Ok(outcome) => outcome,
                    Err(err) => ExecutionOutcome {
                        status: RunStatus::Failure,
                        tokens_used: 0,
                        time_seconds: 0,
                        cost_usd: 0.0,
                        error_message: Some(err.to_string()),
                        error_signature: Some("engine_error".to_string()),
                        artifacts: Vec::new(),
                    },
                },
                // The engine is expected to honor the token itself; this arm
                // guarantees the slot is released even if it does not.
                () = cancel.cancelled() => ExecutionOutcome {
                    status: RunStatus::Aborted,
                    tokens_used: 0,
                    time_seconds: 0,
                    cost_usd: 0.0,
                    error_message: Some("aborted".to_string()),
                    error_signature: None,
                    artifacts: Vec::new(),
                },
            };
            let _ = tx.send(RunCompletion {
                goal_id,
                work_item_id,
                run_id,
                lane,
                outcome,
            });
        });

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Completion handling
    // -------------------------------------------------------------------------

    async fn handle_completion(&self, completion: RunCompletion) -> DomainResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.in_flight.remove(&completion.work_item_id);
            inner.lanes.decrement_active(completion.lane);
            inner.stats.completed_runs += 1;
            if completion.outcome.status == RunStatus::Aborted {
                inner.stats.aborted_runs += 1;
            }
        }

        let Some(mut run) = self.repository.get_run(completion.run_id).await? else {
            return Err(DomainError::RunNotFound(completion.run_id));
        };
        run.finish(completion.outcome.status);
        run.tokens_used = completion.outcome.tokens_used;
        run.time_seconds = completion.outcome.time_seconds;
        run.cost_usd = completion.outcome.cost_usd;
        run.error_message = completion.outcome.error_message.clone();
        run.error_signature = completion.outcome.error_signature.clone();
        run.artifacts = completion.outcome.artifacts.clone();
        self.repository.update_run(&run).await?;

        self.event_bus.publish(EventPayload::RunCompleted {
            run_id: run.id,
            work_item_id: run.work_item_id,
            goal_id: run.goal_id,
            status: run.status,
            tokens_used: run.tokens_used,
            cost_usd: run.cost_usd,
        });

        let Some(item) = self.repository.get_work_item(completion.work_item_id).await? else {
            return Err(DomainError::WorkItemNotFound(completion.work_item_id));
        };

        match completion.outcome.status {
            RunStatus::Success => self.handle_success(&completion, item, run).await,
            RunStatus::Failure | RunStatus::Timeout => self.handle_failure(item, run).await,
            RunStatus::Aborted => {
                // Cancellation flows already transitioned the item.
                Ok(())
            }
            RunStatus::Running => Ok(()),
        }
    }

    async fn handle_success(
        &self,
        completion: &RunCompletion,
        item: WorkItem,
        run: Run,
    ) -> DomainResult<()> {
        if item.status != WorkItemStatus::InProgress {
            // Cancelled between completion and handling.
            return Ok(());
        }

        let mut item = self
            .repository
            .update_work_item_status(item.id, WorkItemStatus::Verify)
            .await?;
        self.event_bus.publish(EventPayload::WorkItemUpdated {
            work_item_id: item.id,
            goal_id: item.goal_id,
            status: WorkItemStatus::Verify,
        });

        let report = self.gates.run_verification(&item, &run).await;

        if report.required_passed {
            item.verification_status = crate::domain::models::VerificationStatus::Passed;
            self.repository.update_work_item(&item).await?;
            self.repository
                .update_work_item_status(item.id, WorkItemStatus::Done)
                .await?;

            self.budget
                .record_usage(
                    completion.goal_id,
                    run.tokens_used,
                    run.time_seconds.div_ceil(60),
                    run.cost_usd,
                )
                .await?;

            self.event_bus.publish(EventPayload::WorkItemCompleted {
                work_item_id: item.id,
                goal_id: item.goal_id,
            });

            if self.work_items.all_done(item.goal_id).await? {
                self.complete_goal(item.goal_id).await?;
            }
            return Ok(());
        }

        // A required gate failed: treat exactly like a run failure.
        item.verification_status = crate::domain::models::VerificationStatus::Failed;
        self.repository.update_work_item(&item).await?;

        let failed_gate = report
            .results
            .iter()
            .find(|r| r.required && !r.passed)
            .map_or("unknown", |r| r.name.as_str());
        let mut synthetic = run.clone();
        synthetic.status = RunStatus::Failure;
        synthetic.error_message = Some(format!("required quality gate '{failed_gate}' failed"));
        synthetic.error_signature = Some(format!("quality_gate:{failed_gate}"));
        // Persist the signature so repeated-failure detection sees it.
        self.repository.update_run(&synthetic).await?;

        self.apply_retry_decision(item, synthetic).await
    }

    async fn handle_failure(&self, item: WorkItem, run: Run) -> DomainResult<()> {
        if item.status != WorkItemStatus::InProgress {
            return Ok(());
        }
        self.apply_retry_decision(item, run).await
    }

    /// Apply the retry handler's verdict for a failed (or gate-failed) run.
    async fn apply_retry_decision(&self, mut item: WorkItem, failed_run: Run) -> DomainResult<()> {
        let runs = self.repository.get_runs_by_work_item(item.id).await?;
        let decision = self.retry.decide(&item, &failed_run, &runs);

        if decision.retry {
            item.retry_count += 1;
            self.repository.update_work_item(&item).await?;
            self.repository
                .update_work_item_status(item.id, WorkItemStatus::Ready)
                .await?;
            if let Some(delay) = decision.delay {
                let not_before = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                let mut inner = self.inner.lock().await;
                inner.retry_not_before.insert(item.id, not_before);
            }
            debug!(
                work_item_id = %item.id,
                retry_count = item.retry_count,
                delay_ms = decision.delay.map_or(0, |d| d.as_millis() as u64),
                "retrying work item"
            );
            self.event_bus.publish(EventPayload::WorkItemUpdated {
                work_item_id: item.id,
                goal_id: item.goal_id,
                status: WorkItemStatus::Ready,
            });
            return Ok(());
        }

        // No retry: fail the item and raise the escalation.
        self.repository
            .update_work_item_status(item.id, WorkItemStatus::Failed)
            .await?;
        self.event_bus.publish(EventPayload::WorkItemFailed {
            work_item_id: item.id,
            goal_id: item.goal_id,
            error: failed_run
                .error_message
                .clone()
                .unwrap_or_else(|| "run failed".to_string()),
        });

        if let Some(spec) = decision.escalation {
            let mut escalation = Escalation::new(
                item.id,
                item.goal_id,
                spec.kind,
                spec.severity,
                spec.title,
                spec.description,
            )
            .with_run(failed_run.id);
            if let Some(signature) = spec.error_signature {
                escalation = escalation.with_context("error_signature", serde_json::json!(signature));
            }
            let escalation = self.escalations.create_escalation(escalation).await?;
            {
                let mut inner = self.inner.lock().await;
                inner.stats.escalations_raised += 1;
            }
            if escalation.is_blocking() {
                self.block_goal(item.goal_id, "work item escalated").await;
            }
        }
        Ok(())
    }

    async fn complete_goal(&self, goal_id: Uuid) -> DomainResult<()> {
        match self
            .repository
            .update_goal_status(goal_id, GoalStatus::Completed)
            .await
        {
            Ok(_) => {
                info!(goal_id = %goal_id, "goal completed");
                self.event_bus
                    .publish(EventPayload::GoalCompleted { goal_id });
                Ok(())
            }
            // Already terminal: another path won the race.
            Err(DomainError::InvalidStateTransition { .. } | DomainError::Conflict { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn block_goal(&self, goal_id: Uuid, reason: &str) {
        match self
            .repository
            .update_goal_status(goal_id, GoalStatus::Blocked)
            .await
        {
            Ok(_) => {
                warn!(goal_id = %goal_id, reason, "goal blocked");
                self.event_bus.publish(EventPayload::GoalBlocked {
                    goal_id,
                    reason: reason.to_string(),
                });
            }
            Err(DomainError::InvalidStateTransition { .. } | DomainError::Conflict { .. }) => {}
            Err(err) => error!(goal_id = %goal_id, error = %err, "failed to block goal"),
        }
    }

    // -------------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------------

    /// Cancel a goal: abort in-flight runs, cancel every non-terminal work
    /// item, and mark the goal cancelled. Returns a conflict for goals that
    /// are already terminal.
    pub async fn cancel_goal(&self, goal_id: Uuid) -> DomainResult<Goal> {
        let Some(goal) = self.repository.get_goal(goal_id).await? else {
            return Err(DomainError::GoalNotFound(goal_id));
        };
        if goal.is_terminal() {
            return Err(DomainError::Conflict {
                entity: "goal".to_string(),
                id: goal_id.to_string(),
            });
        }

        let goal = self
            .repository
            .update_goal_status(goal_id, GoalStatus::Cancelled)
            .await?;

        // Flat worklist over the goal's items; no recursion.
        let items = self.repository.get_work_items_by_goal(goal_id).await?;
        for item in items {
            if item.is_terminal() {
                continue;
            }
            self.abort_in_flight(item.id).await;
            self.repository
                .update_work_item_status(item.id, WorkItemStatus::Cancelled)
                .await?;
            self.event_bus.publish(EventPayload::WorkItemUpdated {
                work_item_id: item.id,
                goal_id,
                status: WorkItemStatus::Cancelled,
            });
        }

        info!(goal_id = %goal_id, "goal cancelled");
        self.event_bus.publish(EventPayload::GoalCancelled { goal_id });
        Ok(goal)
    }

    /// Cancel a single work item, aborting its run only.
    pub async fn cancel_work_item(&self, work_item_id: Uuid) -> DomainResult<WorkItem> {
        let Some(item) = self.repository.get_work_item(work_item_id).await? else {
            return Err(DomainError::WorkItemNotFound(work_item_id));
        };
        if item.is_terminal() {
            return Err(DomainError::Conflict {
                entity: "work_item".to_string(),
                id: work_item_id.to_string(),
            });
        }
        self.abort_in_flight(work_item_id).await;
        let item = self
            .repository
            .update_work_item_status(work_item_id, WorkItemStatus::Cancelled)
            .await?;
        self.event_bus.publish(EventPayload::WorkItemUpdated {
            work_item_id,
            goal_id: item.goal_id,
            status: WorkItemStatus::Cancelled,
        });
        Ok(item)
    }

    async fn abort_in_flight(&self, work_item_id: Uuid) {
        let inner = self.inner.lock().await;
        if let Some(in_flight) = inner.in_flight.get(&work_item_id) {
            debug!(work_item_id = %work_item_id, run_id = %in_flight.run_id, "aborting run");
            in_flight.cancel.cancel();
        }
    }

    /// Rebuild lane counters from outstanding runs after a restart.
    pub async fn restore_lanes_from_runs(&self) -> DomainResult<()> {
        let page = self.repository.list_goals(GoalFilter::default()).await?;
        let mut counts: HashMap<LaneId, usize> = HashMap::new();
        for goal in &page.goals {
            let items = self.repository.get_work_items_by_goal(goal.id).await?;
            let inner = self.inner.lock().await;
            for item in items
                .iter()
                .filter(|w| w.status == WorkItemStatus::InProgress)
            {
                let lane = LaneSelector::select(item, &inner.lanes);
                *counts.entry(lane).or_default() += 1;
            }
        }
        let mut inner = self.inner.lock().await;
        for (lane, active) in counts {
            inner.lanes.restore_active(lane, active);
        }
        Ok(())
    }
}

/// Goal dispatch order: `(priority, created_at, id)`.
fn goal_order(a: &Goal, b: &Goal) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_order_uses_priority_then_age() {
        let mut urgent = Goal::new("urgent", "");
        urgent.priority = -1;
        let relaxed = Goal::new("relaxed", "");
        let mut goals = vec![relaxed.clone(), urgent.clone()];
        goals.sort_by(goal_order);
        assert_eq!(goals[0].id, urgent.id);
    }

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.max_concurrent_goals, 5);
        assert!(!config.auto_start);
        assert_eq!(config.stuck_sweep_every_ticks, 10);
    }
}
