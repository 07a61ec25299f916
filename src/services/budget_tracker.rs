//! Per-goal budget accounting.
//!
//! Goals may cap tokens, wall-clock minutes, and dollar cost. The tracker
//! computes the warning level across every configured axis, predicts whether
//! a prospective spend would cross a limit, and records actual usage through
//! the repository so the counters stay monotone and durable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Goal;
use crate::domain::ports::WorkOrderRepository;

/// How close a goal is to a budget limit, worst case across axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetWarningLevel {
    None,
    /// At or above 70% of some limit.
    Warning,
    /// At or above 90% of some limit.
    Critical,
    /// At or above 100% of some limit.
    Exceeded,
}

/// Callback fired after usage is recorded, with the updated goal.
pub type UsageCallback = Arc<dyn Fn(&Goal) + Send + Sync>;

/// Budget queries and usage recording for goals.
pub struct BudgetTracker {
    repository: Arc<dyn WorkOrderRepository>,
    on_usage: Option<UsageCallback>,
}

impl BudgetTracker {
    pub fn new(repository: Arc<dyn WorkOrderRepository>) -> Self {
        Self {
            repository,
            on_usage: None,
        }
    }

    /// Register a goal-level callback invoked after each recorded usage.
    pub fn with_usage_callback(mut self, callback: UsageCallback) -> Self {
        self.on_usage = Some(callback);
        self
    }

    /// The worst warning level across the goal's configured axes.
    pub fn warning_level(goal: &Goal) -> BudgetWarningLevel {
        let mut level = BudgetWarningLevel::None;

        if let Some(limit) = goal.budgets.tokens {
            level = level.max(level_for_fraction(fraction(goal.spend.tokens as f64, limit as f64)));
        }
        if let Some(limit) = goal.budgets.time_minutes {
            level = level.max(level_for_fraction(fraction(
                goal.spend.time_minutes as f64,
                limit as f64,
            )));
        }
        if let Some(limit) = goal.budgets.cost_usd {
            level = level.max(level_for_fraction(fraction(goal.spend.cost_usd, limit)));
        }

        level
    }

    /// True when some configured axis is at or past its limit.
    pub fn is_exhausted(goal: &Goal) -> bool {
        Self::warning_level(goal) == BudgetWarningLevel::Exceeded
    }

    /// True if adding the deltas would cross any configured limit.
    pub fn will_exceed_budget(goal: &Goal, add_tokens: u64, add_cost_usd: f64) -> bool {
        if let Some(limit) = goal.budgets.tokens {
            if goal.spend.tokens.saturating_add(add_tokens) > limit {
                return true;
            }
        }
        if let Some(limit) = goal.budgets.cost_usd {
            if goal.spend.cost_usd + add_cost_usd > limit {
                return true;
            }
        }
        false
    }

    /// Record actual usage on a goal and fire the registered callback.
    pub async fn record_usage(
        &self,
        goal_id: Uuid,
        tokens: u64,
        time_minutes: u64,
        cost_usd: f64,
    ) -> DomainResult<Goal> {
        let goal = self
            .repository
            .add_goal_spend(goal_id, tokens, time_minutes, cost_usd)
            .await?;
        debug!(
            goal_id = %goal_id,
            tokens, time_minutes, cost_usd,
            level = ?Self::warning_level(&goal),
            "usage recorded"
        );
        if let Some(callback) = &self.on_usage {
            callback(&goal);
        }
        Ok(goal)
    }
}

fn fraction(spent: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        // Zero limit with any spend is exhausted by definition.
        if spent > 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        spent / limit
    }
}

fn level_for_fraction(fraction: f64) -> BudgetWarningLevel {
    if fraction >= 1.0 {
        BudgetWarningLevel::Exceeded
    } else if fraction >= 0.9 {
        BudgetWarningLevel::Critical
    } else if fraction >= 0.7 {
        BudgetWarningLevel::Warning
    } else {
        BudgetWarningLevel::None
    }
}
