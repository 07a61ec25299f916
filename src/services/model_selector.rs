//! Effort-aware model-tier selection.
//!
//! Maps a work item to an abstract complexity tier. The LLM layer resolves
//! the tier to a concrete model id via its configured tier table, so this
//! selector never names a vendor model.

use serde::{Deserialize, Serialize};

use crate::domain::models::{EstimatedEffort, WorkItem, WorkItemType};

/// Abstract complexity class resolved to a concrete model by the LLM layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Simple,
    Medium,
    Complex,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "medium" => Some(Self::Medium),
            "complex" => Some(Self::Complex),
            _ => None,
        }
    }

    /// One tier up, saturating at `Complex`.
    pub fn escalated(self) -> Self {
        match self {
            Self::Simple => Self::Medium,
            Self::Medium | Self::Complex => Self::Complex,
        }
    }
}

/// Result of a tier selection, with the reason kept for logging.
#[derive(Debug, Clone)]
pub struct TierSelection {
    pub tier: ModelTier,
    pub reason: String,
    /// True when a retry bumped the tier above the heuristic baseline.
    pub escalated: bool,
}

/// Pure tier-selection policy.
pub struct ModelSelector;

impl ModelSelector {
    /// Select a tier for a work item.
    ///
    /// An explicit `context.model_tier` always wins. Otherwise effort maps
    /// S→simple, M→medium, L/XL→complex, analysis items are biased one tier
    /// up, and each retry escalates one further tier.
    pub fn select(work_item: &WorkItem, retry_attempt: u32) -> TierSelection {
        if let Some(tier) = work_item
            .context_str("model_tier")
            .and_then(ModelTier::from_str)
        {
            return TierSelection {
                tier,
                reason: "explicit context.model_tier".to_string(),
                escalated: false,
            };
        }

        let base = match work_item.estimated_effort {
            EstimatedEffort::S => ModelTier::Simple,
            EstimatedEffort::M => ModelTier::Medium,
            EstimatedEffort::L | EstimatedEffort::XL => ModelTier::Complex,
        };

        let biased = if work_item.item_type == WorkItemType::Analysis {
            base.escalated()
        } else {
            base
        };

        let mut tier = biased;
        for _ in 0..retry_attempt {
            tier = tier.escalated();
        }

        let escalated = tier != biased;
        let reason = if escalated {
            format!(
                "{} effort escalated to {} (retry #{retry_attempt})",
                work_item.estimated_effort.as_str(),
                tier.as_str()
            )
        } else {
            format!("{} effort", work_item.estimated_effort.as_str())
        };

        TierSelection {
            tier,
            reason,
            escalated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item(item_type: WorkItemType, effort: EstimatedEffort) -> WorkItem {
        WorkItem::new(Uuid::new_v4(), "w", "", item_type).with_effort(effort)
    }

    #[test]
    fn test_effort_mapping() {
        let s = ModelSelector::select(&item(WorkItemType::Code, EstimatedEffort::S), 0);
        assert_eq!(s.tier, ModelTier::Simple);
        let m = ModelSelector::select(&item(WorkItemType::Code, EstimatedEffort::M), 0);
        assert_eq!(m.tier, ModelTier::Medium);
        let l = ModelSelector::select(&item(WorkItemType::Code, EstimatedEffort::L), 0);
        assert_eq!(l.tier, ModelTier::Complex);
        let xl = ModelSelector::select(&item(WorkItemType::Code, EstimatedEffort::XL), 0);
        assert_eq!(xl.tier, ModelTier::Complex);
    }

    #[test]
    fn test_analysis_biases_up() {
        let s = ModelSelector::select(&item(WorkItemType::Analysis, EstimatedEffort::S), 0);
        assert_eq!(s.tier, ModelTier::Medium);
        let m = ModelSelector::select(&item(WorkItemType::Analysis, EstimatedEffort::M), 0);
        assert_eq!(m.tier, ModelTier::Complex);
    }

    #[test]
    fn test_explicit_tier_wins() {
        let w = item(WorkItemType::Analysis, EstimatedEffort::XL)
            .with_context("model_tier", serde_json::json!("simple"));
        let sel = ModelSelector::select(&w, 3);
        assert_eq!(sel.tier, ModelTier::Simple);
        assert!(!sel.escalated);
    }

    #[test]
    fn test_retry_escalation_saturates() {
        let sel = ModelSelector::select(&item(WorkItemType::Code, EstimatedEffort::S), 1);
        assert_eq!(sel.tier, ModelTier::Medium);
        assert!(sel.escalated);

        let sel = ModelSelector::select(&item(WorkItemType::Code, EstimatedEffort::S), 5);
        assert_eq!(sel.tier, ModelTier::Complex);
    }
}
