//! Lane selection and concurrency accounting.
//!
//! Lanes partition dispatch capacity. The registry's counters are mutated
//! only from the scheduler's tick task, so it needs no interior locking;
//! the scheduler exposes read-only snapshots for stats.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::models::{EstimatedEffort, LaneId, LaneSnapshot, WorkItem};

/// Per-lane concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanesConfig {
    #[serde(default = "default_main")]
    pub main: usize,
    #[serde(default = "default_subagent")]
    pub subagent: usize,
    #[serde(default = "default_cron")]
    pub cron: usize,
    #[serde(default = "default_session")]
    pub session: usize,
}

fn default_main() -> usize {
    1
}
fn default_subagent() -> usize {
    3
}
fn default_cron() -> usize {
    1
}
fn default_session() -> usize {
    1
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            main: default_main(),
            subagent: default_subagent(),
            cron: default_cron(),
            session: default_session(),
        }
    }
}

impl LanesConfig {
    fn limit(&self, lane: LaneId) -> usize {
        match lane {
            LaneId::Main => self.main,
            LaneId::Subagent => self.subagent,
            LaneId::Cron => self.cron,
            LaneId::Session => self.session,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LaneState {
    max_concurrency: usize,
    active: usize,
    queued: usize,
}

/// Process-local lane counters.
///
/// Active counts are not persisted; on recovery they are rebuilt from the
/// repository's outstanding `running` runs.
#[derive(Debug)]
pub struct LaneRegistry {
    lanes: HashMap<LaneId, LaneState>,
}

impl LaneRegistry {
    pub fn new(config: &LanesConfig) -> Self {
        let lanes = LaneId::all()
            .into_iter()
            .map(|id| {
                (
                    id,
                    LaneState {
                        max_concurrency: config.limit(id),
                        active: 0,
                        queued: 0,
                    },
                )
            })
            .collect();
        Self { lanes }
    }

    pub fn with_defaults() -> Self {
        Self::new(&LanesConfig::default())
    }

    pub fn has_capacity(&self, lane: LaneId) -> bool {
        self.lanes
            .get(&lane)
            .is_some_and(|s| s.active < s.max_concurrency)
    }

    /// Reserve one slot. Returns false (and reserves nothing) at capacity.
    pub fn increment_active(&mut self, lane: LaneId) -> bool {
        match self.lanes.get_mut(&lane) {
            Some(s) if s.active < s.max_concurrency => {
                s.active += 1;
                true
            }
            _ => false,
        }
    }

    /// Release one slot.
    pub fn decrement_active(&mut self, lane: LaneId) {
        match self.lanes.get_mut(&lane) {
            Some(s) if s.active > 0 => s.active -= 1,
            _ => warn!(lane = lane.as_str(), "decrement on idle lane"),
        }
    }

    pub fn active_count(&self, lane: LaneId) -> usize {
        self.lanes.get(&lane).map_or(0, |s| s.active)
    }

    /// Record how many eligible items could not be dispatched this tick.
    pub fn set_queued(&mut self, lane: LaneId, queued: usize) {
        if let Some(s) = self.lanes.get_mut(&lane) {
            s.queued = queued;
        }
    }

    /// Rebuild an active count from recovered runs.
    pub fn restore_active(&mut self, lane: LaneId, active: usize) {
        if let Some(s) = self.lanes.get_mut(&lane) {
            s.active = active.min(s.max_concurrency);
        }
    }

    pub fn snapshot(&self) -> Vec<LaneSnapshot> {
        LaneId::all()
            .into_iter()
            .filter_map(|id| {
                self.lanes.get(&id).map(|s| LaneSnapshot {
                    id,
                    display_name: id.display_name().to_string(),
                    max_concurrency: s.max_concurrency,
                    active_count: s.active,
                    queued_count: s.queued,
                    available: s.active < s.max_concurrency,
                })
            })
            .collect()
    }
}

/// Pure lane-selection policy; first match wins.
pub struct LaneSelector;

impl LaneSelector {
    /// Choose a lane for a work item, falling back to `main` when the
    /// preferred non-main lane is full. The caller still checks capacity on
    /// the returned lane before reserving a slot.
    pub fn select(work_item: &WorkItem, registry: &LaneRegistry) -> LaneId {
        let preferred = Self::preferred(work_item);
        if preferred != LaneId::Main && !registry.has_capacity(preferred) {
            return LaneId::Main;
        }
        preferred
    }

    fn preferred(work_item: &WorkItem) -> LaneId {
        if let Some(lane) = work_item.context_str("lane").and_then(LaneId::from_str) {
            return lane;
        }
        if work_item.context_flag("interactive") {
            return LaneId::Session;
        }
        if work_item.estimated_effort == EstimatedEffort::XL {
            return LaneId::Session;
        }
        if work_item.context_flag("scheduled") {
            return LaneId::Cron;
        }
        if work_item.estimated_effort == EstimatedEffort::S && work_item.dependencies.is_empty() {
            return LaneId::Subagent;
        }
        LaneId::Main
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::WorkItemType;
    use uuid::Uuid;

    fn item() -> WorkItem {
        WorkItem::new(Uuid::new_v4(), "w", "", WorkItemType::Code)
    }

    #[test]
    fn test_default_lane_is_main() {
        let registry = LaneRegistry::with_defaults();
        assert_eq!(LaneSelector::select(&item(), &registry), LaneId::Main);
    }

    #[test]
    fn test_explicit_lane_override_wins() {
        let registry = LaneRegistry::with_defaults();
        let w = item()
            .with_effort(EstimatedEffort::XL)
            .with_context("lane", serde_json::json!("cron"));
        assert_eq!(LaneSelector::select(&w, &registry), LaneId::Cron);
    }

    #[test]
    fn test_interactive_goes_to_session() {
        let registry = LaneRegistry::with_defaults();
        let w = item().with_context("interactive", serde_json::json!(true));
        assert_eq!(LaneSelector::select(&w, &registry), LaneId::Session);
    }

    #[test]
    fn test_small_leaf_goes_to_subagent() {
        let registry = LaneRegistry::with_defaults();
        let w = item().with_effort(EstimatedEffort::S);
        assert_eq!(LaneSelector::select(&w, &registry), LaneId::Subagent);

        let with_dep = item()
            .with_effort(EstimatedEffort::S)
            .with_dependency(Uuid::new_v4());
        assert_eq!(LaneSelector::select(&with_dep, &registry), LaneId::Main);
    }

    #[test]
    fn test_full_subagent_falls_back_to_main() {
        let mut registry = LaneRegistry::with_defaults();
        for _ in 0..3 {
            assert!(registry.increment_active(LaneId::Subagent));
        }
        assert!(!registry.has_capacity(LaneId::Subagent));

        let w = item().with_effort(EstimatedEffort::S);
        assert_eq!(LaneSelector::select(&w, &registry), LaneId::Main);
    }

    #[test]
    fn test_capacity_accounting() {
        let mut registry = LaneRegistry::with_defaults();
        assert!(registry.increment_active(LaneId::Main));
        assert!(!registry.increment_active(LaneId::Main));
        registry.decrement_active(LaneId::Main);
        assert!(registry.has_capacity(LaneId::Main));
    }

    #[test]
    fn test_restore_clamps_to_limit() {
        let mut registry = LaneRegistry::with_defaults();
        registry.restore_active(LaneId::Subagent, 10);
        assert_eq!(registry.active_count(LaneId::Subagent), 3);
        assert!(!registry.has_capacity(LaneId::Subagent));
    }
}
