//! Work-item readiness and dependency-graph analysis.
//!
//! The manager owns no state: it reads through the repository, promotes
//! queued items whose dependencies are all done, and orders the ready set by
//! `(priority, created_at, id)` — the same triple the scheduler uses to order
//! goals, so dispatch order is deterministic end to end.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{WorkItem, WorkItemStatus};
use crate::domain::ports::WorkOrderRepository;

/// Stateless facade over the repository for readiness queries.
pub struct WorkItemManager {
    repository: Arc<dyn WorkOrderRepository>,
}

impl WorkItemManager {
    pub fn new(repository: Arc<dyn WorkOrderRepository>) -> Self {
        Self { repository }
    }

    /// Resolve the ready set for one goal.
    ///
    /// Queued items are conditionally promoted through the repository
    /// (`queued → ready` iff all dependencies are done), then every ready
    /// item is returned in dispatch order.
    pub async fn ready_work_items(&self, goal_id: Uuid) -> DomainResult<Vec<WorkItem>> {
        let items = self.repository.get_work_items_by_goal(goal_id).await?;

        let mut ready = Vec::new();
        for item in &items {
            match item.status {
                WorkItemStatus::Ready => ready.push(item.clone()),
                WorkItemStatus::Queued => {
                    if let Some(promoted) = self
                        .repository
                        .update_work_item_status_if_dependencies_met(item.id)
                        .await?
                    {
                        debug!(work_item_id = %promoted.id, "promoted to ready");
                        ready.push(promoted);
                    }
                }
                _ => {}
            }
        }

        ready.sort_by(dispatch_order);
        Ok(ready)
    }

    /// All items of a goal, unordered.
    pub async fn work_items(&self, goal_id: Uuid) -> DomainResult<Vec<WorkItem>> {
        self.repository.get_work_items_by_goal(goal_id).await
    }

    /// True when every item of the goal is `done`.
    pub async fn all_done(&self, goal_id: Uuid) -> DomainResult<bool> {
        let items = self.repository.get_work_items_by_goal(goal_id).await?;
        Ok(!items.is_empty() && items.iter().all(|w| w.status == WorkItemStatus::Done))
    }

    /// Dependency ids that reference no existing work item, per item.
    pub fn missing_dependencies(items: &[WorkItem]) -> Vec<(Uuid, Uuid)> {
        let known: HashMap<Uuid, ()> = items.iter().map(|w| (w.id, ())).collect();
        let mut missing = Vec::new();
        for item in items {
            for dep in &item.dependencies {
                if !known.contains_key(dep) {
                    missing.push((item.id, *dep));
                }
            }
        }
        missing
    }

    /// Strongly connected components of size > 1 (or self-loops) in the
    /// dependency graph: each returned group is one cycle.
    ///
    /// Iterative Tarjan, so arbitrarily deep graphs cannot blow the stack.
    pub fn detect_cycles(items: &[WorkItem]) -> Vec<Vec<Uuid>> {
        let ids: Vec<Uuid> = items.iter().map(|w| w.id).collect();
        let index_of: HashMap<Uuid, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let adj: Vec<Vec<usize>> = items
            .iter()
            .map(|w| {
                w.dependencies
                    .iter()
                    .filter_map(|d| index_of.get(d).copied())
                    .collect()
            })
            .collect();

        let n = ids.len();
        let unvisited = usize::MAX;
        let mut index = vec![unvisited; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut cycles = Vec::new();

        for start in 0..n {
            if index[start] != unvisited {
                continue;
            }
            // Explicit (node, next-child) frames instead of recursion.
            let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
            while let Some(&(v, child)) = frames.last() {
                if child == 0 {
                    index[v] = next_index;
                    lowlink[v] = next_index;
                    next_index += 1;
                    stack.push(v);
                    on_stack[v] = true;
                }
                if child < adj[v].len() {
                    let w = adj[v][child];
                    if let Some(frame) = frames.last_mut() {
                        frame.1 += 1;
                    }
                    if index[w] == unvisited {
                        frames.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w]);
                    }
                } else {
                    frames.pop();
                    if let Some(&(parent, _)) = frames.last() {
                        lowlink[parent] = lowlink[parent].min(lowlink[v]);
                    }
                    if lowlink[v] == index[v] {
                        let mut component = Vec::new();
                        while let Some(w) = stack.pop() {
                            on_stack[w] = false;
                            component.push(ids[w]);
                            if w == v {
                                break;
                            }
                        }
                        let self_loop = component.len() == 1 && adj[v].contains(&v);
                        if component.len() > 1 || self_loop {
                            cycles.push(component);
                        }
                    }
                }
            }
        }

        cycles
    }
}

/// Ordering used for dispatch: priority ascending (lower runs first), then
/// creation time, then id as the final tie-break.
pub fn dispatch_order(a: &WorkItem, b: &WorkItem) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::WorkItemType;

    fn item(goal: Uuid) -> WorkItem {
        WorkItem::new(goal, "w", "", WorkItemType::Code)
    }

    #[test]
    fn test_no_cycles_in_chain() {
        let goal = Uuid::new_v4();
        let a = item(goal);
        let b = item(goal).with_dependency(a.id);
        let c = item(goal).with_dependency(b.id);
        assert!(WorkItemManager::detect_cycles(&[a, b, c]).is_empty());
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let goal = Uuid::new_v4();
        let mut a = item(goal);
        let mut b = item(goal);
        a.dependencies.push(b.id);
        b.dependencies.push(a.id);
        let cycles = WorkItemManager::detect_cycles(&[a.clone(), b.clone()]);
        assert_eq!(cycles.len(), 1);
        let mut found = cycles[0].clone();
        found.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_self_loop_detected() {
        let goal = Uuid::new_v4();
        let mut a = item(goal);
        a.dependencies.push(a.id);
        let cycles = WorkItemManager::detect_cycles(&[a.clone()]);
        assert_eq!(cycles, vec![vec![a.id]]);
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let goal = Uuid::new_v4();
        let root = item(goal);
        let left = item(goal).with_dependency(root.id);
        let right = item(goal).with_dependency(root.id);
        let join = item(goal)
            .with_dependency(left.id)
            .with_dependency(right.id);
        assert!(WorkItemManager::detect_cycles(&[root, left, right, join]).is_empty());
    }

    #[test]
    fn test_missing_dependency_reported() {
        let goal = Uuid::new_v4();
        let ghost = Uuid::new_v4();
        let a = item(goal).with_dependency(ghost);
        let missing = WorkItemManager::missing_dependencies(std::slice::from_ref(&a));
        assert_eq!(missing, vec![(a.id, ghost)]);
    }

    #[test]
    fn test_dispatch_order_uses_priority_then_age() {
        let goal = Uuid::new_v4();
        let mut high = item(goal);
        high.priority = 0;
        let mut low = item(goal);
        low.priority = 5;
        let mut items = vec![low.clone(), high.clone()];
        items.sort_by(dispatch_order);
        assert_eq!(items[0].id, high.id);
    }
}
