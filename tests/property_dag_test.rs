//! Property tests for dependency-graph analysis.

use proptest::prelude::*;
use uuid::Uuid;

use foreman::domain::models::{WorkItem, WorkItemType};
use foreman::services::WorkItemManager;

fn items_with_edges(n: usize, forward_edges: &[(usize, usize)]) -> Vec<WorkItem> {
    let goal = Uuid::new_v4();
    let mut items: Vec<WorkItem> = (0..n)
        .map(|i| WorkItem::new(goal, format!("w{i}"), "", WorkItemType::Code))
        .collect();
    for &(from, to) in forward_edges {
        let dep = items[to].id;
        items[from].dependencies.push(dep);
    }
    items
}

proptest! {
    /// Edges that only point from later items to earlier ones can never
    /// form a cycle.
    #[test]
    fn forward_only_graphs_are_acyclic(
        n in 2usize..20,
        edges in prop::collection::vec((0usize..50, 0usize..50), 0..60),
    ) {
        let edges: Vec<(usize, usize)> = edges
            .into_iter()
            .map(|(a, b)| (a % n, b % n))
            .filter(|(from, to)| to < from)
            .collect();
        let items = items_with_edges(n, &edges);
        prop_assert!(WorkItemManager::detect_cycles(&items).is_empty());
    }

    /// Closing a forward chain with one back edge always produces a cycle
    /// containing every chain member between the endpoints.
    #[test]
    fn back_edge_on_chain_is_detected(n in 2usize..15, start in 0usize..15) {
        let start = start % (n - 1);
        // Chain: each item depends on its predecessor.
        let chain: Vec<(usize, usize)> = (1..n).map(|i| (i, i - 1)).collect();
        let mut items = items_with_edges(n, &chain);
        // Back edge: start depends on the last item.
        let last = items[n - 1].id;
        items[start].dependencies.push(last);

        let cycles = WorkItemManager::detect_cycles(&items);
        prop_assert_eq!(cycles.len(), 1);
        prop_assert_eq!(cycles[0].len(), n - start);
    }

    /// Missing-dependency detection reports exactly the dangling edges.
    #[test]
    fn dangling_dependencies_are_reported(n in 1usize..10, dangling in 0usize..5) {
        let mut items = items_with_edges(n, &[]);
        let mut expected = Vec::new();
        for i in 0..dangling {
            let ghost = Uuid::new_v4();
            let target = i % n;
            items[target].dependencies.push(ghost);
            expected.push((items[target].id, ghost));
        }
        let mut missing = WorkItemManager::missing_dependencies(&items);
        missing.sort();
        expected.sort();
        prop_assert_eq!(missing, expected);
    }
}
