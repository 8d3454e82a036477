// ── Dependency resolver ──
//
// Kahn's algorithm over a petgraph `DiGraph` whose node indices follow
// declaration order. Ready nodes sit in a min-heap keyed by index, so ties
// always break toward the earlier declaration and the order is stable
// across runs. Cycles are reported as strongly connected components.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

/// Topological order of `graph` (edges point producer -> consumer), or
/// every cycle found, each listed in ascending index order.
pub fn topological_order<N, E>(graph: &DiGraph<N, E>) -> Result<Vec<NodeIndex>, Vec<Vec<NodeIndex>>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(i)) = ready.pop() {
        let node = NodeIndex::new(i);
        order.push(node);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(d) = in_degree.get_mut(next.index()) {
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        Err(cycles(graph))
    }
}

/// Every non-trivial strongly connected component (plus self-loops),
/// ordered by their earliest member.
pub fn cycles<N, E>(graph: &DiGraph<N, E>) -> Vec<Vec<NodeIndex>> {
    let mut out: Vec<Vec<NodeIndex>> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| match scc.as_slice() {
            [single] => graph.contains_edge(*single, *single),
            _ => true,
        })
        .map(|mut scc| {
            scc.sort();
            scc
        })
        .collect();
    out.sort();
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn graph(n: usize, edges: &[(usize, usize)]) -> DiGraph<(), ()> {
        let mut g = DiGraph::new();
        for _ in 0..n {
            g.add_node(());
        }
        for (a, b) in edges {
            g.add_edge(NodeIndex::new(*a), NodeIndex::new(*b), ());
        }
        g
    }

    fn indices(order: &[NodeIndex]) -> Vec<usize> {
        order.iter().map(|n| n.index()).collect()
    }

    #[test]
    fn ties_break_by_declaration_order() {
        // 3 and 1 are both roots; 0 depends on 3, 2 depends on 1.
        let g = graph(4, &[(3, 0), (1, 2)]);
        assert_eq!(indices(&topological_order(&g).unwrap()), vec![1, 2, 3, 0]);
    }

    #[test]
    fn order_is_stable_across_runs() {
        let edges = [(0, 4), (1, 4), (2, 3), (4, 5), (3, 5)];
        let first = topological_order(&graph(6, &edges)).unwrap();
        for _ in 0..10 {
            assert_eq!(topological_order(&graph(6, &edges)).unwrap(), first);
        }
    }

    #[test]
    fn every_cycle_member_is_reported() {
        // 0 -> 1 -> 2 -> 0 is a cycle; 3 hangs off it; 4 loops on itself.
        let g = graph(5, &[(0, 1), (1, 2), (2, 0), (2, 3), (4, 4)]);
        let cycles = topological_order(&g).unwrap_err();
        let cycles: Vec<Vec<usize>> = cycles.iter().map(|c| indices(c)).collect();
        assert_eq!(cycles, vec![vec![0, 1, 2], vec![4]]);
    }
}
