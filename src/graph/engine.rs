use ahash::{AHashMap, AHashSet};
use petgraph::unionfind::UnionFind;
use std::collections::VecDeque;

use super::TrailGraph;
use crate::model::NodeId;

/// Graph queries the pipeline needs, kept behind a trait so tests can fake them.
pub trait GraphEngine {
    /// Whether `b` is reachable from `a` using at most `max_hops` edges.
    fn connected_within(&self, graph: &TrailGraph, a: NodeId, b: NodeId, max_hops: usize) -> bool;

    /// Connected components, each sorted by node id, largest first.
    fn connected_components(&self, graph: &TrailGraph) -> Vec<Vec<NodeId>>;
}

/// Iterative BFS for bounded reachability, union-find for components.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdjacencyGraphEngine;

impl AdjacencyGraphEngine {
    pub fn new() -> Self {
        Self
    }
}

impl GraphEngine for AdjacencyGraphEngine {
    fn connected_within(&self, graph: &TrailGraph, a: NodeId, b: NodeId, max_hops: usize) -> bool {
        if a == b {
            return true;
        }
        let mut visited: AHashSet<NodeId> = AHashSet::new();
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        queue.push_back((a, 0));
        visited.insert(a);

        while let Some((curr, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            for neighbor in graph.neighbors(curr) {
                if neighbor == b {
                    return true;
                }
                if visited.insert(neighbor) {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        false
    }

    fn connected_components(&self, graph: &TrailGraph) -> Vec<Vec<NodeId>> {
        let ids = graph.node_ids();
        let index: AHashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut uf: UnionFind<usize> = UnionFind::new(ids.len());
        for edge in graph.edges() {
            if let (Some(&s), Some(&t)) = (index.get(&edge.source), index.get(&edge.target)) {
                uf.union(s, t);
            }
        }

        let mut by_root: AHashMap<usize, Vec<NodeId>> = AHashMap::new();
        for (i, id) in ids.iter().enumerate() {
            by_root.entry(uf.find(i)).or_default().push(*id);
        }

        // ids come out of the graph sorted, so each component already is
        let mut components: Vec<Vec<NodeId>> = by_root.into_values().collect();
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        components
    }
}
