// ===========================================================================
// Degree-2 chain consolidation
// ===========================================================================

use ahash::AHashSet;
use itertools::Itertools;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::config::GraphBuildConfig;
use crate::errors::{GraphBuildError, IssueKind, IssueLog, Phase};
use crate::geometry::GeometryEngine;
use crate::graph::TrailGraph;
use crate::model::{Attribution, Edge, EdgeId, NodeId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub merges: usize,
    pub conflicts: usize,
    /// The merge budget ran out before a fixed point was reached.
    pub exhausted: bool,
}

enum Step {
    Merged(NodeId, NodeId),
    Skipped,
    Conflict,
}

pub struct ChainConsolidator<'a, G: GeometryEngine> {
    geometry: &'a G,
    config: &'a GraphBuildConfig,
}

impl<'a, G: GeometryEngine> ChainConsolidator<'a, G> {
    pub fn new(geometry: &'a G, config: &'a GraphBuildConfig) -> Self {
        Self { geometry, config }
    }

    /// Merges edge pairs through degree-2 nodes until no such node is mergeable.
    /// Running it again on its own output performs no merges.
    pub fn consolidate(&self, graph: &mut TrailGraph, issues: &mut IssueLog) -> ConsolidationReport {
        let mut report = ConsolidationReport::default();

        let mut worklist: VecDeque<NodeId> = graph
            .nodes()
            .filter(|n| n.degree == 2)
            .map(|n| n.id)
            .collect();
        let mut queued: AHashSet<NodeId> = worklist.iter().copied().collect();

        while let Some(node) = worklist.pop_front() {
            queued.remove(&node);
            if report.merges >= self.config.max_consolidation_iterations {
                warn!(
                    merges = report.merges,
                    pending = worklist.len() + 1,
                    "consolidation merge budget exhausted"
                );
                issues.flag(
                    Phase::Consolidate,
                    IssueKind::Run,
                    node.to_string(),
                    format!(
                        "stopped after {} merges; remaining degree-2 nodes left as is",
                        report.merges
                    ),
                );
                report.exhausted = true;
                break;
            }

            match self.merge_at(graph, node, issues) {
                Step::Merged(a, b) => {
                    report.merges += 1;
                    for n in [a, b] {
                        if graph.degree(n) == 2 && queued.insert(n) {
                            worklist.push_back(n);
                        }
                    }
                }
                Step::Conflict => report.conflicts += 1,
                Step::Skipped => {}
            }
        }

        info!(
            merges = report.merges,
            conflicts = report.conflicts,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "consolidated degree-2 chains"
        );
        report
    }

    fn merge_at(&self, graph: &mut TrailGraph, node: NodeId, issues: &mut IssueLog) -> Step {
        let incident = graph.incident_edges(node);
        if incident.len() != 2 || incident[0] == incident[1] {
            // not degree 2, or a self-loop hanging alone on this node
            return Step::Skipped;
        }
        let (ia, ib) = if incident[0] < incident[1] {
            (incident[0], incident[1])
        } else {
            (incident[1], incident[0])
        };
        let (Some(ea), Some(eb)) = (graph.edge(ia), graph.edge(ib)) else {
            return Step::Skipped;
        };
        if ea.is_bridge != eb.is_bridge {
            return Step::Skipped;
        }
        if ea.constituent_ids().len() + eb.constituent_ids().len() > self.config.max_chain_length {
            debug!(%node, "chain length cap reached");
            return Step::Skipped;
        }

        let other_a = ea.other_end(node);
        let other_b = eb.other_end(node);
        let tolerance = self.config.node_snap_tolerance_m;

        // path order: other_a -> node -> other_b
        let (coords_a, mut elevs_a, gain_a, loss_a) = ea.oriented_from(other_a);
        let (coords_b, elevs_b, gain_b, loss_b) = eb.oriented_from(node);

        let conflict = |reason: String, issues: &mut IssueLog| {
            let err = GraphBuildError::ChainMergeConflict {
                node: node.0,
                edge_a: ia.0,
                edge_b: ib.0,
                reason,
            };
            issues.record_error(Phase::Consolidate, node.to_string(), &err, false);
            Step::Conflict
        };

        let Some(coords) = self.geometry.merge_lines(&coords_a, &coords_b, tolerance) else {
            return conflict("edges are not contiguous at the shared node".to_string(), issues);
        };

        let closes = other_a == other_b;
        if closes {
            let n = coords.len();
            if n < 4 || self.geometry.distance(coords[0], coords[n - 1]) > tolerance {
                return conflict("merged loop does not close".to_string(), issues);
            }
        }
        if !self.geometry.is_simple(&coords) {
            return conflict("merged geometry self-intersects".to_string(), issues);
        }

        let attribution: Vec<Attribution> = ea
            .attribution
            .iter()
            .chain(&eb.attribution)
            .cloned()
            .sorted()
            .dedup()
            .collect();

        let mut merged_from: Vec<EdgeId> = ea.constituent_ids();
        merged_from.extend(eb.constituent_ids());

        elevs_a.extend_from_slice(&elevs_b[1..]);

        let merged = Edge {
            id: EdgeId(0),
            source: other_a,
            target: other_b,
            coords,
            elevations: elevs_a,
            length_m: ea.length_m + eb.length_m,
            elevation_gain: gain_a + gain_b,
            elevation_loss: loss_a + loss_b,
            attribution,
            merged_from,
            is_loop: closes,
            is_bridge: ea.is_bridge,
        };

        graph.remove_edge(ia);
        graph.remove_edge(ib);
        graph.remove_isolated_node(node);
        let new_id = graph.add_edge(merged);
        debug!(%node, ?new_id, "merged {} and {}", ia, ib);
        Step::Merged(other_a, other_b)
    }
}
