// ===========================================================================
// Gap bridging: synthetic connectors across small digitization gaps
// ===========================================================================

use ahash::AHashSet;
use ordered_float::OrderedFloat;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use tracing::{debug, info};

use crate::config::{BridgePolicy, GraphBuildConfig};
use crate::geometry::GeometryEngine;
use crate::graph::{GraphEngine, TrailGraph};
use crate::model::{EdgeId, NodeId, NodeProvenance};
use crate::topology::add_bridge_edge;

type NodePoint = GeomWithData<[f64; 2], NodeId>;

/// A bridge that was inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeRecord {
    pub edge: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub distance_m: f64,
}

pub struct GapBridger<'a, G: GeometryEngine, R: GraphEngine> {
    geometry: &'a G,
    graph_engine: &'a R,
    config: &'a GraphBuildConfig,
}

impl<'a, G: GeometryEngine, R: GraphEngine> GapBridger<'a, G, R> {
    pub fn new(geometry: &'a G, graph_engine: &'a R, config: &'a GraphBuildConfig) -> Self {
        Self {
            geometry,
            graph_engine,
            config,
        }
    }

    /// Connects dangling endpoints (degree 1) to nodes within the bridge distance
    /// bounds, shortest gap first. Each candidate is checked against the graph as it
    /// stands, earlier bridges included, so a pair joined through another bridge is
    /// skipped.
    pub fn bridge(&self, graph: &mut TrailGraph) -> Vec<BridgeRecord> {
        let (min_d, max_d) = (
            self.config.min_bridge_distance_m,
            self.config.max_bridge_distance_m,
        );

        let dangling: Vec<NodeId> = graph.nodes().filter(|n| n.degree == 1).map(|n| n.id).collect();
        let dangling_set: AHashSet<NodeId> = dangling.iter().copied().collect();
        let tree: RTree<NodePoint> = RTree::bulk_load(
            graph
                .nodes()
                .map(|n| GeomWithData::new([n.coord.x, n.coord.y], n.id))
                .collect(),
        );

        // (distance, lower id, higher id)
        let mut candidates: Vec<(OrderedFloat<f64>, NodeId, NodeId)> = Vec::new();
        for a in &dangling {
            let Some(node) = graph.node(*a) else {
                continue;
            };
            for hit in tree.locate_within_distance([node.coord.x, node.coord.y], max_d * max_d) {
                let b = hit.data;
                if b == *a || (dangling_set.contains(&b) && b < *a) {
                    // the pair is seen from its lower dangling end
                    continue;
                }
                let Some(other) = graph.node(b) else {
                    continue;
                };
                let d = self.geometry.distance(node.coord, other.coord);
                if d >= min_d && d <= max_d {
                    candidates.push((OrderedFloat(d), (*a).min(b), (*a).max(b)));
                }
            }
        }
        candidates.sort();
        candidates.dedup();

        let mut records = Vec::new();
        for (d, a, b) in candidates {
            let connected = match self.config.bridge_policy {
                BridgePolicy::DistanceOnly => graph.has_edge_between(a, b),
                BridgePolicy::SkipIfConnectedWithin { max_hops } => {
                    self.graph_engine.connected_within(graph, a, b, max_hops)
                }
            };
            if connected {
                debug!(%a, %b, distance = d.0, "skipping bridge, already connected");
                continue;
            }
            let Some(edge) = add_bridge_edge(graph, a, b) else {
                continue;
            };
            for n in [a, b] {
                if dangling_set.contains(&n) {
                    graph.set_provenance(n, NodeProvenance::Bridge);
                }
            }
            debug!(%a, %b, distance = d.0, %edge, "inserted bridge");
            records.push(BridgeRecord {
                edge,
                from: a,
                to: b,
                distance_m: d.0,
            });
        }

        info!(
            dangling = dangling.len(),
            bridges = records.len(),
            "bridged gaps"
        );
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AdjacencyGraphEngine;
    use crate::graph::tests::straight_edge;
    use crate::geometry::PlanarGeometryEngine;
    use geo::Coord;

    fn graph_with_gap(gap: f64) -> (TrailGraph, NodeId, NodeId) {
        let mut g = TrailGraph::new();
        let a0 = g.add_node(Coord { x: 0.0, y: 0.0 }, 0.0, NodeProvenance::TrailEndpoint);
        let a1 = g.add_node(Coord { x: 100.0, y: 0.0 }, 0.0, NodeProvenance::TrailEndpoint);
        let b0 = g.add_node(Coord { x: 100.0 + gap, y: 0.0 }, 0.0, NodeProvenance::TrailEndpoint);
        let b1 = g.add_node(Coord { x: 200.0 + gap, y: 0.0 }, 0.0, NodeProvenance::TrailEndpoint);
        let ea = straight_edge(&g, a0, a1, "a");
        let eb = straight_edge(&g, b0, b1, "b");
        g.add_edge(ea).unwrap();
        g.add_edge(eb).unwrap();
        (g, a1, b0)
    }

    fn run(graph: &mut TrailGraph, config: &GraphBuildConfig) -> Vec<BridgeRecord> {
        let geometry = PlanarGeometryEngine::new();
        let engine = AdjacencyGraphEngine::new();
        GapBridger::new(&geometry, &engine, config).bridge(graph)
    }

    #[test]
    fn bridges_iff_within_bounds() {
        let config = GraphBuildConfig::planar();
        for (gap, expected) in [(0.5, 0), (1.0, 1), (12.0, 1), (30.0, 1), (31.0, 0)] {
            let (mut g, a1, b0) = graph_with_gap(gap);
            let records = run(&mut g, &config);
            assert_eq!(records.len(), expected, "gap {gap}");
            if expected == 1 {
                assert_eq!((records[0].from, records[0].to), (a1, b0));
                assert!((records[0].distance_m - gap).abs() < 1e-9);
                assert_eq!(g.node(a1).unwrap().provenance, NodeProvenance::Bridge);
            }
        }
    }

    #[test]
    fn skips_pairs_already_connected() {
        // a short trail: both of its ends dangle 20 m apart
        let mut g = TrailGraph::new();
        let a = g.add_node(Coord { x: 0.0, y: 0.0 }, 0.0, NodeProvenance::TrailEndpoint);
        let b = g.add_node(Coord { x: 20.0, y: 0.0 }, 0.0, NodeProvenance::TrailEndpoint);
        let e = straight_edge(&g, a, b, "short");
        g.add_edge(e).unwrap();

        assert!(run(&mut g, &GraphBuildConfig::planar()).is_empty());
        let distance_only = GraphBuildConfig {
            bridge_policy: BridgePolicy::DistanceOnly,
            ..GraphBuildConfig::planar()
        };
        assert!(run(&mut g, &distance_only).is_empty());
    }

    #[test]
    fn hop_budget_decides_shortcut() {
        // a 3-edge detour joins two dead ends 10 m apart
        let mut g = TrailGraph::new();
        let pts = [(0.0, 0.0), (0.0, 50.0), (10.0, 50.0), (10.0, 0.0)];
        let ids: Vec<NodeId> = pts
            .iter()
            .map(|&(x, y)| g.add_node(Coord { x, y }, 0.0, NodeProvenance::TrailEndpoint))
            .collect();
        for w in ids.windows(2) {
            let e = straight_edge(&g, w[0], w[1], "detour");
            g.add_edge(e).unwrap();
        }

        let tight = GraphBuildConfig {
            bridge_policy: BridgePolicy::SkipIfConnectedWithin { max_hops: 2 },
            ..GraphBuildConfig::planar()
        };
        let mut g2 = g.clone();
        assert_eq!(run(&mut g2, &tight).len(), 1);
        assert!(run(&mut g, &GraphBuildConfig::planar()).is_empty());
    }

    /// Reports every pair as connected, so nothing may be bridged.
    struct AlwaysConnected;

    impl GraphEngine for AlwaysConnected {
        fn connected_within(&self, _: &TrailGraph, _: NodeId, _: NodeId, _: usize) -> bool {
            true
        }
        fn connected_components(&self, graph: &TrailGraph) -> Vec<Vec<NodeId>> {
            vec![graph.node_ids()]
        }
    }

    #[test]
    fn policy_goes_through_graph_engine() {
        let (mut g, _, _) = graph_with_gap(12.0);
        let geometry = PlanarGeometryEngine::new();
        let config = GraphBuildConfig::planar();
        let records = GapBridger::new(&geometry, &AlwaysConnected, &config).bridge(&mut g);
        assert!(records.is_empty());
        assert_eq!(g.edge_count(), 2);
    }
}
