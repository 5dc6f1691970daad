use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{GraphBuildError, IssueLog, Phase};
use crate::graph::{GraphEngine, TrailGraph};

/// Component statistics of a finished graph. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityReport {
    pub components: usize,
    pub largest_component: usize,
    /// Share of nodes (0..=1) in the largest component.
    pub largest_share: f64,
    pub fragmented: bool,
}

pub fn validate_connectivity<R: GraphEngine>(
    graph: &TrailGraph,
    engine: &R,
    threshold: f64,
    issues: &mut IssueLog,
) -> ConnectivityReport {
    let components = engine.connected_components(graph);
    let node_count = graph.node_count();
    let largest_component = components.first().map_or(0, Vec::len);
    let largest_share = if node_count == 0 {
        1.0
    } else {
        largest_component as f64 / node_count as f64
    };
    let fragmented = node_count > 0 && largest_share < threshold;

    if fragmented {
        warn!(
            components = components.len(),
            largest_share, "graph is fragmented"
        );
        let err = GraphBuildError::ConnectivityFragmentation {
            largest_share: largest_share * 100.0,
            node_count,
        };
        issues.record_error(Phase::Validate, "graph", &err, false);
    }
    info!(
        components = components.len(),
        largest_component, "validated connectivity"
    );

    ConnectivityReport {
        components: components.len(),
        largest_component,
        largest_share,
        fragmented,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IssueKind;
    use crate::graph::AdjacencyGraphEngine;
    use crate::graph::tests::straight_edge;
    use crate::model::NodeProvenance;
    use geo::Coord;

    fn islands(sizes: &[usize]) -> TrailGraph {
        let mut g = TrailGraph::new();
        let mut x = 0.0;
        for size in sizes {
            let ids: Vec<_> = (0..*size)
                .map(|_| {
                    x += 10.0;
                    g.add_node(Coord { x, y: 0.0 }, 0.0, NodeProvenance::TrailEndpoint)
                })
                .collect();
            for w in ids.windows(2) {
                let e = straight_edge(&g, w[0], w[1], "t");
                g.add_edge(e).unwrap();
            }
            x += 1000.0;
        }
        g
    }

    #[test]
    fn connected_graph_is_not_fragmented() {
        let mut issues = IssueLog::new();
        let report = validate_connectivity(&islands(&[5]), &AdjacencyGraphEngine::new(), 0.8, &mut issues);
        assert_eq!(report.components, 1);
        assert_eq!(report.largest_share, 1.0);
        assert!(!report.fragmented);
        assert!(issues.is_empty());
    }

    #[test]
    fn reports_fragmentation_below_threshold() {
        let mut issues = IssueLog::new();
        let report =
            validate_connectivity(&islands(&[6, 2, 2]), &AdjacencyGraphEngine::new(), 0.8, &mut issues);
        assert_eq!(report.components, 3);
        assert_eq!(report.largest_component, 6);
        assert!((report.largest_share - 0.6).abs() < 1e-12);
        assert!(report.fragmented);
        assert_eq!(issues.count(IssueKind::ConnectivityFragmentation), 1);
    }
}
