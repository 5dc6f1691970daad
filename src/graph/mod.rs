// ===========================================================================
// In-run trail graph (nodes, edges, incidence)
// ===========================================================================

mod engine;

pub use engine::{AdjacencyGraphEngine, GraphEngine};

use ahash::AHashMap;
use geo::Coord;
use std::collections::BTreeMap;

use crate::geometry::Projection;
use crate::model::{Edge, EdgeId, EdgeRecord, GraphTables, Node, NodeId, NodeProvenance, NodeRecord};

/// Undirected multigraph keyed by stable ids.
///
/// `incidence` holds one entry per edge-end, so a self-loop appears twice at its
/// node and counts twice toward its degree.
#[derive(Debug, Clone, Default)]
pub struct TrailGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    incidence: AHashMap<NodeId, Vec<EdgeId>>,
    next_node_id: u64,
    next_edge_id: u64,
}

impl TrailGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, coord: Coord, elevation: f64, provenance: NodeProvenance) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                coord,
                elevation,
                degree: 0,
                provenance,
            },
        );
        self.incidence.insert(id, Vec::new());
        id
    }

    /// Inserts an edge, assigning it a fresh id. Both endpoints must exist.
    pub fn add_edge(&mut self, mut edge: Edge) -> Option<EdgeId> {
        if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
            return None;
        }
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        edge.id = id;

        for end in [edge.source, edge.target] {
            self.incidence.entry(end).or_default().push(id);
        }
        self.refresh_degree(edge.source);
        self.refresh_degree(edge.target);
        self.edges.insert(id, edge);
        Some(id)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&id)?;
        for end in [edge.source, edge.target] {
            if let Some(list) = self.incidence.get_mut(&end) {
                if let Some(pos) = list.iter().position(|e| *e == id) {
                    list.swap_remove(pos);
                }
            }
        }
        self.refresh_degree(edge.source);
        self.refresh_degree(edge.target);
        Some(edge)
    }

    /// Removes a node that no edge references any more.
    pub fn remove_isolated_node(&mut self, id: NodeId) -> Option<Node> {
        if self.degree(id) != 0 {
            return None;
        }
        self.incidence.remove(&id);
        self.nodes.remove(&id)
    }

    /// Drops every degree-0 node, returning how many were pruned.
    pub fn prune_isolated(&mut self) -> usize {
        let isolated: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.degree == 0)
            .map(|n| n.id)
            .collect();
        for id in &isolated {
            self.remove_isolated_node(*id);
        }
        isolated.len()
    }

    fn refresh_degree(&mut self, id: NodeId) {
        let degree = self.incidence.get(&id).map_or(0, Vec::len);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.degree = degree;
        }
    }

    pub fn set_provenance(&mut self, id: NodeId, provenance: NodeProvenance) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.provenance = provenance;
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Edge-ends at a node; a self-loop is listed twice.
    pub fn incident_edges(&self, id: NodeId) -> &[EdgeId] {
        self.incidence.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.incident_edges(id).len()
    }

    /// Neighbouring nodes, one entry per incident edge-end.
    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incident_edges(id)
            .iter()
            .filter_map(move |e| self.edges.get(e).map(|edge| edge.other_end(id)))
    }

    /// Whether an edge directly joins `a` and `b`.
    pub fn has_edge_between(&self, a: NodeId, b: NodeId) -> bool {
        self.neighbors(a).any(|n| n == b)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Structural problems: dangling edge ends, stale degrees, unflagged self-loops.
    pub fn integrity_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for edge in self.edges.values() {
            for end in [edge.source, edge.target] {
                if !self.nodes.contains_key(&end) {
                    problems.push(format!("{} references missing node {}", edge.id, end));
                }
            }
            if edge.source == edge.target && !edge.is_loop {
                problems.push(format!("{} is an unflagged self-loop at {}", edge.id, edge.source));
            }
        }
        for node in self.nodes.values() {
            if node.degree != self.degree(node.id) {
                problems.push(format!(
                    "{} has stale degree {} (actual {})",
                    node.id,
                    node.degree,
                    self.degree(node.id)
                ));
            }
        }
        problems
    }

    /// Output tables with geometry mapped back to input coordinates.
    pub fn to_tables(&self, projection: &Projection) -> GraphTables {
        let nodes = self
            .nodes
            .values()
            .map(|n| {
                let (lon, lat) = projection.unproject(n.coord);
                NodeRecord {
                    id: n.id.0,
                    lon,
                    lat,
                    elevation: n.elevation,
                    degree: n.degree,
                    provenance: n.provenance,
                }
            })
            .collect();

        let edges = self
            .edges
            .values()
            .map(|e| EdgeRecord {
                id: e.id.0,
                source_node_id: e.source.0,
                target_node_id: e.target.0,
                geometry: e
                    .coords
                    .iter()
                    .zip(&e.elevations)
                    .map(|(c, z)| {
                        let (lon, lat) = projection.unproject(*c);
                        [lon, lat, *z]
                    })
                    .collect(),
                length: e.length_m,
                elevation_gain: e.elevation_gain,
                elevation_loss: e.elevation_loss,
                attribution: e.attribution.clone(),
                merged_from_ids: e.merged_from.iter().map(|id| id.0).collect(),
                is_loop: e.is_loop,
                is_bridge: e.is_bridge,
            })
            .collect();

        GraphTables { nodes, edges }
    }
}
