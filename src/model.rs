use geo::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;

// ===========================================================================
// Input
// ===========================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailTags {
    pub category: Option<String>,
    pub surface: Option<String>,
    pub difficulty: Option<String>,
}

/// An input trail. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trail {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// (lon, lat, elevation), or (x, y, elevation) in a planar run
    pub points: Vec<[f64; 3]>,
    #[serde(default)]
    pub tags: TrailTags,
    #[serde(default)]
    pub declared_length: Option<f64>,
    #[serde(default)]
    pub declared_elevation_gain: Option<f64>,
    #[serde(default)]
    pub declared_elevation_loss: Option<f64>,
}

impl Trail {
    pub fn new(id: impl Into<String>, name: impl Into<String>, points: Vec<[f64; 3]>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            points,
            tags: TrailTags::default(),
            declared_length: None,
            declared_elevation_gain: None,
            declared_elevation_loss: None,
        }
    }

    /// Convenience constructor for flat 2D input.
    pub fn from_xy(id: impl Into<String>, name: impl Into<String>, xy: &[(f64, f64)]) -> Self {
        Self::new(id, name, xy.iter().map(|&(x, y)| [x, y, 0.0]).collect())
    }

    pub fn with_elevation(mut self, gain: f64, loss: f64) -> Self {
        self.declared_elevation_gain = Some(gain);
        self.declared_elevation_loss = Some(loss);
        self
    }
}

// ===========================================================================
// Working geometry (projected meters)
// ===========================================================================

/// Where a split point came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SplitOrigin {
    /// Another trail's endpoint was snapped onto this trail (T-intersection).
    SnappedEndpoint,
    Crossing,
    SelfIntersection,
}

impl SplitOrigin {
    /// Lower wins when several origins collapse to one split point.
    pub fn priority(self) -> u8 {
        match self {
            SplitOrigin::SnappedEndpoint => 0,
            SplitOrigin::Crossing => 1,
            SplitOrigin::SelfIntersection => 2,
        }
    }
}

/// What lies at the end of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EndpointKind {
    TrailEnd,
    Split(SplitOrigin),
}

/// A cut location on a trail, `measure` meters from its start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitPoint {
    pub coord: Coord,
    pub measure: f64,
    pub origin: SplitOrigin,
}

/// A piece of a trail between two split points (or trail ends).
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    pub trail_id: String,
    pub trail_name: String,
    /// Position within the parent trail, 0-based.
    pub order: usize,
    pub coords: Vec<Coord>,
    pub elevations: Vec<f64>,
    pub length_m: f64,
    pub elevation_gain: f64,
    pub elevation_loss: f64,
    /// Closed arc (first point coincides with the last).
    pub is_loop: bool,
    pub start_kind: EndpointKind,
    pub end_kind: EndpointKind,
    /// Distance of the segment start from the parent trail start, for ordering.
    pub parent_measure: f64,
}

impl Segment {
    pub fn start(&self) -> Coord {
        self.coords[0]
    }

    pub fn end(&self) -> Coord {
        self.coords[self.coords.len() - 1]
    }
}

// ===========================================================================
// Graph
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeProvenance {
    Intersection,
    TrailEndpoint,
    Bridge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub coord: Coord,
    pub elevation: f64,
    pub degree: usize,
    pub provenance: NodeProvenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribution {
    pub trail_id: String,
    pub trail_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub coords: Vec<Coord>,
    pub elevations: Vec<f64>,
    pub length_m: f64,
    pub elevation_gain: f64,
    pub elevation_loss: f64,
    /// Sorted, deduplicated. Empty for bridges.
    pub attribution: Vec<Attribution>,
    /// Edges this one replaced during consolidation. Empty for unmerged edges.
    pub merged_from: Vec<EdgeId>,
    pub is_loop: bool,
    pub is_bridge: bool,
}

impl Edge {
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.source == node {
            self.target
        } else {
            self.source
        }
    }

    /// Geometry, elevations and gain/loss as seen when walking from `node`.
    pub fn oriented_from(&self, node: NodeId) -> (Vec<Coord>, Vec<f64>, f64, f64) {
        if self.source == node {
            (
                self.coords.clone(),
                self.elevations.clone(),
                self.elevation_gain,
                self.elevation_loss,
            )
        } else {
            let mut coords = self.coords.clone();
            coords.reverse();
            let mut elevations = self.elevations.clone();
            elevations.reverse();
            (coords, elevations, self.elevation_loss, self.elevation_gain)
        }
    }

    /// Original edge ids this edge stands for.
    pub fn constituent_ids(&self) -> Vec<EdgeId> {
        if self.merged_from.is_empty() {
            vec![self.id]
        } else {
            self.merged_from.clone()
        }
    }
}

// ===========================================================================
// Output tables
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: u64,
    pub lon: f64,
    pub lat: f64,
    pub elevation: f64,
    pub degree: usize,
    pub provenance: NodeProvenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: u64,
    pub source_node_id: u64,
    pub target_node_id: u64,
    /// (lon, lat, elevation)
    pub geometry: Vec<[f64; 3]>,
    pub length: f64,
    pub elevation_gain: f64,
    pub elevation_loss: f64,
    pub attribution: Vec<Attribution>,
    pub merged_from_ids: Vec<u64>,
    pub is_loop: bool,
    pub is_bridge: bool,
}

/// The finished node and edge tables of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphTables {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}
