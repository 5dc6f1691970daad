// ===========================================================================
// Topology: cluster segment endpoints into nodes, one edge per segment
// ===========================================================================

use ahash::AHashMap;
use geo::Coord;
use itertools::Itertools;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use tracing::{debug, info};

use crate::config::GraphBuildConfig;
use crate::errors::{GraphBuildError, IssueKind, IssueLog, Phase};
use crate::geometry::{GeometryEngine, MEASURE_EPSILON, coord_distance, gain_and_loss};
use crate::graph::TrailGraph;
use crate::model::{Attribution, Edge, EdgeId, EndpointKind, NodeId, NodeProvenance, Segment};

/// One end of one segment, as stored in the clustering tree.
#[derive(Debug, Clone, PartialEq)]
struct SpatialEndpoint {
    index: usize,
    coord: Coord,
}

impl RTreeObject for SpatialEndpoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.coord.x, self.coord.y])
    }
}

impl PointDistance for SpatialEndpoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.coord.x - point[0];
        let dy = self.coord.y - point[1];
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    coord: Coord,
    elevation: f64,
    kind: EndpointKind,
}

/// Endpoints of segment `i` live at `2 * i` (start) and `2 * i + 1` (end).
fn segment_endpoints(segments: &[Segment]) -> Vec<Endpoint> {
    let mut out = Vec::with_capacity(segments.len() * 2);
    for seg in segments {
        out.push(Endpoint {
            coord: seg.start(),
            elevation: seg.elevations[0],
            kind: seg.start_kind,
        });
        out.push(Endpoint {
            coord: seg.end(),
            elevation: seg.elevations[seg.elevations.len() - 1],
            kind: seg.end_kind,
        });
    }
    out
}

/// Clusters endpoints around seeds. Split points seed first since they sit on exact
/// intersection locations, then trail ends in input order. Every member lies within
/// `tolerance` of its seed, and the two ends of one segment only share a cluster
/// when they coincide. Clusters come out in order of their first endpoint.
fn cluster_endpoints(endpoints: &[Endpoint], tolerance: f64) -> Vec<Vec<usize>> {
    let tree = RTree::bulk_load(
        endpoints
            .iter()
            .enumerate()
            .map(|(index, e)| SpatialEndpoint {
                index,
                coord: e.coord,
            })
            .collect(),
    );

    let mut seeds: Vec<usize> = (0..endpoints.len()).collect();
    seeds.sort_by_key(|i| (endpoints[*i].kind == EndpointKind::TrailEnd, *i));

    let mut visited = vec![false; endpoints.len()];
    let mut clusters = Vec::new();
    for seed in seeds {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let origin = [endpoints[seed].coord.x, endpoints[seed].coord.y];
        let mut nearby: Vec<(f64, usize)> = tree
            .locate_within_distance(origin, tolerance * tolerance)
            .filter(|candidate| !visited[candidate.index])
            .map(|candidate| (candidate.distance_2(&origin), candidate.index))
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut members = vec![seed];
        for (_, index) in nearby {
            // the other end of the same segment
            let twin = index ^ 1;
            if members.contains(&twin)
                && coord_distance(endpoints[index].coord, endpoints[twin].coord) > MEASURE_EPSILON
            {
                continue;
            }
            visited[index] = true;
            members.push(index);
        }
        members.sort_unstable();
        clusters.push(members);
    }
    clusters.sort_by_key(|members| members[0]);
    clusters
}

/// Location, elevation and provenance of the node standing for a cluster.
/// Split points are exact intersection locations and win over the centroid.
fn place_node(endpoints: &[Endpoint], members: &[usize]) -> (Coord, f64, NodeProvenance) {
    let elevation = members.iter().map(|m| endpoints[*m].elevation).sum::<f64>() / members.len() as f64;

    let split = members
        .iter()
        .filter_map(|m| match endpoints[*m].kind {
            EndpointKind::Split(origin) => Some((origin.priority(), *m)),
            EndpointKind::TrailEnd => None,
        })
        .min();
    if let Some((_, m)) = split {
        return (endpoints[m].coord, elevation, NodeProvenance::Intersection);
    }

    let count = members.len() as f64;
    let (sum_x, sum_y) = members.iter().fold((0.0, 0.0), |acc, m| {
        (acc.0 + endpoints[*m].coord.x, acc.1 + endpoints[*m].coord.y)
    });
    (
        Coord {
            x: sum_x / count,
            y: sum_y / count,
        },
        elevation,
        NodeProvenance::TrailEndpoint,
    )
}

pub struct TopologyBuilder<'a, G: GeometryEngine> {
    geometry: &'a G,
    config: &'a GraphBuildConfig,
}

impl<'a, G: GeometryEngine> TopologyBuilder<'a, G> {
    pub fn new(geometry: &'a G, config: &'a GraphBuildConfig) -> Self {
        Self { geometry, config }
    }

    /// Builds the node and edge tables for a set of segments.
    pub fn build(&self, segments: &[Segment], issues: &mut IssueLog) -> TrailGraph {
        let endpoints = segment_endpoints(segments);
        let clusters = cluster_endpoints(&endpoints, self.config.node_snap_tolerance_m);

        let mut graph = TrailGraph::new();
        let mut node_of = vec![NodeId(0); endpoints.len()];
        for members in &clusters {
            let (coord, elevation, provenance) = place_node(&endpoints, members);
            let id = graph.add_node(coord, elevation, provenance);
            for m in members {
                node_of[*m] = id;
            }
        }

        // (edge, segment id) drafts, before duplicate folding
        let mut drafts: Vec<(Edge, String)> = Vec::with_capacity(segments.len());
        for (i, seg) in segments.iter().enumerate() {
            let (source, target) = (node_of[2 * i], node_of[2 * i + 1]);
            if source == target && !seg.is_loop {
                let err = GraphBuildError::geometry(
                    seg.id.clone(),
                    format!("both ends collapse onto node {source} but the segment is not a loop"),
                );
                issues.record_error(Phase::Topology, seg.id.clone(), &err, true);
                continue;
            }
            let (Some(s), Some(t)) = (graph.node(source), graph.node(target)) else {
                continue;
            };

            let mut coords = seg.coords.clone();
            let last = coords.len() - 1;
            coords[0] = s.coord;
            coords[last] = t.coord;

            drafts.push((
                Edge {
                    id: EdgeId(0),
                    source,
                    target,
                    length_m: self.geometry.length(&coords),
                    coords,
                    elevations: seg.elevations.clone(),
                    elevation_gain: seg.elevation_gain,
                    elevation_loss: seg.elevation_loss,
                    attribution: vec![Attribution {
                        trail_id: seg.trail_id.clone(),
                        trail_name: seg.trail_name.clone(),
                    }],
                    merged_from: Vec::new(),
                    is_loop: source == target,
                    is_bridge: false,
                },
                seg.id.clone(),
            ));
        }

        if self.config.merge_duplicate_edges {
            drafts = self.fold_duplicates(drafts, issues);
        }
        for (edge, _) in drafts {
            graph.add_edge(edge);
        }
        let pruned = graph.prune_isolated();

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            pruned_nodes = pruned,
            "assembled topology"
        );
        graph
    }

    /// Folds edges that join the same node pair along the same path into one,
    /// keeping the longer geometry and the union of attributions.
    fn fold_duplicates(&self, drafts: Vec<(Edge, String)>, issues: &mut IssueLog) -> Vec<(Edge, String)> {
        let tolerance = self.config.node_snap_tolerance_m;
        let mut kept: Vec<(Edge, String)> = Vec::with_capacity(drafts.len());
        let mut by_pair: AHashMap<(NodeId, NodeId), Vec<usize>> = AHashMap::new();

        for (edge, seg_id) in drafts {
            let key = (edge.source.min(edge.target), edge.source.max(edge.target));
            let slots = by_pair.entry(key).or_default();
            let twin = slots.iter().copied().find(|k| {
                self.geometry.hausdorff_distance(&kept[*k].0.coords, &edge.coords) <= tolerance
            });

            match twin {
                Some(k) => {
                    let (rep, rep_id) = &mut kept[k];
                    let attribution: Vec<Attribution> = rep
                        .attribution
                        .iter()
                        .chain(&edge.attribution)
                        .cloned()
                        .sorted()
                        .dedup()
                        .collect();

                    let discarded = if edge.length_m > rep.length_m {
                        let old_id = std::mem::replace(rep_id, seg_id);
                        *rep = edge;
                        old_id
                    } else {
                        seg_id
                    };
                    rep.attribution = attribution;
                    debug!(kept = %rep_id, discarded = %discarded, "folded duplicate edge");
                    issues.exclude(
                        Phase::Topology,
                        IssueKind::DuplicateEdge,
                        discarded,
                        format!("duplicates {rep_id} within {tolerance} m"),
                    );
                }
                None => {
                    slots.push(kept.len());
                    kept.push((edge, seg_id));
                }
            }
        }
        kept
    }
}

/// Inserts a synthetic connector between two existing nodes.
pub fn add_bridge_edge(graph: &mut TrailGraph, a: NodeId, b: NodeId) -> Option<EdgeId> {
    if a == b {
        return None;
    }
    let (na, nb) = (graph.node(a)?, graph.node(b)?);
    let coords = vec![na.coord, nb.coord];
    let elevations = vec![na.elevation, nb.elevation];
    let (gain, loss) = gain_and_loss(&elevations);
    let length_m = crate::geometry::polyline_length(&coords);

    graph.add_edge(Edge {
        id: EdgeId(0),
        source: a,
        target: b,
        coords,
        elevations,
        length_m,
        elevation_gain: gain,
        elevation_loss: loss,
        attribution: Vec::new(),
        merged_from: Vec::new(),
        is_loop: false,
        is_bridge: true,
    })
}
