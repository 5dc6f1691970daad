// ===========================================================================
// Intersection detection: crossings, self-crossings, near-miss T-junctions
// ===========================================================================

use ahash::AHashMap;
use geo::Coord;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use tracing::{debug, info};

use crate::config::{GraphBuildConfig, SplitDedupPolicy};
use crate::errors::{GraphBuildError, IssueLog, Phase};
use crate::geometry::{GeometryEngine, LineCrossing, MEASURE_EPSILON};
use crate::model::{EndpointKind, Segment, SplitOrigin, SplitPoint};

type LineEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// An endpoint of line `line` that must move onto another line's interior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointSnap {
    pub line: usize,
    pub at_start: bool,
    pub to: Coord,
}

/// Split points per input line (indexed like the input), plus endpoint snaps.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub splits: Vec<Vec<SplitPoint>>,
    pub snaps: Vec<EndpointSnap>,
    /// Lines dropped because a geometry operation on them failed.
    pub excluded: Vec<usize>,
}

impl Detection {
    pub fn split_count(&self) -> usize {
        self.splits.iter().map(Vec::len).sum()
    }
}

/// Raw split candidate before deduplication. `snap` points back into the snap list.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    point: SplitPoint,
    /// Line whose geometry produced this candidate (itself for self-crossings).
    partner: usize,
    snap: Option<usize>,
}

fn envelope(coords: &[Coord], pad: f64) -> ([f64; 2], [f64; 2]) {
    let mut min = [f64::MAX, f64::MAX];
    let mut max = [f64::MIN, f64::MIN];
    for c in coords {
        min[0] = min[0].min(c.x);
        min[1] = min[1].min(c.y);
        max[0] = max[0].max(c.x);
        max[1] = max[1].max(c.y);
    }
    (
        [min[0] - pad, min[1] - pad],
        [max[0] + pad, max[1] + pad],
    )
}

fn interior(measure: f64, length: f64, margin: f64) -> bool {
    measure > margin && measure < length - margin
}

pub struct IntersectionDetector<'a, G: GeometryEngine> {
    geometry: &'a G,
    config: &'a GraphBuildConfig,
}

impl<'a, G: GeometryEngine> IntersectionDetector<'a, G> {
    pub fn new(geometry: &'a G, config: &'a GraphBuildConfig) -> Self {
        Self { geometry, config }
    }

    /// Finds split points on every line. Lines are processed in input order and
    /// every unordered pair once, lower index first.
    pub fn detect(&self, lines: &[Segment], issues: &mut IssueLog) -> Detection {
        let n = lines.len();
        // a true crossing splits wherever it falls short of the line's own ends
        let margin = MEASURE_EPSILON;
        let mut candidates: Vec<Vec<Candidate>> = vec![Vec::new(); n];
        let mut excluded = vec![false; n];

        // self-crossings
        for (i, line) in lines.iter().enumerate() {
            match self.geometry.self_crossings(&line.coords) {
                Ok(crossings) => {
                    for c in crossings {
                        for m in [c.measure_a, c.measure_b] {
                            if interior(m, line.length_m, margin) {
                                candidates[i].push(Candidate {
                                    point: SplitPoint {
                                        coord: c.point,
                                        measure: m,
                                        origin: SplitOrigin::SelfIntersection,
                                    },
                                    partner: i,
                                    snap: None,
                                });
                            }
                        }
                    }
                }
                Err(err) => {
                    issues.record_error(Phase::Detect, line.trail_id.clone(), &err, true);
                    excluded[i] = true;
                }
            }
        }

        // pairwise crossings, batch by batch
        let batch_size = self.config.batch_size.max(1);
        let batch_count = n.div_ceil(batch_size);
        let mut batch_no = 0;
        for bi in 0..batch_count {
            for bj in bi..batch_count {
                let failures = self.detect_batch(
                    lines,
                    bi * batch_size..((bi + 1) * batch_size).min(n),
                    bj * batch_size..((bj + 1) * batch_size).min(n),
                    &excluded,
                    &mut candidates,
                );
                if !failures.is_empty() {
                    self.isolate_failures(lines, batch_no, &failures, &mut excluded, issues);
                }
                batch_no += 1;
            }
        }

        // drop whatever an excluded line contributed to the others
        for (i, list) in candidates.iter_mut().enumerate() {
            if excluded[i] {
                list.clear();
            } else {
                list.retain(|c| !excluded[c.partner]);
            }
        }

        let mut snaps = Vec::new();
        self.detect_t_junctions(lines, &excluded, &mut candidates, &mut snaps);

        let mut splits = Vec::with_capacity(n);
        for (i, list) in candidates.into_iter().enumerate() {
            splits.push(self.dedup(&lines[i], list, &mut snaps, issues));
        }

        let detection = Detection {
            splits,
            snaps,
            excluded: (0..n).filter(|i| excluded[*i]).collect(),
        };
        info!(
            lines = n,
            split_points = detection.split_count(),
            snaps = detection.snaps.len(),
            excluded = detection.excluded.len(),
            "intersection detection done"
        );
        detection
    }

    /// Runs every candidate pair between two batches. Returns the failing pairs.
    fn detect_batch(
        &self,
        lines: &[Segment],
        left: std::ops::Range<usize>,
        right: std::ops::Range<usize>,
        excluded: &[bool],
        candidates: &mut [Vec<Candidate>],
    ) -> Vec<(usize, usize, GraphBuildError)> {
        let margin = MEASURE_EPSILON;
        let tree: RTree<LineEnvelope> = RTree::bulk_load(
            right
                .clone()
                .filter(|j| !excluded[*j])
                .map(|j| {
                    let (lo, hi) = envelope(&lines[j].coords, 0.0);
                    GeomWithData::new(Rectangle::from_corners(lo, hi), j)
                })
                .collect(),
        );

        let mut failures = Vec::new();
        for i in left {
            if excluded[i] {
                continue;
            }
            let (lo, hi) = envelope(&lines[i].coords, 0.0);
            let mut partners: Vec<usize> = tree
                .locate_in_envelope_intersecting(&AABB::from_corners(lo, hi))
                .map(|hit| hit.data)
                .filter(|j| *j > i)
                .collect();
            partners.sort_unstable();

            for j in partners {
                let (a, b) = (&lines[i], &lines[j]);
                let crossings = match self.geometry.crossings(&a.coords, &b.coords) {
                    Ok(c) => c,
                    Err(err) => {
                        failures.push((i, j, err));
                        continue;
                    }
                };
                for LineCrossing {
                    point,
                    measure_a,
                    measure_b,
                    overlap,
                } in crossings
                {
                    if overlap {
                        debug!(a = %a.id, b = %b.id, "collinear overlap");
                    }
                    let split = |measure: f64| SplitPoint {
                        coord: point,
                        measure,
                        origin: SplitOrigin::Crossing,
                    };
                    if interior(measure_a, a.length_m, margin) {
                        candidates[i].push(Candidate {
                            point: split(measure_a),
                            partner: j,
                            snap: None,
                        });
                    }
                    if interior(measure_b, b.length_m, margin) {
                        candidates[j].push(Candidate {
                            point: split(measure_b),
                            partner: i,
                            snap: None,
                        });
                    }
                }
            }
        }
        failures
    }

    /// Blames and excludes the records behind failing pairs: a line failing
    /// against several partners is blamed first, otherwise the later line of a pair.
    fn isolate_failures(
        &self,
        lines: &[Segment],
        batch: usize,
        failures: &[(usize, usize, GraphBuildError)],
        excluded: &mut [bool],
        issues: &mut IssueLog,
    ) {
        let mut fail_count: AHashMap<usize, usize> = AHashMap::new();
        for (i, j, _) in failures {
            *fail_count.entry(*i).or_default() += 1;
            *fail_count.entry(*j).or_default() += 1;
        }

        for (i, j, err) in failures {
            if excluded[*i] || excluded[*j] {
                continue;
            }
            let (ci, cj) = (fail_count[i], fail_count[j]);
            let blamed = if ci > cj { *i } else { *j };
            excluded[blamed] = true;

            let failure = GraphBuildError::BatchProcessingFailure {
                batch,
                reason: format!(
                    "{} failed against {}: {}",
                    lines[blamed].id,
                    lines[if blamed == *i { *j } else { *i }].id,
                    err
                ),
            };
            issues.record_error(Phase::Detect, lines[blamed].trail_id.clone(), &failure, true);
        }
    }

    /// Snaps free trail ends onto the interior of the nearest other trail within
    /// the intersection tolerance. Ends of the same trail are never snapped onto it.
    fn detect_t_junctions(
        &self,
        lines: &[Segment],
        excluded: &[bool],
        candidates: &mut [Vec<Candidate>],
        snaps: &mut Vec<EndpointSnap>,
    ) {
        let reach = self.config.intersection_tolerance_m;
        let margin = self.config.node_snap_tolerance_m;
        let tree: RTree<LineEnvelope> = RTree::bulk_load(
            lines
                .iter()
                .enumerate()
                .filter(|(j, _)| !excluded[*j])
                .map(|(j, line)| {
                    let (lo, hi) = envelope(&line.coords, reach);
                    GeomWithData::new(Rectangle::from_corners(lo, hi), j)
                })
                .collect(),
        );

        for (i, line) in lines.iter().enumerate() {
            if excluded[i] || line.is_loop {
                continue;
            }
            for at_start in [true, false] {
                let kind = if at_start { line.start_kind } else { line.end_kind };
                if kind != EndpointKind::TrailEnd {
                    continue;
                }
                let end = if at_start { line.start() } else { line.end() };

                // a line already crossing the host is joined to it by that crossing
                let mut hits: Vec<usize> = tree
                    .locate_all_at_point(&[end.x, end.y])
                    .map(|hit| hit.data)
                    .filter(|j| lines[*j].trail_id != line.trail_id)
                    .filter(|j| {
                        !candidates[*j].iter().any(|c| c.partner == i)
                            && !candidates[i].iter().any(|c| c.partner == *j)
                    })
                    .collect();
                hits.sort_unstable();

                let mut best: Option<(usize, SplitPoint, f64)> = None;
                for j in hits {
                    let Some(pos) = self.geometry.closest_point(&lines[j].coords, end) else {
                        continue;
                    };
                    if pos.distance > reach || !interior(pos.measure, lines[j].length_m, margin) {
                        continue;
                    }
                    if best.is_none_or(|(_, _, d)| pos.distance < d) {
                        best = Some((
                            j,
                            SplitPoint {
                                coord: pos.point,
                                measure: pos.measure,
                                origin: SplitOrigin::SnappedEndpoint,
                            },
                            pos.distance,
                        ));
                    }
                }

                if let Some((j, point, distance)) = best {
                    debug!(
                        from = %line.id,
                        onto = %lines[j].id,
                        distance,
                        "snapping trail end onto interior"
                    );
                    snaps.push(EndpointSnap {
                        line: i,
                        at_start,
                        to: point.coord,
                    });
                    candidates[j].push(Candidate {
                        point,
                        partner: i,
                        snap: Some(snaps.len() - 1),
                    });
                }
            }
        }
    }

    /// Collapses candidates that describe the same location, following the
    /// configured policy. Snaps are re-targeted onto the surviving point.
    fn dedup(
        &self,
        line: &Segment,
        mut list: Vec<Candidate>,
        snaps: &mut [EndpointSnap],
        issues: &mut IssueLog,
    ) -> Vec<SplitPoint> {
        if list.is_empty() {
            return Vec::new();
        }
        list.sort_by(|a, b| a.point.measure.total_cmp(&b.point.measure));

        let width = match self.config.split_point_dedup {
            SplitDedupPolicy::Merge => self.config.node_snap_tolerance_m,
            SplitDedupPolicy::KeepAll => MEASURE_EPSILON,
        };

        let mut clusters: Vec<Vec<Candidate>> = Vec::new();
        for c in list {
            let starts_cluster = clusters
                .last()
                .is_none_or(|cluster| c.point.measure - cluster[0].point.measure > width);
            if starts_cluster {
                clusters.push(vec![c]);
            } else if let Some(cluster) = clusters.last_mut() {
                cluster.push(c);
            }
        }

        let mut out = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let Some(rep) = cluster
                .iter()
                .min_by(|a, b| {
                    a.point
                        .origin
                        .priority()
                        .cmp(&b.point.origin.priority())
                        .then(a.point.measure.total_cmp(&b.point.measure))
                })
                .map(|c| c.point)
            else {
                continue;
            };

            let distinct = cluster
                .iter()
                .filter(|c| (c.point.measure - rep.measure).abs() > MEASURE_EPSILON)
                .count();
            if distinct > 0 {
                let ambiguity = GraphBuildError::ToleranceAmbiguity {
                    trail_id: line.trail_id.clone(),
                    count: distinct + 1,
                    tolerance_m: width,
                };
                issues.record_error(Phase::Detect, line.trail_id.clone(), &ambiguity, false);
            }

            for c in &cluster {
                if let Some(s) = c.snap {
                    snaps[s].to = rep.coord;
                }
            }
            out.push(rep);
        }
        out
    }
}
