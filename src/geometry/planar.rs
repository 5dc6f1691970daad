use geo::line_intersection::line_intersection;
use geo::{Coord, Line, LineIntersection};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};

use super::{
    GeometryEngine, LineCrossing, LinePosition, MEASURE_EPSILON, SplitPiece, coord_distance,
    cumulative_measures, polyline_length,
};
use crate::errors::GraphBuildError;

/// Segment pairs beyond this count are found through an R-tree instead of a nested scan.
const INDEX_THRESHOLD: usize = 1024;

type IndexedSegment = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// `geo`-backed engine working on Euclidean coordinates in meters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarGeometryEngine;

impl PlanarGeometryEngine {
    pub fn new() -> Self {
        Self
    }
}

fn segment_rect(a: Coord, b: Coord) -> Rectangle<[f64; 2]> {
    Rectangle::from_corners([a.x.min(b.x), a.y.min(b.y)], [a.x.max(b.x), a.y.max(b.y)])
}

fn segment_aabb(a: Coord, b: Coord) -> AABB<[f64; 2]> {
    AABB::from_corners([a.x.min(b.x), a.y.min(b.y)], [a.x.max(b.x), a.y.max(b.y)])
}

fn boxes_touch(a0: Coord, a1: Coord, b0: Coord, b1: Coord) -> bool {
    a0.x.min(a1.x) <= b0.x.max(b1.x)
        && b0.x.min(b1.x) <= a0.x.max(a1.x)
        && a0.y.min(a1.y) <= b0.y.max(b1.y)
        && b0.y.min(b1.y) <= a0.y.max(a1.y)
}

/// Index pairs of segments of `a` and `b` whose bounding boxes touch.
fn candidate_segment_pairs(a: &[Coord], b: &[Coord]) -> Vec<(usize, usize)> {
    let na = a.len().saturating_sub(1);
    let nb = b.len().saturating_sub(1);
    let mut pairs = Vec::new();

    if na * nb <= INDEX_THRESHOLD {
        for i in 0..na {
            for j in 0..nb {
                if boxes_touch(a[i], a[i + 1], b[j], b[j + 1]) {
                    pairs.push((i, j));
                }
            }
        }
        return pairs;
    }

    let tree: RTree<IndexedSegment> = RTree::bulk_load(
        (0..nb)
            .map(|j| GeomWithData::new(segment_rect(b[j], b[j + 1]), j))
            .collect(),
    );
    for i in 0..na {
        for hit in tree.locate_in_envelope_intersecting(&segment_aabb(a[i], a[i + 1])) {
            pairs.push((i, hit.data));
        }
    }
    pairs.sort_unstable();
    pairs
}

fn intersect_pair(
    a: &[Coord],
    b: &[Coord],
    cum_a: &[f64],
    cum_b: &[f64],
    i: usize,
    j: usize,
    out: &mut Vec<LineCrossing>,
) {
    let la = Line::new(a[i], a[i + 1]);
    let lb = Line::new(b[j], b[j + 1]);
    match line_intersection(la, lb) {
        Some(LineIntersection::SinglePoint { intersection, .. }) => out.push(LineCrossing {
            point: intersection,
            measure_a: cum_a[i] + coord_distance(a[i], intersection),
            measure_b: cum_b[j] + coord_distance(b[j], intersection),
            overlap: false,
        }),
        Some(LineIntersection::Collinear { intersection }) => {
            for p in [intersection.start, intersection.end] {
                out.push(LineCrossing {
                    point: p,
                    measure_a: cum_a[i] + coord_distance(a[i], p),
                    measure_b: cum_b[j] + coord_distance(b[j], p),
                    overlap: true,
                });
            }
        }
        None => {}
    }
}

/// Whether the leg `b -> c` runs back over the leg `a -> b`.
fn folds_back(a: Coord, b: Coord, c: Coord) -> bool {
    matches!(
        line_intersection(Line::new(a, b), Line::new(b, c)),
        Some(LineIntersection::Collinear { intersection })
            if coord_distance(intersection.start, intersection.end) > MEASURE_EPSILON
    )
}

fn check_finite(crossings: &[LineCrossing]) -> Result<(), GraphBuildError> {
    match crossings
        .iter()
        .find(|c| !(c.point.x.is_finite() && c.point.y.is_finite()))
    {
        Some(bad) => Err(GraphBuildError::geometry(
            "crossing",
            format!("non-finite intersection point {:?}", bad.point),
        )),
        None => Ok(()),
    }
}

impl GeometryEngine for PlanarGeometryEngine {
    fn distance(&self, a: Coord, b: Coord) -> f64 {
        coord_distance(a, b)
    }

    fn length(&self, line: &[Coord]) -> f64 {
        polyline_length(line)
    }

    fn closest_point(&self, line: &[Coord], p: Coord) -> Option<LinePosition> {
        if line.is_empty() {
            return None;
        }
        if line.len() == 1 {
            return Some(LinePosition {
                point: line[0],
                measure: 0.0,
                distance: coord_distance(line[0], p),
                segment: 0,
            });
        }

        let mut best: Option<LinePosition> = None;
        let mut acc = 0.0;
        for i in 0..line.len() - 1 {
            let (a, b) = (line[i], line[i + 1]);
            let dx = b.x - a.x;
            let dy = b.y - a.y;
            let seg_len_sq = dx * dx + dy * dy;
            let t = if seg_len_sq > 0.0 {
                (((p.x - a.x) * dx + (p.y - a.y) * dy) / seg_len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let proj = Coord {
                x: a.x + dx * t,
                y: a.y + dy * t,
            };
            let d = coord_distance(proj, p);
            if best.is_none_or(|b| d < b.distance) {
                best = Some(LinePosition {
                    point: proj,
                    measure: acc + seg_len_sq.sqrt() * t,
                    distance: d,
                    segment: i,
                });
            }
            acc += seg_len_sq.sqrt();
        }
        best
    }

    fn crossings(&self, a: &[Coord], b: &[Coord]) -> Result<Vec<LineCrossing>, GraphBuildError> {
        if a.len() < 2 || b.len() < 2 {
            return Ok(Vec::new());
        }
        let cum_a = cumulative_measures(a);
        let cum_b = cumulative_measures(b);
        let mut out = Vec::new();
        for (i, j) in candidate_segment_pairs(a, b) {
            intersect_pair(a, b, &cum_a, &cum_b, i, j, &mut out);
        }
        check_finite(&out)?;
        out.sort_by(|x, y| x.measure_a.total_cmp(&y.measure_a));
        Ok(out)
    }

    fn self_crossings(&self, line: &[Coord]) -> Result<Vec<LineCrossing>, GraphBuildError> {
        if line.len() < 3 {
            return Ok(Vec::new());
        }
        let cum = cumulative_measures(line);
        let mut out = Vec::new();
        for (i, j) in candidate_segment_pairs(line, line) {
            // consecutive segments share a vertex, which only counts when they fold back
            if j <= i || (j == i + 1 && !folds_back(line[i], line[j], line[j + 1])) {
                continue;
            }
            intersect_pair(line, line, &cum, &cum, i, j, &mut out);
        }
        check_finite(&out)?;
        out.sort_by(|x, y| x.measure_a.total_cmp(&y.measure_a));
        Ok(out)
    }

    fn split_at_measures(&self, line: &[Coord], measures: &[f64]) -> Vec<SplitPiece> {
        if line.len() < 2 {
            return vec![SplitPiece {
                coords: line.to_vec(),
                measures: vec![0.0; line.len()],
            }];
        }
        let cum = cumulative_measures(line);
        let total = cum[cum.len() - 1];

        let mut cuts: Vec<f64> = measures
            .iter()
            .copied()
            .filter(|m| *m > MEASURE_EPSILON && *m < total - MEASURE_EPSILON)
            .collect();
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|b, a| (*b - *a).abs() <= MEASURE_EPSILON);
        let mut cuts = cuts.into_iter().peekable();

        let mut pieces = Vec::with_capacity(measures.len() + 1);
        let mut coords = vec![line[0]];
        let mut piece_measures = vec![0.0];

        for i in 0..line.len() - 1 {
            let (a, b) = (line[i], line[i + 1]);
            let (ma, mb) = (cum[i], cum[i + 1]);

            while let Some(&m) = cuts.peek() {
                if m >= mb - MEASURE_EPSILON {
                    break;
                }
                let t = if mb - ma > 0.0 { (m - ma) / (mb - ma) } else { 0.0 };
                let p = Coord {
                    x: a.x + (b.x - a.x) * t,
                    y: a.y + (b.y - a.y) * t,
                };
                coords.push(p);
                piece_measures.push(m);
                pieces.push(SplitPiece {
                    coords: std::mem::replace(&mut coords, vec![p]),
                    measures: std::mem::replace(&mut piece_measures, vec![m]),
                });
                cuts.next();
            }

            coords.push(b);
            piece_measures.push(mb);

            // cut landing on the vertex itself
            if let Some(&m) = cuts.peek() {
                if (m - mb).abs() <= MEASURE_EPSILON {
                    pieces.push(SplitPiece {
                        coords: std::mem::replace(&mut coords, vec![b]),
                        measures: std::mem::replace(&mut piece_measures, vec![mb]),
                    });
                    cuts.next();
                }
            }
        }

        if coords.len() >= 2 {
            pieces.push(SplitPiece {
                coords,
                measures: piece_measures,
            });
        }
        pieces
    }

    fn merge_lines(&self, a: &[Coord], b: &[Coord], tolerance: f64) -> Option<Vec<Coord>> {
        let (last, first) = (a.last()?, b.first()?);
        if coord_distance(*last, *first) > tolerance {
            return None;
        }
        let mut merged = Vec::with_capacity(a.len() + b.len() - 1);
        merged.extend_from_slice(a);
        merged.extend_from_slice(&b[1..]);
        Some(merged)
    }

    fn is_simple(&self, line: &[Coord]) -> bool {
        let total = polyline_length(line);
        let at_end = |m: f64| m <= MEASURE_EPSILON || m >= total - MEASURE_EPSILON;
        match self.self_crossings(line) {
            Ok(crossings) => crossings
                .iter()
                .all(|c| at_end(c.measure_a) && at_end(c.measure_b)),
            Err(_) => false,
        }
    }

    fn hausdorff_distance(&self, a: &[Coord], b: &[Coord]) -> f64 {
        if a.is_empty() || b.is_empty() {
            return f64::INFINITY;
        }
        let directed = |source: &[Coord], target: &[Coord]| -> f64 {
            source.iter().fold(0.0f64, |max_d, &p| {
                let d = self
                    .closest_point(target, p)
                    .map(|pos| pos.distance)
                    .unwrap_or(f64::INFINITY);
                max_d.max(d)
            })
        };
        directed(a, b).max(directed(b, a))
    }
}
