// ===========================================================================
// Trail splitting: cut lines at detected split points into segments
// ===========================================================================

use ahash::AHashMap;
use geo::Coord;
use ordered_float::OrderedFloat;
use tracing::info;

use crate::config::GraphBuildConfig;
use crate::errors::{IssueKind, IssueLog, Phase};
use crate::geometry::{GeometryEngine, cumulative_measures, interpolate_profile};
use crate::intersections::Detection;
use crate::model::{EndpointKind, Segment, SplitPoint};
use crate::preprocess::PreparedTrail;

/// The unsplit trail as a single segment.
pub fn whole_segment(trail: &PreparedTrail) -> Segment {
    Segment {
        id: format!("{}-0", trail.id),
        trail_id: trail.id.clone(),
        trail_name: trail.name.clone(),
        order: 0,
        coords: trail.coords.clone(),
        elevations: trail.elevations.clone(),
        length_m: trail.length_m,
        elevation_gain: trail.elevation_gain,
        elevation_loss: trail.elevation_loss,
        is_loop: trail.closed,
        start_kind: EndpointKind::TrailEnd,
        end_kind: EndpointKind::TrailEnd,
        parent_measure: 0.0,
    }
}

/// Re-assigns order indices and ids per parent trail, following the parent's direction.
pub fn renumber(segments: &mut [Segment]) {
    segments.sort_by(|a, b| {
        a.trail_id
            .cmp(&b.trail_id)
            .then(OrderedFloat(a.parent_measure).cmp(&OrderedFloat(b.parent_measure)))
    });
    let mut next_order: AHashMap<String, usize> = AHashMap::new();
    for seg in segments.iter_mut() {
        let order = next_order.entry(seg.trail_id.clone()).or_insert(0);
        seg.order = *order;
        seg.id = format!("{}-{}", seg.trail_id, seg.order);
        *order += 1;
    }
}

pub struct TrailSplitter<'a, G: GeometryEngine> {
    geometry: &'a G,
    config: &'a GraphBuildConfig,
}

impl<'a, G: GeometryEngine> TrailSplitter<'a, G> {
    pub fn new(geometry: &'a G, config: &'a GraphBuildConfig) -> Self {
        Self { geometry, config }
    }

    /// Finds `split` on the snapped geometry. Snaps only move the first and last
    /// vertex, so the split stays on the same leg and is projected onto it.
    fn remap_measure(&self, split: &SplitPoint, old_cum: &[f64], coords: &[Coord], cum: &[f64]) -> f64 {
        let legs = old_cum.len().saturating_sub(1);
        if legs == 0 {
            return split.measure;
        }
        let k = (1..=legs).find(|k| split.measure <= old_cum[*k]).unwrap_or(legs);
        self.geometry
            .closest_point(&coords[k - 1..=k], split.coord)
            .map_or(split.measure, |pos| cum[k - 1] + pos.measure)
    }

    /// Applies endpoint snaps and cuts every line at its split points.
    /// Lines the detector excluded are dropped; the result is renumbered.
    pub fn split(&self, lines: &[Segment], detection: &Detection, issues: &mut IssueLog) -> Vec<Segment> {
        let mut snaps_by_line: AHashMap<usize, Vec<(bool, Coord)>> = AHashMap::new();
        for snap in &detection.snaps {
            snaps_by_line
                .entry(snap.line)
                .or_default()
                .push((snap.at_start, snap.to));
        }

        let mut out = Vec::with_capacity(lines.len() + detection.split_count());
        let mut dropped = 0;
        for (i, line) in lines.iter().enumerate() {
            if detection.excluded.contains(&i) {
                continue;
            }
            let snaps = snaps_by_line.get(&i).map_or(&[][..], Vec::as_slice);
            let splits = detection.splits.get(i).map_or(&[][..], Vec::as_slice);
            let (pieces, short) = self.split_line(line, splits, snaps, issues);
            out.extend(pieces);
            dropped += short;
        }

        renumber(&mut out);
        info!(
            lines = lines.len(),
            segments = out.len(),
            dropped_short = dropped,
            "split lines into segments"
        );
        out
    }

    fn split_line(
        &self,
        line: &Segment,
        splits: &[SplitPoint],
        snaps: &[(bool, Coord)],
        issues: &mut IssueLog,
    ) -> (Vec<Segment>, usize) {
        let old_cum = cumulative_measures(&line.coords);
        let mut coords = line.coords.clone();
        let last = coords.len() - 1;
        for (at_start, to) in snaps {
            if *at_start {
                coords[0] = *to;
            } else {
                coords[last] = *to;
            }
        }
        let cum = cumulative_measures(&coords);
        let length = cum[last];

        let mut cuts: Vec<(f64, SplitPoint)> = if snaps.is_empty() {
            splits.iter().map(|s| (s.measure, *s)).collect()
        } else {
            splits
                .iter()
                .map(|s| (self.remap_measure(s, &old_cum, &coords, &cum), *s))
                .collect()
        };
        cuts.sort_by(|a, b| a.0.total_cmp(&b.0));
        let measures: Vec<f64> = cuts.iter().map(|(m, _)| *m).collect();

        let kind_at = |m: f64| -> EndpointKind {
            cuts.iter()
                .min_by(|a, b| (a.0 - m).abs().total_cmp(&(b.0 - m).abs()))
                .map_or(EndpointKind::TrailEnd, |(_, s)| EndpointKind::Split(s.origin))
        };

        let pieces = self.geometry.split_at_measures(&coords, &measures);
        let piece_count = pieces.len();
        let mut segments = Vec::with_capacity(piece_count);
        let mut short = 0;

        for (k, piece) in pieces.into_iter().enumerate() {
            let start_m = piece.measures[0];
            let end_m = piece.measures[piece.measures.len() - 1];
            let mut piece_coords = piece.coords;
            let length_m = self.geometry.length(&piece_coords);

            if length_m < self.config.min_segment_length_m {
                issues.exclude(
                    Phase::Split,
                    IssueKind::BelowMinimumLength,
                    format!("{}@{:.2}", line.trail_id, line.parent_measure + start_m),
                    format!(
                        "segment of {length_m:.3} m below minimum {} m",
                        self.config.min_segment_length_m
                    ),
                );
                short += 1;
                continue;
            }

            let elevations: Vec<f64> = piece
                .measures
                .iter()
                .map(|m| interpolate_profile(&cum, &line.elevations, *m))
                .collect();

            let n = piece_coords.len();
            let is_loop = n > 2
                && self.geometry.distance(piece_coords[0], piece_coords[n - 1])
                    <= self.config.node_snap_tolerance_m;
            if is_loop {
                piece_coords[n - 1] = piece_coords[0];
            }

            let share = if length > 0.0 { length_m / length } else { 1.0 };
            segments.push(Segment {
                id: format!("{}-{}", line.trail_id, k),
                trail_id: line.trail_id.clone(),
                trail_name: line.trail_name.clone(),
                order: k,
                coords: piece_coords,
                elevations,
                length_m,
                elevation_gain: line.elevation_gain * share,
                elevation_loss: line.elevation_loss * share,
                is_loop,
                start_kind: if k == 0 { line.start_kind } else { kind_at(start_m) },
                end_kind: if k + 1 == piece_count {
                    line.end_kind
                } else {
                    kind_at(end_m)
                },
                parent_measure: line.parent_measure + start_m,
            });
        }
        (segments, short)
    }
}
