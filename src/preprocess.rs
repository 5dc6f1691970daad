// ===========================================================================
// Geometry preprocessing: validate, repair and project input trails
// ===========================================================================

use ahash::AHashSet;
use geo::Coord;
use tracing::info;

use crate::config::{CoordinateSpace, GraphBuildConfig};
use crate::errors::{IssueKind, IssueLog, Phase};
use crate::geometry::{GeometryEngine, MEASURE_EPSILON, Projection, gain_and_loss};
use crate::model::Trail;

/// A validated trail in working coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTrail {
    pub id: String,
    pub name: String,
    pub coords: Vec<Coord>,
    pub elevations: Vec<f64>,
    pub length_m: f64,
    pub elevation_gain: f64,
    pub elevation_loss: f64,
    /// First and last point coincide (snapped to be identical).
    pub closed: bool,
    /// Geometry crosses itself; accepted and split at the crossings later.
    pub self_intersecting: bool,
}

impl PreparedTrail {
    pub fn is_loop(&self) -> bool {
        self.closed || self.self_intersecting
    }
}

/// Replaces non-finite elevations with the nearest finite neighbour (0.0 if none).
/// Returns how many values were replaced.
fn repair_elevations(values: &mut [f64]) -> usize {
    let original: Vec<f64> = values.to_vec();
    let mut repaired = 0;
    for i in 0..values.len() {
        if original[i].is_finite() {
            continue;
        }
        let mut replacement = 0.0;
        for offset in 1..original.len() {
            let before = i.checked_sub(offset).map(|j| original[j]);
            let after = original.get(i + offset).copied();
            if let Some(v) = before.filter(|v| v.is_finite()) {
                replacement = v;
                break;
            }
            if let Some(v) = after.filter(|v| v.is_finite()) {
                replacement = v;
                break;
            }
        }
        values[i] = replacement;
        repaired += 1;
    }
    repaired
}

fn declared(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Validates every trail, returning the accepted ones in input order.
/// Rejected trails are recorded in `issues`, never dropped silently.
pub fn preprocess<G: GeometryEngine>(
    trails: &[Trail],
    config: &GraphBuildConfig,
    projection: &Projection,
    geometry: &G,
    issues: &mut IssueLog,
) -> Vec<PreparedTrail> {
    let mut seen_ids: AHashSet<&str> = AHashSet::new();
    let mut accepted = Vec::with_capacity(trails.len());

    for trail in trails {
        let reject = |issues: &mut IssueLog, kind: IssueKind, reason: String| {
            issues.exclude(Phase::Preprocess, kind, trail.id.clone(), reason);
        };

        if !seen_ids.insert(trail.id.as_str()) {
            reject(issues, IssueKind::Geometry, "duplicate trail id".to_string());
            continue;
        }
        if trail.points.len() < 2 {
            reject(
                issues,
                IssueKind::Geometry,
                format!("fewer than 2 points ({})", trail.points.len()),
            );
            continue;
        }
        if let Some(bad) = trail
            .points
            .iter()
            .find(|p| !(p[0].is_finite() && p[1].is_finite()))
        {
            reject(
                issues,
                IssueKind::Geometry,
                format!("non-finite coordinate ({}, {})", bad[0], bad[1]),
            );
            continue;
        }
        if config.coordinate_space == CoordinateSpace::Wgs84 {
            if let Some(bad) = trail
                .points
                .iter()
                .find(|p| !(-180.0..=180.0).contains(&p[0]) || !(-90.0..=90.0).contains(&p[1]))
            {
                reject(
                    issues,
                    IssueKind::Geometry,
                    format!("coordinate out of lon/lat range ({}, {})", bad[0], bad[1]),
                );
                continue;
            }
        }

        let mut elevations: Vec<f64> = trail.points.iter().map(|p| p[2]).collect();
        let repaired = repair_elevations(&mut elevations);
        if repaired > 0 {
            issues.flag(
                Phase::Preprocess,
                IssueKind::Repaired,
                trail.id.clone(),
                format!("replaced {repaired} non-finite elevation value(s)"),
            );
        }

        // drop consecutive duplicate vertices
        let mut coords: Vec<Coord> = Vec::with_capacity(trail.points.len());
        let mut elevs: Vec<f64> = Vec::with_capacity(trail.points.len());
        for (p, z) in trail.points.iter().zip(&elevations) {
            let c = projection.project(p[0], p[1]);
            if coords
                .last()
                .is_some_and(|last| geometry.distance(*last, c) <= MEASURE_EPSILON)
            {
                continue;
            }
            coords.push(c);
            elevs.push(*z);
        }
        if coords.len() < 2 {
            reject(
                issues,
                IssueKind::Geometry,
                "fewer than 2 distinct points".to_string(),
            );
            continue;
        }

        let mut length_m = geometry.length(&coords);
        if length_m < config.min_trail_length_m {
            reject(
                issues,
                IssueKind::BelowMinimumLength,
                format!(
                    "length {length_m:.3} m below minimum {} m",
                    config.min_trail_length_m
                ),
            );
            continue;
        }

        let mut closed = false;
        let last = coords.len() - 1;
        if geometry.distance(coords[0], coords[last]) <= config.node_snap_tolerance_m {
            if coords.len() < 3 {
                reject(
                    issues,
                    IssueKind::Geometry,
                    "both ends collapse to one point".to_string(),
                );
                continue;
            }
            coords[last] = coords[0];
            length_m = geometry.length(&coords);
            closed = true;
        }

        let self_intersecting = !geometry.is_simple(&coords);
        let (derived_gain, derived_loss) = gain_and_loss(&elevs);

        accepted.push(PreparedTrail {
            id: trail.id.clone(),
            name: trail.name.clone(),
            coords,
            elevations: elevs,
            length_m,
            elevation_gain: declared(trail.declared_elevation_gain).unwrap_or(derived_gain),
            elevation_loss: declared(trail.declared_elevation_loss).unwrap_or(derived_loss),
            closed,
            self_intersecting,
        });
    }

    info!(
        accepted = accepted.len(),
        rejected = trails.len() - accepted.len(),
        "preprocessed trails"
    );
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlanarGeometryEngine;

    fn run(trails: &[Trail]) -> (Vec<PreparedTrail>, IssueLog) {
        let config = GraphBuildConfig::planar();
        let mut issues = IssueLog::new();
        let out = preprocess(
            trails,
            &config,
            &Projection::Identity,
            &PlanarGeometryEngine::new(),
            &mut issues,
        );
        (out, issues)
    }

    #[test]
    fn rejects_degenerate_trails() {
        let trails = vec![
            Trail::from_xy("single", "", &[(0.0, 0.0)]),
            Trail::from_xy("stacked", "", &[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]),
            Trail::from_xy("tiny", "", &[(0.0, 0.0), (0.0, 0.2)]),
            Trail::from_xy("nan", "", &[(0.0, f64::NAN), (0.0, 10.0)]),
            Trail::from_xy("ok", "", &[(0.0, 0.0), (10.0, 0.0)]),
        ];
        let (out, issues) = run(&trails);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "ok");
        assert_eq!(
            issues.excluded_subjects(Phase::Preprocess),
            vec!["single", "stacked", "tiny", "nan"]
        );
        assert_eq!(issues.count(IssueKind::BelowMinimumLength), 1);
    }

    #[test]
    fn rejects_out_of_range_wgs84() {
        let config = GraphBuildConfig::default();
        let mut issues = IssueLog::new();
        let trails = vec![Trail::from_xy("far", "", &[(200.0, 0.0), (200.1, 0.0)])];
        let projection = Projection::for_points(config.coordinate_space, trails[0].points.iter());
        let out = preprocess(
            &trails,
            &config,
            &projection,
            &PlanarGeometryEngine::new(),
            &mut issues,
        );
        assert!(out.is_empty());
        assert_eq!(issues.count(IssueKind::Geometry), 1);
    }

    #[test]
    fn flags_loops_and_closes_them() {
        let ring = Trail::from_xy(
            "ring",
            "",
            &[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.3)],
        );
        let eight = Trail::from_xy(
            "eight",
            "",
            &[(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)],
        );
        let (out, _) = run(&[ring, eight]);
        assert!(out[0].closed && !out[0].self_intersecting);
        assert_eq!(out[0].coords.first(), out[0].coords.last());
        assert!(out[1].self_intersecting && !out[1].closed);
    }

    #[test]
    fn repairs_elevation_and_derives_gain() {
        let mut trail = Trail::new(
            "hill",
            "Hill",
            vec![[0.0, 0.0, 100.0], [10.0, 0.0, f64::NAN], [20.0, 0.0, 90.0]],
        );
        trail.declared_elevation_loss = Some(4.0);
        let (out, issues) = run(&[trail]);
        assert_eq!(out[0].elevations, vec![100.0, 100.0, 90.0]);
        assert_eq!(out[0].elevation_gain, 0.0);
        assert_eq!(out[0].elevation_loss, 4.0);
        assert_eq!(issues.count(IssueKind::Repaired), 1);
    }

    #[test]
    fn elevation_repair_without_finite_values() {
        let mut values = vec![f64::NAN, f64::INFINITY];
        assert_eq!(repair_elevations(&mut values), 2);
        assert_eq!(values, vec![0.0, 0.0]);
    }
}
