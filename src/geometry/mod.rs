//! Geometry primitives used by the pipeline, behind the [`GeometryEngine`] seam.

mod planar;
pub mod projection;

pub use planar::PlanarGeometryEngine;
pub use projection::{Projection, TangentPlane};

use geo::Coord;

use crate::errors::GraphBuildError;

/// Measures closer than this (meters) are the same location along a line.
pub const MEASURE_EPSILON: f64 = 1e-7;

/// Closest location on a polyline to a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePosition {
    pub point: Coord,
    /// Distance along the line from its start.
    pub measure: f64,
    /// Distance from the query point to `point`.
    pub distance: f64,
    /// Index of the line segment holding `point`.
    pub segment: usize,
}

/// A point where two polylines (or one polyline with itself) meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineCrossing {
    pub point: Coord,
    pub measure_a: f64,
    pub measure_b: f64,
    /// End of a collinear overlap rather than a point crossing.
    pub overlap: bool,
}

/// A piece of a polyline cut at measures, with the parent measure of every vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPiece {
    pub coords: Vec<Coord>,
    pub measures: Vec<f64>,
}

/// Primitive geometry operations, in a metric plane.
pub trait GeometryEngine {
    fn distance(&self, a: Coord, b: Coord) -> f64;

    fn length(&self, line: &[Coord]) -> f64;

    fn closest_point(&self, line: &[Coord], p: Coord) -> Option<LinePosition>;

    /// All points where `a` meets `b`, including both ends of collinear overlaps.
    fn crossings(&self, a: &[Coord], b: &[Coord]) -> Result<Vec<LineCrossing>, GraphBuildError>;

    /// Points where a line meets itself away from shared vertices of consecutive segments.
    fn self_crossings(&self, line: &[Coord]) -> Result<Vec<LineCrossing>, GraphBuildError>;

    /// Cuts a line at the given measures, inserting interpolated vertices as needed.
    fn split_at_measures(&self, line: &[Coord], measures: &[f64]) -> Vec<SplitPiece>;

    /// Joins `b` onto the end of `a` when `a` ends where `b` starts (within `tolerance`).
    fn merge_lines(&self, a: &[Coord], b: &[Coord], tolerance: f64) -> Option<Vec<Coord>>;

    /// No self-crossings other than a closure of the first and last point.
    fn is_simple(&self, line: &[Coord]) -> bool;

    /// Symmetric Hausdorff distance between two lines.
    fn hausdorff_distance(&self, a: &[Coord], b: &[Coord]) -> f64;
}

/// Cumulative distance of every vertex from the start of the line.
pub fn cumulative_measures(line: &[Coord]) -> Vec<f64> {
    let mut out = Vec::with_capacity(line.len());
    let mut acc = 0.0;
    for (i, c) in line.iter().enumerate() {
        if i > 0 {
            acc += coord_distance(line[i - 1], *c);
        }
        out.push(acc);
    }
    out
}

pub fn coord_distance(a: Coord, b: Coord) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

pub fn polyline_length(line: &[Coord]) -> f64 {
    line.windows(2).map(|w| coord_distance(w[0], w[1])).sum()
}

/// Length including vertical change between vertices.
pub fn polyline_length_3d(line: &[Coord], elevations: &[f64]) -> f64 {
    line.windows(2)
        .zip(elevations.windows(2))
        .map(|(w, z)| {
            let flat = coord_distance(w[0], w[1]);
            (flat * flat + (z[1] - z[0]).powi(2)).sqrt()
        })
        .sum()
}

/// Linear interpolation of a per-vertex value at `measure`.
pub fn interpolate_profile(measures: &[f64], values: &[f64], measure: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if measure <= measures[0] {
        return values[0];
    }
    for i in 1..measures.len() {
        if measure <= measures[i] {
            let span = measures[i] - measures[i - 1];
            if span <= MEASURE_EPSILON {
                return values[i];
            }
            let t = (measure - measures[i - 1]) / span;
            return values[i - 1] + (values[i] - values[i - 1]) * t;
        }
    }
    values[values.len() - 1]
}

/// Sum of positive and negative elevation changes along a profile.
pub fn gain_and_loss(elevations: &[f64]) -> (f64, f64) {
    let mut gain = 0.0;
    let mut loss = 0.0;
    for w in elevations.windows(2) {
        let d = w[1] - w[0];
        if d > 0.0 {
            gain += d;
        } else {
            loss -= d;
        }
    }
    (gain, loss)
}
