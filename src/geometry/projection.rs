use geo::Coord;

use crate::config::CoordinateSpace;

/// Equirectangular plane touching the earth at a run's center. Distances stay
/// within a fraction of a percent across a trail network, and both directions
/// are a handful of multiplications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentPlane {
    center: Coord,
    /// Meters per radian of longitude at the center latitude.
    east_scale: f64,
}

impl TangentPlane {
    /// Mean earth radius, meters.
    const RADIUS_M: f64 = 6_371_007.2;

    pub fn centered_at(lon: f64, lat: f64) -> Self {
        Self {
            center: Coord {
                x: lon.to_radians(),
                y: lat.to_radians(),
            },
            east_scale: Self::RADIUS_M * lat.to_radians().cos(),
        }
    }

    /// Degrees to meters east and north of the center.
    pub fn to_plane(&self, lon: f64, lat: f64) -> Coord {
        Coord {
            x: (lon.to_radians() - self.center.x) * self.east_scale,
            y: (lat.to_radians() - self.center.y) * Self::RADIUS_M,
        }
    }

    pub fn to_lon_lat(&self, c: Coord) -> (f64, f64) {
        (
            (self.center.x + c.x / self.east_scale).to_degrees(),
            (self.center.y + c.y / Self::RADIUS_M).to_degrees(),
        )
    }
}

/// Maps input coordinates into the metric working plane of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Tangent(TangentPlane),
    Identity,
}

impl Projection {
    /// Picks the projection for a run: a tangent plane centered on the bounding
    /// box of all finite input points, or identity for planar input.
    pub fn for_points<'a>(
        space: CoordinateSpace,
        points: impl IntoIterator<Item = &'a [f64; 3]>,
    ) -> Self {
        match space {
            CoordinateSpace::Planar => Projection::Identity,
            CoordinateSpace::Wgs84 => {
                let (mut min_x, mut min_y, mut max_x, mut max_y) =
                    (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
                for p in points {
                    if !(p[0].is_finite() && p[1].is_finite()) {
                        continue;
                    }
                    min_x = min_x.min(p[0]);
                    min_y = min_y.min(p[1]);
                    max_x = max_x.max(p[0]);
                    max_y = max_y.max(p[1]);
                }
                if min_x > max_x {
                    return Projection::Tangent(TangentPlane::centered_at(0.0, 0.0));
                }
                Projection::Tangent(TangentPlane::centered_at(
                    (min_x + max_x) / 2.0,
                    (min_y + max_y) / 2.0,
                ))
            }
        }
    }

    pub fn project(&self, x: f64, y: f64) -> Coord {
        match self {
            Projection::Tangent(plane) => plane.to_plane(x, y),
            Projection::Identity => Coord { x, y },
        }
    }

    pub fn unproject(&self, c: Coord) -> (f64, f64) {
        match self {
            Projection::Tangent(plane) => plane.to_lon_lat(c),
            Projection::Identity => (c.x, c.y),
        }
    }
}
