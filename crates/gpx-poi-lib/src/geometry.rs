//! Geometry helpers for route corridors and POI snapping
//!
//! Coordinates are WGS84 with `x = longitude` and `y = latitude`. Operations
//! that need metric units (buffering, simplification, snapping) run in a local
//! equirectangular projection centred on the route, using the spherical
//! approximation of [`METERS_PER_DEGREE_LAT`] meters per degree of latitude and
//! that value scaled by `cos(latitude)` per degree of longitude.

use geo::{
    Buffer, Closest, ClosestPoint, Contains, Coord, LineString, MapCoords, MultiPolygon, Point,
    Polygon, Rect, SimplifyIdx,
};

/// Meters per degree of latitude
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Sphere radius matching [`METERS_PER_DEGREE_LAT`] (2πR / 360)
pub const EARTH_RADIUS_M: f64 = METERS_PER_DEGREE_LAT * 180.0 / std::f64::consts::PI;

/// Narrowest buffer ever built, so polygons never collapse
pub const MIN_WIDTH_M: f64 = 5.0;

/// Lower bound for `cos(latitude)` near the poles
const MIN_COS_LAT: f64 = 1e-6;

/// Meters per degree of longitude at the given latitude
#[inline(always)]
pub fn meters_per_degree_lon(lat: f64) -> f64 {
    METERS_PER_DEGREE_LAT * lat.to_radians().cos().max(MIN_COS_LAT)
}

/// Equirectangular projection to meters around a fixed origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalProjection {
    origin: Coord<f64>,
    meters_per_degree_lon: f64,
}

impl LocalProjection {
    pub fn new(origin: Coord<f64>) -> Self {
        Self {
            origin,
            meters_per_degree_lon: meters_per_degree_lon(origin.y),
        }
    }

    /// Projection centred on a bounding box
    pub fn for_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.center())
    }

    #[inline(always)]
    pub fn project(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (c.x - self.origin.x) * self.meters_per_degree_lon,
            y: (c.y - self.origin.y) * METERS_PER_DEGREE_LAT,
        }
    }

    #[inline(always)]
    pub fn unproject(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: c.x / self.meters_per_degree_lon + self.origin.x,
            y: c.y / METERS_PER_DEGREE_LAT + self.origin.y,
        }
    }
}

/// Great-circle distance in meters between two WGS84 coordinates
#[inline]
pub fn haversine_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let delta_lat = (b.y - a.y).to_radians();
    let delta_lon = (b.x - a.x).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Bounding box of a coordinate sequence, `None` when empty
pub fn bounding_rect(coords: &[Coord<f64>]) -> Option<Rect<f64>> {
    let first = coords.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for c in &coords[1..] {
        min_x = min_x.min(c.x);
        min_y = min_y.min(c.y);
        max_x = max_x.max(c.x);
        max_y = max_y.max(c.y);
    }
    Some(Rect::new(
        Coord { x: min_x, y: min_y },
        Coord { x: max_x, y: max_y },
    ))
}

/// Grow a WGS84 bounding box by `radius_m` on every side
pub fn inflate_rect(rect: Rect<f64>, radius_m: f64) -> Rect<f64> {
    let mid_lat = (rect.min().y + rect.max().y) / 2.0;
    let dx = radius_m / meters_per_degree_lon(mid_lat);
    let dy = radius_m / METERS_PER_DEGREE_LAT;
    Rect::new(
        Coord {
            x: rect.min().x - dx,
            y: rect.min().y - dy,
        },
        Coord {
            x: rect.max().x + dx,
            y: rect.max().y + dy,
        },
    )
}

/// Downsample to at most `max_points` with a uniform stride, always keeping
/// the first and last coordinate.
pub fn thin_coords(coords: &[Coord<f64>], max_points: usize) -> Vec<Coord<f64>> {
    let len = coords.len();
    if len <= max_points || max_points < 2 {
        return coords.to_vec();
    }

    let stride = (len - 1).div_ceil(max_points - 1);
    let mut thinned: Vec<Coord<f64>> = coords.iter().step_by(stride).copied().collect();
    if (len - 1) % stride != 0 {
        thinned.push(coords[len - 1]);
    }
    thinned
}

/// Buffer a projected line by `width_m` meters. Returns `None` for degenerate
/// input or an empty result.
pub fn buffer_line(line: &LineString<f64>, width_m: f64) -> Option<MultiPolygon<f64>> {
    if line.0.len() < 2 || line.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return None;
    }
    let buffered = line.buffer(width_m.max(MIN_WIDTH_M));
    if buffered.0.is_empty() {
        tracing::warn!("Buffering a {}-point line produced no polygon", line.0.len());
        return None;
    }
    Some(buffered)
}

/// Douglas-Peucker simplification of every ring. No boundary point moves more
/// than `epsilon` projection units; rings that would lose their shape are
/// kept as-is.
pub fn simplify_multipolygon(polygons: &MultiPolygon<f64>, epsilon: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(
        polygons
            .0
            .iter()
            .map(|polygon| {
                Polygon::new(
                    simplify_ring(polygon.exterior(), epsilon),
                    polygon
                        .interiors()
                        .iter()
                        .map(|ring| simplify_ring(ring, epsilon))
                        .collect(),
                )
            })
            .collect(),
    )
}

fn simplify_ring(ring: &LineString<f64>, epsilon: f64) -> LineString<f64> {
    if ring.0.len() <= 4 {
        return ring.clone();
    }
    let indices = ring.simplify_idx(epsilon);
    if indices.len() < 4 {
        return ring.clone();
    }
    LineString::from(indices.iter().map(|&i| ring.0[i]).collect::<Vec<_>>())
}

/// Whether every coordinate lies inside the polygons
pub fn contains_all(polygons: &MultiPolygon<f64>, coords: &[Coord<f64>]) -> bool {
    coords
        .iter()
        .all(|c| polygon_contains(polygons, Point::from(*c)))
}

/// Round every coordinate to `decimals` decimal places
pub fn truncate_coords(polygons: &MultiPolygon<f64>, decimals: u32) -> MultiPolygon<f64> {
    let factor = 10f64.powi(decimals as i32);
    polygons.map_coords(|c| Coord {
        x: (c.x * factor).round() / factor,
        y: (c.y * factor).round() / factor,
    })
}

/// Total number of coordinates over all rings
pub fn coord_count(polygons: &MultiPolygon<f64>) -> usize {
    polygons
        .0
        .iter()
        .map(|p| p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>())
        .sum()
}

/// Closest point on a projected line, `None` when it cannot be determined
pub fn nearest_point_on_line(line: &LineString<f64>, point: Point<f64>) -> Option<Point<f64>> {
    if !point.x().is_finite() || !point.y().is_finite() {
        return None;
    }
    match line.closest_point(&point) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => Some(p),
        Closest::Indeterminate => None,
    }
}

/// Point-in-polygon that treats non-finite points as outside
pub fn polygon_contains(polygons: &MultiPolygon<f64>, point: Point<f64>) -> bool {
    point.x().is_finite() && point.y().is_finite() && polygons.contains(&point)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_line(n: usize) -> Vec<Coord<f64>> {
        (0..n)
            .map(|i| Coord {
                x: 16.0 + i as f64 * 0.001,
                y: 48.0,
            })
            .collect()
    }

    #[test]
    fn test_projection_roundtrip() {
        let projection = LocalProjection::new(Coord { x: 16.37, y: 48.2 });
        let c = Coord { x: 16.41, y: 48.23 };
        let back = projection.unproject(projection.project(c));
        assert!((back.x - c.x).abs() < 1e-9);
        assert!((back.y - c.y).abs() < 1e-9);
    }

    #[test]
    fn test_projection_scale() {
        let projection = LocalProjection::new(Coord { x: 0.0, y: 0.0 });
        let p = projection.project(Coord { x: 0.0, y: 1.0 });
        assert!((p.y - METERS_PER_DEGREE_LAT).abs() < 1e-6);

        let projection = LocalProjection::new(Coord { x: 0.0, y: 60.0 });
        let p = projection.project(Coord { x: 1.0, y: 60.0 });
        assert!((p.x - METERS_PER_DEGREE_LAT * 0.5).abs() < 1.0);
    }

    #[test]
    fn test_haversine_matches_degree_approximation() {
        let a = Coord { x: 16.0, y: 48.0 };
        let b = Coord {
            x: 16.0,
            y: 48.0 + 100.0 / METERS_PER_DEGREE_LAT,
        };
        assert!((haversine_distance(a, b) - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_thin_coords_keeps_endpoints_and_budget() {
        let coords = straight_line(1001);
        let thinned = thin_coords(&coords, 100);
        assert!(thinned.len() <= 100);
        assert_eq!(thinned.first(), coords.first());
        assert_eq!(thinned.last(), coords.last());

        let odd = straight_line(10);
        let thinned = thin_coords(&odd, 4);
        assert_eq!(thinned.len(), 4);
        assert_eq!(thinned.last(), odd.last());
    }

    #[test]
    fn test_thin_coords_under_budget_is_identity() {
        let coords = straight_line(5);
        assert_eq!(thin_coords(&coords, 10), coords);
    }

    #[test]
    fn test_inflate_rect() {
        let rect = Rect::new(Coord { x: 16.0, y: 48.0 }, Coord { x: 16.1, y: 48.1 });
        let inflated = inflate_rect(rect, 500.0);
        assert!((rect.min().y - inflated.min().y - 500.0 / METERS_PER_DEGREE_LAT).abs() < 1e-12);
        assert!(inflated.max().x > rect.max().x);
        assert!(inflated.width() > rect.width());
    }

    #[test]
    fn test_buffer_line_contains_nearby_points() {
        let line = LineString::from(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1000.0, y: 0.0 }]);
        let buffered = buffer_line(&line, 100.0).unwrap();
        assert!(polygon_contains(&buffered, Point::new(500.0, 60.0)));
        assert!(!polygon_contains(&buffered, Point::new(500.0, 160.0)));
    }

    #[test]
    fn test_buffer_line_width_floor() {
        let line = LineString::from(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 100.0, y: 0.0 }]);
        let buffered = buffer_line(&line, 0.0).unwrap();
        assert!(polygon_contains(&buffered, Point::new(50.0, 3.0)));
    }

    #[test]
    fn test_buffer_degenerate_line() {
        let line = LineString::from(vec![Coord { x: 0.0, y: 0.0 }]);
        assert!(buffer_line(&line, 50.0).is_none());
    }

    #[test]
    fn test_simplify_reduces_coords() {
        let line = LineString::from(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 500.0, y: 10.0 },
            Coord { x: 1000.0, y: 0.0 },
        ]);
        let buffered = buffer_line(&line, 100.0).unwrap();
        let simplified = simplify_multipolygon(&buffered, 5.0);
        assert!(coord_count(&simplified) < coord_count(&buffered));
        assert!(coord_count(&simplified) >= 4);
        assert!(contains_all(&simplified, &line.0));
        // Points well inside the buffer stay inside
        assert!(polygon_contains(&simplified, Point::new(500.0, 90.0)));
    }

    #[test]
    fn test_truncate_coords() {
        let mp = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![
                Coord { x: 16.123456789, y: 48.987654321 },
                Coord { x: 16.2, y: 48.9 },
                Coord { x: 16.3, y: 48.95 },
            ]),
            vec![],
        )]);
        let truncated = truncate_coords(&mp, 5);
        let first = truncated.0[0].exterior().0[0];
        assert_eq!(first.x, 16.12346);
        assert_eq!(first.y, 48.98765);
    }

    #[test]
    fn test_nearest_point_on_line() {
        let line = LineString::from(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 100.0, y: 0.0 }]);
        let snap = nearest_point_on_line(&line, Point::new(40.0, 30.0)).unwrap();
        assert!((snap.x() - 40.0).abs() < 1e-9);
        assert!(snap.y().abs() < 1e-9);

        assert!(nearest_point_on_line(&line, Point::new(f64::NAN, 1.0)).is_none());
    }

    #[test]
    fn test_polygon_contains_rejects_non_finite() {
        let line = LineString::from(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 100.0, y: 0.0 }]);
        let buffered = buffer_line(&line, 50.0).unwrap();
        assert!(!polygon_contains(&buffered, Point::new(f64::NAN, 0.0)));
        assert!(!polygon_contains(&buffered, Point::new(f64::INFINITY, 0.0)));
    }

    #[test]
    fn test_bounding_rect() {
        assert!(bounding_rect(&[]).is_none());
        let rect = bounding_rect(&straight_line(11)).unwrap();
        assert!((rect.max().x - 16.01).abs() < 1e-9);
        assert_eq!(rect.min().y, 48.0);
    }
}
