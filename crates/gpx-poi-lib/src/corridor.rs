//! Corridor and search-area engine
//!
//! Derives two buffers around the route: a wide search polygon that bounds the
//! external query (simplified and truncated to keep the request small) and a
//! narrower corridor polygon used only to classify fetched POIs as inside or
//! outside. Both are rebuilt from scratch whenever the route or a width changes.

use crate::geometry::{self, LocalProjection};
use crate::poi::PoiRecord;
use crate::route::Route;
use geo::{Coord, LineString, MapCoords, MultiPolygon, Point, Rect};

/// Maximum doublings of the simplification tolerance while fitting the budget
const MAX_SIMPLIFY_ROUNDS: usize = 16;

/// Below this tolerance simplification is skipped, in meters
const MIN_SIMPLIFY_TOLERANCE_M: f64 = 1.0;

/// Widths and budgets for corridor geometry
#[derive(Clone, Debug, PartialEq)]
pub struct CorridorConfig {
    /// Corridor half-width in meters (selection relevant)
    pub corridor_width_m: f64,
    /// Search half-width in meters (query bounding)
    pub search_width_m: f64,
    /// Route points kept for buffering and snapping
    pub max_route_points: usize,
    /// Coordinate budget for the search polygon sent to the query service
    pub max_search_polygon_points: usize,
    /// Initial simplification tolerance for the search polygon, in meters
    pub search_simplify_tolerance_m: f64,
    /// Decimal places kept in search polygon coordinates
    pub coordinate_decimals: u32,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        Self {
            corridor_width_m: 100.0,
            search_width_m: 500.0,
            max_route_points: 2000,
            max_search_polygon_points: 400,
            search_simplify_tolerance_m: 25.0,
            coordinate_decimals: 5,
        }
    }
}

/// Area restriction for the external query
#[derive(Clone, Debug, PartialEq)]
pub enum QueryArea {
    /// Closed ring in WGS84
    Polygon(LineString<f64>),
    /// WGS84 bounding box
    BoundingBox(Rect<f64>),
}

/// Thinned route line in a local metric projection, used for snapping
#[derive(Clone, Debug)]
pub struct RouteGeometry {
    projection: LocalProjection,
    /// Projected polyline in meters
    line: LineString<f64>,
}

impl RouteGeometry {
    /// `None` for an empty line
    pub fn new(line: &LineString<f64>) -> Option<Self> {
        let projection = LocalProjection::for_rect(geometry::bounding_rect(&line.0)?);
        let line = line.map_coords(|c| projection.project(c));
        Some(Self { projection, line })
    }

    #[inline]
    pub fn projection(&self) -> &LocalProjection {
        &self.projection
    }

    /// Projected polyline in meters
    #[inline]
    pub fn projected_line(&self) -> &LineString<f64> {
        &self.line
    }

    /// Closest route coordinate to `position` and the distance to it in meters
    pub fn snap(&self, position: Coord<f64>) -> Option<(Coord<f64>, f64)> {
        let projected = Point::from(self.projection.project(position));
        let nearest = geometry::nearest_point_on_line(&self.line, projected)?;
        let snap = self.projection.unproject(nearest.0);
        Some((snap, geometry::haversine_distance(position, snap)))
    }
}

/// Search and corridor polygons for the current route
#[derive(Clone, Debug, Default)]
pub struct Corridor {
    route: Option<RouteGeometry>,
    search: Option<MultiPolygon<f64>>,
    corridor: Option<MultiPolygon<f64>>,
    search_bbox: Option<Rect<f64>>,
    /// The search polygon fits the coordinate budget
    search_within_budget: bool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Corridor {
    /// No route: nothing is inside
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build(route: &Route, config: &CorridorConfig) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("corridor::build");

        let thinned = route.thinned(config.max_route_points);
        if thinned.0.len() < route.total_points() {
            tracing::debug!(
                "Thinned route from {} to {} points for corridor geometry",
                route.total_points(),
                thinned.0.len()
            );
        }

        let Some(route_geometry) = RouteGeometry::new(&thinned) else {
            return Self::empty();
        };
        let projection = *route_geometry.projection();
        let unproject = |polygons: MultiPolygon<f64>| polygons.map_coords(|c| projection.unproject(c));

        let corridor = geometry::buffer_line(route_geometry.projected_line(), config.corridor_width_m)
            .map(unproject);

        let fitted = geometry::buffer_line(route_geometry.projected_line(), config.search_width_m)
            .map(|polygons| Self::fit_budget(polygons, route_geometry.projected_line(), config));
        let search_within_budget = fitted.as_ref().is_some_and(|(_, fits)| *fits);
        if fitted.is_some() && !search_within_budget {
            tracing::warn!(
                "Search area needs more than {} coords to cover the route, querying its bounding box",
                config.max_search_polygon_points
            );
        }
        let search = fitted
            .map(|(polygons, _)| unproject(polygons))
            .map(|polygons| geometry::truncate_coords(&polygons, config.coordinate_decimals));

        let search_bbox = Some(geometry::inflate_rect(
            route.bounding_box(),
            config.search_width_m.max(geometry::MIN_WIDTH_M),
        ));

        tracing::info!(
            "Built corridor ({} m) and search area ({} m, {} coords)",
            config.corridor_width_m,
            config.search_width_m,
            search.as_ref().map(geometry::coord_count).unwrap_or(0)
        );

        Self {
            route: Some(route_geometry),
            search,
            corridor,
            search_bbox,
            search_within_budget,
        }
    }

    /// Simplify with a growing tolerance until the coordinate budget is met.
    ///
    /// The tolerance stays below half the gap between search and corridor
    /// width, so the simplified area still covers the corridor, and every
    /// candidate must contain all route vertices. Returns the smallest
    /// covering polygon and whether it fits the budget.
    fn fit_budget(
        polygons: MultiPolygon<f64>,
        route: &LineString<f64>,
        config: &CorridorConfig,
    ) -> (MultiPolygon<f64>, bool) {
        let budget = config.max_search_polygon_points;
        if geometry::coord_count(&polygons) <= budget {
            return (polygons, true);
        }

        let max_tolerance = (config.search_width_m - config.corridor_width_m) / 2.0;
        let mut tolerance = config
            .search_simplify_tolerance_m
            .max(MIN_SIMPLIFY_TOLERANCE_M)
            .min(max_tolerance);
        let mut smallest = None;
        for _ in 0..MAX_SIMPLIFY_ROUNDS {
            if tolerance < MIN_SIMPLIFY_TOLERANCE_M {
                break;
            }
            let candidate = geometry::simplify_multipolygon(&polygons, tolerance);
            if !geometry::contains_all(&candidate, &route.0) {
                tracing::debug!("Simplifying at {:.0} m cuts the route", tolerance);
                break;
            }
            if geometry::coord_count(&candidate) <= budget {
                return (candidate, true);
            }
            smallest = Some(candidate);
            if tolerance >= max_tolerance {
                break;
            }
            tolerance = (tolerance * 2.0).min(max_tolerance);
        }
        (smallest.unwrap_or(polygons), false)
    }

    #[inline]
    pub fn route_geometry(&self) -> Option<&RouteGeometry> {
        self.route.as_ref()
    }

    #[inline]
    pub fn corridor_polygon(&self) -> Option<&MultiPolygon<f64>> {
        self.corridor.as_ref()
    }

    #[inline]
    pub fn search_polygon(&self) -> Option<&MultiPolygon<f64>> {
        self.search.as_ref()
    }

    #[inline]
    pub fn search_bbox(&self) -> Option<Rect<f64>> {
        self.search_bbox
    }

    /// Whether a WGS84 position lies inside the corridor
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.corridor
            .as_ref()
            .is_some_and(|polygons| geometry::polygon_contains(polygons, Point::new(lon, lat)))
    }

    /// Set `inside_corridor` on every record; returns the inside count
    pub fn classify(&self, pois: &mut [PoiRecord]) -> usize {
        let mut inside = 0;
        for poi in pois.iter_mut() {
            poi.inside_corridor = self.contains(poi.lat, poi.lon);
            inside += usize::from(poi.inside_corridor);
        }
        inside
    }

    /// Area for the external query: the search polygon's largest ring, or the
    /// inflated bounding box when asked for, when there is no polygon or when
    /// the polygon could not be fitted into the coordinate budget.
    pub fn query_area(&self, prefer_bbox: bool) -> Option<QueryArea> {
        let polygon_ring = self
            .search
            .as_ref()
            .and_then(|polygons| polygons.0.iter().max_by_key(|p| p.exterior().0.len()))
            .map(|polygon| polygon.exterior().clone());

        match (prefer_bbox || !self.search_within_budget, polygon_ring) {
            (false, Some(ring)) => Some(QueryArea::Polygon(ring)),
            _ => self.search_bbox.map(QueryArea::BoundingBox),
        }
    }
}
