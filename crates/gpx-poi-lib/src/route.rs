//! Route storage and parsing module
//!
//! This module provides the `Route` struct holding the parsed GPX together with
//! the route polyline and precomputed metadata like the bounding box and
//! length. The full polyline stays the source of truth; a thinned copy is made
//! on demand for heavy geometry work.

use crate::{PoiError, Result, geometry};
use geo::{Coord, LineString, Rect};

/// A waypoint already present in the loaded document
#[derive(Clone, Debug, PartialEq)]
pub struct ExistingWaypoint {
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub symbol: Option<String>,
    pub type_: Option<String>,
}

impl ExistingWaypoint {
    /// Symbol key used for icon lookup: `type`, then `sym`, lower-cased
    pub fn symbol_key(&self) -> String {
        self.type_
            .as_deref()
            .or(self.symbol.as_deref())
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }
}

/// A parsed GPX route with its polyline and cached metadata
#[derive(Clone, Debug)]
pub struct Route {
    /// The original GPX data
    gpx_data: gpx::Gpx,
    /// Route polyline in WGS84 (x = lon, y = lat)
    polyline: LineString<f64>,
    /// Precomputed bounding box in WGS84
    bounding_box: Rect<f64>,
    /// Cached total distance in meters
    cached_total_distance: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Route {
    /// Parse GPX text into a route
    pub fn parse(text: &str) -> Result<Self> {
        let gpx_data = gpx::read(text.as_bytes())?;
        Self::new(gpx_data)
    }

    /// Build a route from GPX data
    ///
    /// Track segment points are concatenated in document order; when the file
    /// has no track points, `<rte>` points are used instead. Non-finite points
    /// are skipped. Fails with [`PoiError::EmptyRoute`] below two points.
    pub fn new(gpx_data: gpx::Gpx) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("route::new");

        let mut coords: Vec<Coord<f64>> = gpx_data
            .tracks
            .iter()
            .flat_map(|track| &track.segments)
            .flat_map(|segment| &segment.points)
            .map(waypoint_coord)
            .collect();

        if coords.is_empty() {
            coords = gpx_data
                .routes
                .iter()
                .flat_map(|route| &route.points)
                .map(waypoint_coord)
                .collect();
        }

        let before = coords.len();
        coords.retain(|c| c.x.is_finite() && c.y.is_finite());
        if coords.len() < before {
            tracing::warn!("Skipped {} non-finite route points", before - coords.len());
        }

        if coords.len() < 2 {
            return Err(PoiError::EmptyRoute);
        }

        let bounding_box = geometry::bounding_rect(&coords).ok_or(PoiError::EmptyRoute)?;
        let total_distance = coords
            .windows(2)
            .map(|pair| geometry::haversine_distance(pair[0], pair[1]))
            .sum();

        Ok(Route {
            gpx_data,
            polyline: LineString::from(coords),
            bounding_box,
            cached_total_distance: total_distance,
        })
    }

    /// Get the bounding box in WGS84
    #[inline]
    pub fn bounding_box(&self) -> Rect<f64> {
        self.bounding_box
    }

    /// Access the raw GPX data
    #[inline]
    pub fn gpx_data(&self) -> &gpx::Gpx {
        &self.gpx_data
    }

    /// Full-resolution polyline
    #[inline]
    pub fn polyline(&self) -> &LineString<f64> {
        &self.polyline
    }

    /// Polyline downsampled to at most `max_points` (first and last kept)
    pub fn thinned(&self, max_points: usize) -> LineString<f64> {
        LineString::from(geometry::thin_coords(&self.polyline.0, max_points))
    }

    #[inline]
    pub fn total_points(&self) -> usize {
        self.polyline.0.len()
    }

    /// Total length in meters
    #[inline]
    pub fn total_distance(&self) -> f64 {
        self.cached_total_distance
    }

    /// Waypoints present in the source document
    pub fn waypoints(&self) -> Vec<ExistingWaypoint> {
        self.gpx_data
            .waypoints
            .iter()
            .map(|wpt| ExistingWaypoint {
                lat: wpt.point().y(),
                lon: wpt.point().x(),
                name: wpt.name.clone(),
                description: wpt.description.clone(),
                symbol: wpt.symbol.clone(),
                type_: wpt.type_.clone(),
            })
            .collect()
    }
}

#[inline]
fn waypoint_coord(waypoint: &gpx::Waypoint) -> Coord<f64> {
    let point = waypoint.point();
    Coord {
        x: point.x(),
        y: point.y(),
    }
}
