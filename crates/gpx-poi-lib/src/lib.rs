//! GPX POI Library - Route Enrichment Core
//!
//! This library loads a GPX route, classifies points of interest fetched from a
//! tagged geographic data source against a configurable type taxonomy, decides
//! which of them lie inside a corridor around the route, and merges the chosen
//! ones back into the route document as deduplicated waypoints.
//!
//! # Architecture
//!
//! - **[`Taxonomy`]**: Category → item index with denormalized display metadata
//! - **[`RuleSet`]**: Ordered first-match-wins tag rules mapping tags to type ids
//! - **[`PoiRecord`]**: Normalized POI with type, icon and route-relative distance
//! - **[`Corridor`]**: Search and corridor polygons around the route
//! - **[`ExportSet`]**: Selection, forced overrides and custom POIs combined
//! - **[`document`]**: Waypoint merge with signature deduplication
//! - **[`Session`]**: Explicit application state driving all of the above
//!
//! Data flows leaf-first: config → taxonomy → rules → normalized POIs →
//! corridor classification → export set → enriched route document.

pub mod config;
mod corridor;
pub mod document;
pub mod export;
pub mod geometry;
pub mod overpass;
mod poi;
mod route;
mod rules;
mod selection;
mod session;
mod taxonomy;

// Public API exports
pub use config::{MappingConfig, SourceConfig, SourceItem, TagPair, TaxonomyConfig};
pub use corridor::{Corridor, CorridorConfig, QueryArea, RouteGeometry};
pub use export::{ExportFields, build_export_fields, format_distance};
pub use overpass::{
    OverpassClient, OverpassElement, OverpassResponse, QueryService, RetryPolicy, build_query,
};
pub use poi::{PoiRecord, normalize_elements};
pub use route::{ExistingWaypoint, Route};
pub use rules::{GENERIC_TYPE_ID, Rule, RuleSet};
pub use selection::{
    CustomPoi, CustomPoiRegistry, ExportEntry, ExportSet, ForceState, PanelGroup, PanelRow,
    Selection, build_export_set, panel_groups, selected_chips,
};
pub use session::{FetchScope, PoiMarker, Session, WaypointMarker};
pub use taxonomy::{CategoryMeta, GENERIC_ICON, Taxonomy, TaxonomyItem};

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum PoiError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("Route document error: {0}")]
    Document(String),

    #[error("Route has fewer than two usable points")]
    EmptyRoute,

    #[error("No route loaded")]
    NoRoute,

    #[error("All query endpoints failed after {attempts} attempts: {last_error}")]
    QueryFailed { attempts: usize, last_error: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoiError>;
