//! Application state
//!
//! [`Session`] owns everything the enrichment workflow mutates: the loaded
//! configs, the route and its document text, corridor geometry, fetched POIs,
//! selection, forced overrides and custom POIs. Every input change immediately
//! recomputes the derived state that depends on it.

use crate::config::{MappingConfig, SourceConfig, SourceItem, TaxonomyConfig};
use crate::corridor::{Corridor, CorridorConfig};
use crate::document::{self, MergeOutcome};
use crate::export::build_export_fields;
use crate::overpass::{DEFAULT_QUERY_TIMEOUT_S, OverpassResponse, QueryService, build_query};
use crate::poi::{PoiRecord, normalize_elements};
use crate::route::{ExistingWaypoint, Route};
use crate::rules::{self, RuleSet};
use crate::selection::{
    CustomPoi, CustomPoiRegistry, ExportEntry, ExportSet, ForceState, PanelGroup, Selection,
    build_export_set, panel_groups,
};
use crate::taxonomy::{GENERIC_ICON, Taxonomy, TaxonomyItem};
use crate::{PoiError, Result};
use geo::Coord;
use std::collections::BTreeSet;

/// Which source items a fetch queries for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchScope {
    /// Only the checked sources
    #[default]
    Selected,
    /// Every fetchable source
    All,
}

/// Everything a renderer needs to draw one POI
#[derive(Clone, Debug, PartialEq)]
pub struct PoiMarker {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub type_id: String,
    pub name: String,
    pub desc: String,
    /// Icon reference, generic when the type has none
    pub icon: String,
    pub inside_corridor: bool,
    pub force: ForceState,
    /// Part of the current export set
    pub exported: bool,
    pub custom: bool,
    /// Closest route point, for distance lines
    pub snap: Option<Coord<f64>>,
}

/// A waypoint already in the loaded document
#[derive(Clone, Debug, PartialEq)]
pub struct WaypointMarker {
    pub waypoint: ExistingWaypoint,
    pub icon: String,
}

pub struct Session {
    taxonomy: Taxonomy,
    sources: SourceConfig,
    mapping: Option<MappingConfig>,
    /// Rules of the last fetch
    rules: RuleSet,
    route: Option<Route>,
    document: Option<String>,
    filename: Option<String>,
    corridor_config: CorridorConfig,
    corridor: Corridor,
    pois: Vec<PoiRecord>,
    selection: Selection,
    custom: CustomPoiRegistry,
    query_timeout_s: u32,
    prefer_bbox: bool,
    status: String,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Session {
    pub fn new(
        taxonomy: &TaxonomyConfig,
        sources: SourceConfig,
        mapping: Option<MappingConfig>,
    ) -> Self {
        let taxonomy = Taxonomy::new(taxonomy);
        rules::report_unresolved_sources(&sources.items, &taxonomy, mapping.as_ref());
        let rules = RuleSet::from_sources(&sources.items, &taxonomy, mapping.as_ref());
        let selection = Selection::from_defaults(&sources);
        tracing::info!(
            "Session ready: {} types, {} sources, {} selected",
            taxonomy.len(),
            sources.items.len(),
            selection.selected_sources().count()
        );
        Self {
            taxonomy,
            sources,
            mapping,
            rules,
            route: None,
            document: None,
            filename: None,
            corridor_config: CorridorConfig::default(),
            corridor: Corridor::empty(),
            pois: Vec::new(),
            selection,
            custom: CustomPoiRegistry::new(),
            query_timeout_s: DEFAULT_QUERY_TIMEOUT_S,
            prefer_bbox: false,
            status: String::new(),
        }
    }

    /// Switch to another taxonomy template. Fetched and custom POIs belong to
    /// the old types and are dropped.
    pub fn set_taxonomy(
        &mut self,
        taxonomy: &TaxonomyConfig,
        sources: SourceConfig,
        mapping: Option<MappingConfig>,
    ) {
        self.taxonomy.rebuild(taxonomy);
        rules::report_unresolved_sources(&sources.items, &self.taxonomy, mapping.as_ref());
        self.rules = RuleSet::from_sources(&sources.items, &self.taxonomy, mapping.as_ref());
        self.selection = Selection::from_defaults(&sources);
        self.sources = sources;
        self.mapping = mapping;
        self.pois.clear();
        self.custom.clear();
        tracing::info!("Switched taxonomy ({} types)", self.taxonomy.len());
    }

    /// Load a route document, optionally stripping its waypoints first.
    /// Already fetched POIs are kept and measured against the new route.
    pub fn load_route(&mut self, text: &str, filename: &str, drop_waypoints: bool) -> Result<()> {
        match self.try_load_route(text, filename, drop_waypoints) {
            Ok(()) => {
                self.status = "GPX loaded.".to_string();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}", filename, e);
                self.status = format!("Loading GPX failed: {e}");
                Err(e)
            }
        }
    }

    fn try_load_route(&mut self, text: &str, filename: &str, drop_waypoints: bool) -> Result<()> {
        let document = if drop_waypoints {
            document::strip_waypoints(text)?
        } else {
            text.to_string()
        };
        let route = Route::parse(&document)?;
        tracing::info!(
            "Loaded route {} with {} points ({:.1} km)",
            filename,
            route.total_points(),
            route.total_distance() / 1000.0
        );

        self.route = Some(route);
        self.document = Some(document);
        self.filename = Some(filename.to_string());
        self.rebuild_corridor();
        self.remeasure_pois();
        Ok(())
    }

    pub fn set_corridor_config(&mut self, config: CorridorConfig) {
        if config != self.corridor_config {
            self.corridor_config = config;
            self.rebuild_corridor();
        }
    }

    pub fn set_corridor_width(&mut self, meters: f64) {
        self.set_corridor_config(CorridorConfig {
            corridor_width_m: meters,
            ..self.corridor_config.clone()
        });
    }

    pub fn set_search_width(&mut self, meters: f64) {
        self.set_corridor_config(CorridorConfig {
            search_width_m: meters,
            ..self.corridor_config.clone()
        });
    }

    /// Server-side timeout and whether to query the bounding box instead of
    /// the search polygon
    pub fn set_query_options(&mut self, timeout_s: u32, prefer_bbox: bool) {
        self.query_timeout_s = timeout_s;
        self.prefer_bbox = prefer_bbox;
    }

    fn rebuild_corridor(&mut self) {
        self.corridor = match &self.route {
            Some(route) => Corridor::build(route, &self.corridor_config),
            None => Corridor::empty(),
        };
        let inside = self.corridor.classify(&mut self.pois);
        tracing::debug!("{} of {} POIs inside corridor", inside, self.pois.len());
    }

    fn remeasure_pois(&mut self) {
        let route = self.corridor.route_geometry();
        for poi in &mut self.pois {
            let snapped = route.and_then(|r| r.snap(poi.position()));
            poi.distance_m = snapped.map(|(_, distance)| distance.round());
            poi.snap = snapped.map(|(snap, _)| snap);
        }
    }

    fn scope_items(&self, scope: FetchScope) -> Vec<&SourceItem> {
        self.sources
            .items
            .iter()
            .filter(|item| item.fetch)
            .filter(|item| match scope {
                FetchScope::Selected => self.selection.is_source_selected(&item.id),
                FetchScope::All => true,
            })
            .collect()
    }

    /// Query text for a fetch of `scope` around the current route
    pub fn query_text(&self, scope: FetchScope) -> Result<String> {
        let area = self
            .corridor
            .query_area(self.prefer_bbox)
            .ok_or(PoiError::NoRoute)?;
        Ok(build_query(
            &area,
            self.scope_items(scope),
            self.query_timeout_s,
        ))
    }

    /// Fetch POIs around the route. On failure the previous POIs are kept.
    pub async fn fetch<S: QueryService>(&mut self, service: &S, scope: FetchScope) -> Result<usize> {
        let query = match self.query_text(scope) {
            Ok(query) => query,
            Err(e) => {
                self.status = "Load a GPX route first.".to_string();
                return Err(e);
            }
        };

        self.status = "Fetching POIs…".to_string();
        tracing::info!("Fetching POIs ({:?}, {} bytes of query)", scope, query.len());

        match service.query(&query).await {
            Ok(response) => Ok(self.apply_response(&response, scope)),
            Err(e) => {
                tracing::error!("Fetch failed: {}", e);
                self.status = format!("Fetch failed: {e}");
                Err(e)
            }
        }
    }

    /// Replace the POIs with a response. Classification uses the items of
    /// `scope` in source order.
    pub fn apply_response(&mut self, response: &OverpassResponse, scope: FetchScope) -> usize {
        self.rules =
            RuleSet::from_sources(self.scope_items(scope), &self.taxonomy, self.mapping.as_ref());
        self.pois = normalize_elements(
            &response.elements,
            &self.rules,
            &self.taxonomy,
            self.corridor.route_geometry(),
        );
        let inside = self.corridor.classify(&mut self.pois);

        tracing::info!("Fetched {} POIs, {} inside corridor", self.pois.len(), inside);
        self.status = format!("Fetched {} POIs.", self.pois.len());
        self.pois.len()
    }

    pub fn set_source_selected(&mut self, source_id: &str, selected: bool) {
        self.selection.set_source(source_id, selected);
    }

    /// Select all / unselect all for one category
    pub fn set_category_selected(&mut self, category_id: &str, selected: bool) -> usize {
        self.selection.set_category(
            category_id,
            selected,
            &self.sources,
            &self.taxonomy,
            self.mapping.as_ref(),
        )
    }

    pub fn selected_type_ids(&self) -> BTreeSet<String> {
        self.selection
            .selected_type_ids(&self.sources, &self.taxonomy, self.mapping.as_ref())
    }

    pub fn set_force(&mut self, poi_id: &str, state: ForceState) {
        self.selection.set_force(poi_id, state);
    }

    pub fn add_custom_poi(
        &mut self,
        lat: f64,
        lon: f64,
        type_id: &str,
        label: Option<&str>,
        note: Option<&str>,
    ) -> Result<&CustomPoi> {
        if !self.taxonomy.contains(type_id) {
            return Err(PoiError::Config(format!("Unknown POI type: {type_id}")));
        }
        if !(lat.is_finite() && lon.is_finite()) {
            return Err(PoiError::Config(format!("Invalid position: {lat}, {lon}")));
        }
        Ok(self.custom.add(lat, lon, type_id, label, note, &self.taxonomy))
    }

    pub fn remove_custom_poi(&mut self, id: &str) -> bool {
        self.custom.remove(id)
    }

    pub fn export_set(&self) -> ExportSet {
        build_export_set(
            &self.pois,
            &self.selected_type_ids(),
            &self.selection,
            self.custom.list(),
        )
    }

    /// A route is loaded and there is something to export
    pub fn can_export(&self) -> bool {
        self.document.is_some() && !self.export_set().is_empty()
    }

    /// The loaded document with the export set merged in
    pub fn export_document(&self) -> Result<MergeOutcome> {
        let document = self.document.as_deref().ok_or(PoiError::NoRoute)?;
        let set = self.export_set();
        if set.is_empty() {
            return Err(PoiError::Document("Nothing to export".to_string()));
        }
        document::add_waypoints(document, set.entries())
    }

    /// `<stem>_enriched.gpx`
    pub fn export_filename(&self) -> String {
        let filename = self.filename.as_deref().unwrap_or("route.gpx");
        let stem = match filename.len().checked_sub(4) {
            Some(split)
                if filename.is_char_boundary(split)
                    && filename[split..].eq_ignore_ascii_case(".gpx") =>
            {
                &filename[..split]
            }
            _ => filename,
        };
        format!("{stem}_enriched.gpx")
    }

    /// Markers for fetched POIs followed by custom POIs
    pub fn markers(&self) -> Vec<PoiMarker> {
        let set = self.export_set();
        let exported = set.ids();
        let fetched = self.pois.iter().map(|poi| {
            let fields = build_export_fields(&poi.tags, &poi.type_id, poi.distance_m);
            PoiMarker {
                id: poi.id.clone(),
                lat: poi.lat,
                lon: poi.lon,
                type_id: poi.type_id.clone(),
                name: fields.name_label,
                desc: fields.desc,
                icon: poi.icon.clone().unwrap_or_else(|| GENERIC_ICON.to_string()),
                inside_corridor: poi.inside_corridor,
                force: self.selection.force_state(&poi.id),
                exported: exported.contains(poi.id.as_str()),
                custom: false,
                snap: poi.snap,
            }
        });
        let custom = self.custom.list().iter().map(|poi| {
            let entry = ExportEntry::from(poi);
            let fields = build_export_fields(&entry.tags, &entry.type_id, None);
            PoiMarker {
                id: poi.id.clone(),
                lat: poi.lat,
                lon: poi.lon,
                type_id: poi.type_id.clone(),
                name: poi.label.clone(),
                desc: poi.note.clone().unwrap_or(fields.desc),
                icon: poi.icon.clone().unwrap_or_else(|| GENERIC_ICON.to_string()),
                inside_corridor: self.corridor.contains(poi.lat, poi.lon),
                force: ForceState::Include,
                exported: true,
                custom: true,
                snap: None,
            }
        });
        fetched.chain(custom).collect()
    }

    /// Waypoints of the loaded document with their icons
    pub fn waypoint_markers(&self) -> Vec<WaypointMarker> {
        self.route
            .iter()
            .flat_map(Route::waypoints)
            .map(|waypoint| WaypointMarker {
                icon: self.taxonomy.icon_or_generic(&waypoint.symbol_key()).to_string(),
                waypoint,
            })
            .collect()
    }

    /// `<wpt>` markup for a fetched or custom POI
    pub fn waypoint_snippet(&self, poi_id: &str) -> Option<String> {
        let entry = self
            .pois
            .iter()
            .find(|poi| poi.id == poi_id)
            .map(ExportEntry::from)
            .or_else(|| {
                self.custom
                    .list()
                    .iter()
                    .find(|poi| poi.id == poi_id)
                    .map(ExportEntry::from)
            })?;
        document::waypoint_snippet(&entry)
            .inspect_err(|e| tracing::warn!("Failed to render waypoint {}: {}", poi_id, e))
            .ok()
    }

    pub fn panel_groups(&self) -> Vec<PanelGroup> {
        panel_groups(
            &self.sources,
            &self.taxonomy,
            self.mapping.as_ref(),
            &self.selection,
        )
    }

    /// Types offered when placing a custom POI, by category then label
    pub fn type_picker(&self) -> Vec<&TaxonomyItem> {
        self.taxonomy
            .category_order()
            .iter()
            .flat_map(|category| self.taxonomy.items_sorted_by_label(category))
            .collect()
    }

    /// (inside corridor, inside corridor with a selected type)
    pub fn counts(&self) -> (usize, usize) {
        let selected = self.selected_type_ids();
        let inside = self.pois.iter().filter(|p| p.inside_corridor);
        let inside_count = inside.clone().count();
        let selected_count = inside.filter(|p| selected.contains(&p.type_id)).count();
        (inside_count, selected_count)
    }

    #[inline]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[inline]
    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    #[inline]
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    #[inline]
    pub fn corridor(&self) -> &Corridor {
        &self.corridor
    }

    #[inline]
    pub fn corridor_config(&self) -> &CorridorConfig {
        &self.corridor_config
    }

    #[inline]
    pub fn pois(&self) -> &[PoiRecord] {
        &self.pois
    }

    #[inline]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[inline]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    #[inline]
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    #[inline]
    pub fn sources(&self) -> &SourceConfig {
        &self.sources
    }

    #[inline]
    pub fn custom_pois(&self) -> &[CustomPoi] {
        self.custom.list()
    }
}
