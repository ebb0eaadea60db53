//! Selection state and export set builder
//!
//! [`Selection`] holds which source items are checked plus per-POI overrides.
//! [`build_export_set`] is a pure function of the selection, the current POI
//! records and the custom POIs; callers rebuild it after every change.

use crate::config::{MappingConfig, SourceConfig, SourceItem};
use crate::poi::PoiRecord;
use crate::rules::resolve_target_type;
use crate::taxonomy::Taxonomy;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// User override for a single POI
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForceState {
    #[default]
    None,
    Include,
    Exclude,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    sources: BTreeSet<String>,
    force_include: BTreeSet<String>,
    force_exclude: BTreeSet<String>,
}

impl Selection {
    /// Sources marked `defaultSelected`
    pub fn from_defaults(sources: &SourceConfig) -> Self {
        Self {
            sources: sources
                .items
                .iter()
                .filter(|item| item.default_selected)
                .map(|item| item.id.clone())
                .collect(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_source_selected(&self, source_id: &str) -> bool {
        self.sources.contains(source_id)
    }

    pub fn set_source(&mut self, source_id: &str, selected: bool) {
        if selected {
            self.sources.insert(source_id.to_string());
        } else {
            self.sources.remove(source_id);
        }
    }

    /// Check or uncheck every source whose type belongs to `category_id`
    pub fn set_category(
        &mut self,
        category_id: &str,
        selected: bool,
        sources: &SourceConfig,
        taxonomy: &Taxonomy,
        mapping: Option<&MappingConfig>,
    ) -> usize {
        let mut changed = 0;
        for item in &sources.items {
            let in_category = resolve_target_type(item, taxonomy, mapping)
                .and_then(|type_id| taxonomy.item(&type_id).map(|t| t.category_id == category_id))
                .unwrap_or(false);
            if in_category && self.is_source_selected(&item.id) != selected {
                self.set_source(&item.id, selected);
                changed += 1;
            }
        }
        changed
    }

    pub fn selected_sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(String::as_str)
    }

    /// Type ids of the checked sources
    pub fn selected_type_ids(
        &self,
        sources: &SourceConfig,
        taxonomy: &Taxonomy,
        mapping: Option<&MappingConfig>,
    ) -> BTreeSet<String> {
        sources
            .items
            .iter()
            .filter(|item| self.is_source_selected(&item.id))
            .filter_map(|item| resolve_target_type(item, taxonomy, mapping))
            .collect()
    }

    pub fn force_state(&self, poi_id: &str) -> ForceState {
        if self.force_include.contains(poi_id) {
            ForceState::Include
        } else if self.force_exclude.contains(poi_id) {
            ForceState::Exclude
        } else {
            ForceState::None
        }
    }

    /// Include and exclude are mutually exclusive; setting one clears the other
    pub fn set_force(&mut self, poi_id: &str, state: ForceState) {
        self.force_include.remove(poi_id);
        self.force_exclude.remove(poi_id);
        match state {
            ForceState::Include => {
                self.force_include.insert(poi_id.to_string());
            }
            ForceState::Exclude => {
                self.force_exclude.insert(poi_id.to_string());
            }
            ForceState::None => {}
        }
    }

    pub fn clear_forced(&mut self) {
        self.force_include.clear();
        self.force_exclude.clear();
    }

    #[inline]
    pub fn forced_count(&self) -> usize {
        self.force_include.len() + self.force_exclude.len()
    }
}

/// A POI placed by hand; always exported
#[derive(Clone, Debug, PartialEq)]
pub struct CustomPoi {
    /// `custom:N`
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub type_id: String,
    pub label: String,
    /// Shown in popups only
    pub note: Option<String>,
    pub icon: Option<String>,
}

/// Custom POIs of one session with monotonically numbered ids
#[derive(Clone, Debug, Default)]
pub struct CustomPoiRegistry {
    next_id: u64,
    pois: Vec<CustomPoi>,
}

impl CustomPoiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a POI. The label defaults to the type's taxonomy label, then the type id.
    pub fn add(
        &mut self,
        lat: f64,
        lon: f64,
        type_id: &str,
        label: Option<&str>,
        note: Option<&str>,
        taxonomy: &Taxonomy,
    ) -> &CustomPoi {
        self.next_id += 1;
        let known = taxonomy.item(type_id);
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .or_else(|| known.map(|item| item.label.clone()))
            .unwrap_or_else(|| type_id.to_string());

        let poi = CustomPoi {
            id: format!("custom:{}", self.next_id),
            lat,
            lon,
            type_id: type_id.to_string(),
            label,
            note: note.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
            icon: known.and_then(|item| item.icon.clone()),
        };
        tracing::debug!("Added custom POI {} ({})", poi.id, poi.type_id);

        let index = self.pois.len();
        self.pois.push(poi);
        &self.pois[index]
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.pois.len();
        self.pois.retain(|poi| poi.id != id);
        self.pois.len() != before
    }

    /// Drop all POIs; numbering continues
    pub fn clear(&mut self) {
        self.pois.clear();
    }

    #[inline]
    pub fn list(&self) -> &[CustomPoi] {
        &self.pois
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pois.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }
}

/// One waypoint-to-be
#[derive(Clone, Debug, PartialEq)]
pub struct ExportEntry {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub type_id: String,
    pub distance_m: Option<f64>,
    pub tags: BTreeMap<String, String>,
}

impl From<&PoiRecord> for ExportEntry {
    fn from(record: &PoiRecord) -> Self {
        Self {
            id: record.id.clone(),
            lat: record.lat,
            lon: record.lon,
            type_id: record.type_id.clone(),
            distance_m: record.distance_m,
            tags: record.tags.clone(),
        }
    }
}

impl From<&CustomPoi> for ExportEntry {
    fn from(poi: &CustomPoi) -> Self {
        Self {
            id: poi.id.clone(),
            lat: poi.lat,
            lon: poi.lon,
            type_id: poi.type_id.clone(),
            distance_m: None,
            tags: BTreeMap::from([("name".to_string(), poi.label.clone())]),
        }
    }
}

/// Fetched records first, then custom POIs
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportSet {
    entries: Vec<ExportEntry>,
    fetched: usize,
}

impl ExportSet {
    #[inline]
    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    /// Entries that came from the fetch result
    #[inline]
    pub fn fetched_count(&self) -> usize {
        self.fetched
    }

    #[inline]
    pub fn custom_count(&self) -> usize {
        self.entries.len() - self.fetched
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Linear scan; collect [`ExportSet::ids`] for repeated lookups
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.entries.iter().map(|entry| entry.id.as_str()).collect()
    }
}

/// Records inside the corridor with a selected type (unless force-excluded),
/// plus force-included records, plus every custom POI
pub fn build_export_set(
    pois: &[PoiRecord],
    selected_types: &BTreeSet<String>,
    selection: &Selection,
    custom: &[CustomPoi],
) -> ExportSet {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut entries = Vec::new();

    for record in pois {
        let eligible = match selection.force_state(&record.id) {
            ForceState::Include => true,
            ForceState::Exclude => false,
            ForceState::None => record.inside_corridor && selected_types.contains(&record.type_id),
        };
        if eligible && seen.insert(record.id.as_str()) {
            entries.push(ExportEntry::from(record));
        }
    }

    let fetched = entries.len();
    entries.extend(custom.iter().map(ExportEntry::from));

    ExportSet { entries, fetched }
}

/// A checkbox row in the source panel
#[derive(Clone, Debug, PartialEq)]
pub struct PanelRow {
    pub source_id: String,
    pub label: String,
    pub type_id: String,
    pub icon: Option<String>,
    pub selected: bool,
}

/// Rows of one category, in taxonomy order
#[derive(Clone, Debug, PartialEq)]
pub struct PanelGroup {
    pub category_id: String,
    pub label: String,
    pub color: String,
    pub expanded: bool,
    pub rows: Vec<PanelRow>,
}

/// Source rows grouped by category in taxonomy order and sorted by label.
/// Sources that do not resolve to a taxonomy item are left out.
pub fn panel_groups(
    sources: &SourceConfig,
    taxonomy: &Taxonomy,
    mapping: Option<&MappingConfig>,
    selection: &Selection,
) -> Vec<PanelGroup> {
    let mut by_category: BTreeMap<&str, Vec<PanelRow>> = BTreeMap::new();
    for item in &sources.items {
        let Some(type_id) = resolve_target_type(item, taxonomy, mapping) else {
            continue;
        };
        let Some(meta) = taxonomy.item(&type_id) else {
            continue;
        };
        by_category
            .entry(meta.category_id.as_str())
            .or_default()
            .push(PanelRow {
                source_id: item.id.clone(),
                label: item.label.clone(),
                icon: meta.icon.clone(),
                type_id,
                selected: selection.is_source_selected(&item.id),
            });
    }

    taxonomy
        .category_order()
        .iter()
        .filter_map(|category_id| {
            let mut rows = by_category.remove(category_id.as_str())?;
            let meta = taxonomy.category(category_id)?;
            rows.sort_by_key(|row| row.label.to_lowercase());
            Some(PanelGroup {
                category_id: category_id.clone(),
                label: meta.label.clone(),
                color: meta.color.clone(),
                expanded: meta.default_expanded,
                rows,
            })
        })
        .collect()
}

/// Label and icon chips for the checked sources, in source order
pub fn selected_chips<'a>(
    sources: &'a SourceConfig,
    taxonomy: &'a Taxonomy,
    mapping: Option<&'a MappingConfig>,
    selection: &'a Selection,
) -> impl Iterator<Item = (&'a SourceItem, Option<&'a str>)> {
    sources
        .items
        .iter()
        .filter(move |item| selection.is_source_selected(&item.id))
        .filter_map(move |item| {
            let type_id = resolve_target_type(item, taxonomy, mapping)?;
            Some((item, taxonomy.icon(&type_id)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaxonomyConfig;

    fn create_test_taxonomy() -> Taxonomy {
        Taxonomy::new(
            &TaxonomyConfig::from_json(
                r#"{"categories": [
                    {"id": "supply", "label": "Supply", "items": [
                        {"id": "drinking_water", "label": "Water", "icon": "icons/water.svg"},
                        {"id": "bakery", "label": "Bakery"}
                    ]},
                    {"id": "sleep", "label": "Sleep", "items": [
                        {"id": "camp_site", "label": "Campsite"}
                    ]}
                ]}"#,
            )
            .unwrap(),
        )
    }

    fn create_test_sources() -> SourceConfig {
        SourceConfig::from_json(
            r#"{"items": [
                {"id": "water", "label": "Drinking water", "defaultSelected": true,
                 "tags": [{"k": "amenity", "v": "drinking_water"}], "typeId": "drinking_water"},
                {"id": "bakery", "label": "Bakery", "tags": [{"k": "shop", "v": "bakery"}]},
                {"id": "camp", "label": "Camping", "tags": [{"k": "tourism", "v": "camp_site"}]},
                {"id": "lost", "label": "Unknown", "tags": [{"k": "x", "v": "y"}]}
            ]}"#,
        )
        .unwrap()
    }

    fn create_test_mapping() -> MappingConfig {
        MappingConfig::from_json(r#"{"map": {"camp": "camp_site"}}"#).unwrap()
    }

    fn record(id: &str, type_id: &str, inside: bool) -> PoiRecord {
        PoiRecord {
            id: id.to_string(),
            lat: 48.0,
            lon: 16.0,
            type_id: type_id.to_string(),
            icon: None,
            distance_m: Some(10.0),
            snap: None,
            inside_corridor: inside,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_defaults_and_type_ids() {
        let sources = create_test_sources();
        let taxonomy = create_test_taxonomy();
        let mapping = create_test_mapping();
        let mut selection = Selection::from_defaults(&sources);
        assert!(selection.is_source_selected("water"));
        assert!(!selection.is_source_selected("bakery"));

        selection.set_source("camp", true);
        selection.set_source("lost", true);
        let types = selection.selected_type_ids(&sources, &taxonomy, Some(&mapping));
        assert_eq!(
            types.into_iter().collect::<Vec<_>>(),
            vec!["camp_site", "drinking_water"]
        );
    }

    #[test]
    fn test_category_select_all_and_none() {
        let sources = create_test_sources();
        let taxonomy = create_test_taxonomy();
        let mut selection = Selection::default();

        assert_eq!(selection.set_category("supply", true, &sources, &taxonomy, None), 2);
        assert!(selection.is_source_selected("water"));
        assert!(selection.is_source_selected("bakery"));
        assert!(!selection.is_source_selected("camp"));

        assert_eq!(selection.set_category("supply", false, &sources, &taxonomy, None), 2);
        assert_eq!(selection.selected_sources().count(), 0);
    }

    #[test]
    fn test_force_states_are_exclusive() {
        let mut selection = Selection::default();
        selection.set_force("node/1", ForceState::Include);
        assert_eq!(selection.force_state("node/1"), ForceState::Include);
        selection.set_force("node/1", ForceState::Exclude);
        assert_eq!(selection.force_state("node/1"), ForceState::Exclude);
        assert_eq!(selection.forced_count(), 1);
        selection.set_force("node/1", ForceState::None);
        assert_eq!(selection.force_state("node/1"), ForceState::None);
    }

    #[test]
    fn test_export_set_clauses() {
        let selected = BTreeSet::from(["drinking_water".to_string()]);
        let pois = vec![
            record("node/1", "drinking_water", true),
            record("node/2", "drinking_water", false),
            record("node/3", "bakery", true),
            record("node/4", "bakery", false),
        ];
        let mut selection = Selection::default();

        let set = build_export_set(&pois, &selected, &selection, &[]);
        assert_eq!(set.len(), 1);
        assert!(set.contains("node/1"));

        // Forced inclusion ignores corridor and selection
        selection.set_force("node/4", ForceState::Include);
        selection.set_force("node/1", ForceState::Include);
        let set = build_export_set(&pois, &selected, &selection, &[]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("node/4"));

        selection.set_force("node/4", ForceState::None);
        let set = build_export_set(&pois, &selected, &selection, &[]);
        assert!(!set.contains("node/4"));

        selection.set_force("node/1", ForceState::Exclude);
        let set = build_export_set(&pois, &selected, &selection, &[]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_custom_pois_are_always_exported() {
        let taxonomy = create_test_taxonomy();
        let mut registry = CustomPoiRegistry::new();
        let first = registry
            .add(48.0, 16.0, "drinking_water", None, Some("  "), &taxonomy)
            .clone();
        assert_eq!(first.id, "custom:1");
        assert_eq!(first.label, "Water");
        assert_eq!(first.note, None);
        assert_eq!(first.icon.as_deref(), Some("icons/water.svg"));

        let second = registry.add(48.1, 16.1, "hut", Some("My hut"), None, &taxonomy);
        assert_eq!(second.id, "custom:2");
        assert_eq!(second.label, "My hut");

        let set = build_export_set(
            &[record("node/1", "drinking_water", true)],
            &BTreeSet::new(),
            &Selection::default(),
            registry.list(),
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.fetched_count(), 0);
        assert_eq!(set.custom_count(), 2);
        assert_eq!(set.entries()[0].distance_m, None);
        assert_eq!(set.entries()[1].tags.get("name").unwrap(), "My hut");

        assert!(registry.remove("custom:1"));
        assert!(!registry.remove("custom:1"));
        registry.clear();
        let third = registry.add(48.0, 16.0, "bakery", None, None, &taxonomy);
        assert_eq!(third.id, "custom:3");
        assert_eq!(third.label, "Bakery");
    }

    #[test]
    fn test_duplicate_records_are_exported_once() {
        let selected = BTreeSet::from(["bakery".to_string()]);
        let pois = vec![record("node/3", "bakery", true), record("node/3", "bakery", true)];
        let set = build_export_set(&pois, &selected, &Selection::default(), &[]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_panel_groups_follow_taxonomy_order() {
        let sources = create_test_sources();
        let taxonomy = create_test_taxonomy();
        let mapping = create_test_mapping();
        let selection = Selection::from_defaults(&sources);

        let groups = panel_groups(&sources, &taxonomy, Some(&mapping), &selection);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].category_id, "supply");
        let labels: Vec<_> = groups[0].rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Bakery", "Drinking water"]);
        assert!(groups[0].rows[1].selected);
        assert_eq!(groups[1].rows[0].type_id, "camp_site");

        let chips: Vec<_> = selected_chips(&sources, &taxonomy, Some(&mapping), &selection)
            .map(|(item, icon)| (item.label.as_str(), icon))
            .collect();
        assert_eq!(chips, vec![("Drinking water", Some("icons/water.svg"))]);
    }
}
