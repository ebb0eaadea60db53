//! Normalization of raw tagged elements into POI records

use crate::corridor::RouteGeometry;
use crate::overpass::OverpassElement;
use crate::rules::RuleSet;
use crate::taxonomy::Taxonomy;
use geo::Coord;
use std::collections::{BTreeMap, HashMap};

/// A classified point of interest from a fetch
#[derive(Clone, Debug, PartialEq)]
pub struct PoiRecord {
    /// `elementType/elementId`, stable across fetches
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub type_id: String,
    /// `None` renders with the generic icon
    pub icon: Option<String>,
    /// Whole meters to the route; `None` when no route is loaded
    pub distance_m: Option<f64>,
    /// Closest route point (x = lon, y = lat)
    pub snap: Option<Coord<f64>>,
    pub inside_corridor: bool,
    pub tags: BTreeMap<String, String>,
}

impl PoiRecord {
    #[inline]
    pub fn position(&self) -> Coord<f64> {
        Coord {
            x: self.lon,
            y: self.lat,
        }
    }
}

/// Turn a fetch response into POI records
///
/// Elements without a finite position are dropped. Duplicate identities keep
/// their first slot in the output order; the later element's content wins,
/// position included.
/// Corridor membership is left `false`; classify against a corridor afterwards.
pub fn normalize_elements(
    elements: &[OverpassElement],
    rules: &RuleSet,
    taxonomy: &Taxonomy,
    route: Option<&RouteGeometry>,
) -> Vec<PoiRecord> {
    #[cfg(feature = "profiling")]
    profiling::scope!("poi::normalize_elements");

    let mut records: Vec<PoiRecord> = Vec::with_capacity(elements.len());
    let mut index_by_id: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0usize;

    for element in elements {
        let Some((lat, lon)) = element.position() else {
            dropped += 1;
            continue;
        };

        let type_id = rules.classify(&element.tags).to_string();
        let icon = taxonomy.icon(&type_id).map(str::to_string);

        let snapped = route.and_then(|r| r.snap(Coord { x: lon, y: lat }));
        let record = PoiRecord {
            id: element.identity(),
            lat,
            lon,
            type_id,
            icon,
            distance_m: snapped.map(|(_, distance)| distance.round()),
            snap: snapped.map(|(snap, _)| snap),
            inside_corridor: false,
            tags: element.tags.clone(),
        };

        match index_by_id.get(&record.id) {
            Some(&index) => records[index] = record,
            None => {
                index_by_id.insert(record.id.clone(), records.len());
                records.push(record);
            }
        }
    }

    tracing::debug!(
        "Normalized {} POIs from {} elements ({} without position)",
        records.len(),
        elements.len(),
        dropped
    );
    records
}
