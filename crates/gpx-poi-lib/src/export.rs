//! Waypoint display fields
//!
//! Derives the `name`, `desc` and `sym` of an exported waypoint from the POI's
//! tags, type id and distance to the route.

use crate::rules::GENERIC_TYPE_ID;
use std::collections::BTreeMap;

/// Label used when nothing more specific is known
const FALLBACK_LABEL: &str = "POI";

/// Well-known tag values and their waypoint names, in priority order
const NAMING_TABLE: &[(&str, &str, &str)] = &[
    ("amenity", "drinking_water", "Water"),
    ("amenity", "toilets", "Toilet"),
    ("amenity", "cafe", "Coffee"),
    ("amenity", "restaurant", "Restaurant"),
    ("amenity", "fast_food", "Fast Food"),
    ("shop", "bakery", "Bakery"),
    ("shop", "supermarket", "Supermarket"),
    ("shop", "convenience", "Convenience Store"),
    ("amenity", "bar", "Bar"),
    ("amenity", "pub", "Pub"),
    ("amenity", "fuel", "Gas Station"),
    ("amenity", "pharmacy", "Pharmacy"),
    ("amenity", "hospital", "Hospital"),
    ("amenity", "library", "Library"),
    ("tourism", "information", "Information"),
    ("amenity", "ferry_terminal", "Ferry Terminal"),
    ("amenity", "parking", "Parking"),
    ("amenity", "bus_station", "Bus Station"),
    ("railway", "station", "Station"),
    ("public_transport", "station", "Station"),
    ("amenity", "shower", "Shower"),
    ("shop", "bicycle", "Bicycle Shop"),
    ("amenity", "bicycle_repair_station", "Bicycle Repair Station"),
    ("amenity", "bicycle_parking", "Bike Parking"),
    ("amenity", "bicycle_rental", "Bike Share"),
    ("tourism", "camp_site", "Campsite"),
    ("leisure", "park", "Park"),
    ("highway", "rest_area", "Rest Area"),
    ("amenity", "shelter", "Shelter"),
    ("tourism", "trailhead", "Trailhead"),
    ("tourism", "viewpoint", "Viewpoint"),
    ("natural", "peak", "Summit"),
    ("natural", "valley", "Valley"),
    ("leisure", "dog_park", "Dog Park"),
    ("tourism", "attraction", "Attraction"),
    ("tourism", "artwork", "Artwork"),
    ("historic", "monument", "Monument"),
    ("shop", "wine", "Wine Shop"),
    ("craft", "winery", "Winery"),
    ("shop", "mall", "Shopping Mall"),
    ("shop", "department_store", "Department Store"),
    ("amenity", "atm", "ATM"),
];

/// Text written into one waypoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportFields {
    pub name_label: String,
    /// Also written as `<type>`
    pub sym: String,
    pub desc: String,
}

pub fn build_export_fields(
    tags: &BTreeMap<String, String>,
    type_id: &str,
    distance_m: Option<f64>,
) -> ExportFields {
    let sym = match type_id.trim() {
        "" => GENERIC_TYPE_ID.to_string(),
        trimmed => trimmed.to_lowercase(),
    };

    let name_label = display_name_from_tags(tags)
        .map(str::to_string)
        .unwrap_or_else(|| friendly_from_type(&sym));

    let own_name = tags.get("name").map(|n| n.trim()).filter(|n| !n.is_empty());
    let hours = tags
        .get("opening_hours")
        .filter(|h| !h.is_empty())
        .map(|h| pretty_opening_hours(h));

    let desc = [
        Some(sym.clone()),
        own_name.map(str::to_string),
        format_distance(distance_m),
        hours,
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" | ");

    ExportFields {
        name_label,
        sym,
        desc,
    }
}

/// First naming-table entry matching the tags; values compare case-insensitively
pub fn display_name_from_tags(tags: &BTreeMap<String, String>) -> Option<&'static str> {
    NAMING_TABLE
        .iter()
        .find(|(key, value, _)| {
            tags.get(*key)
                .is_some_and(|tag| tag.to_lowercase() == *value)
        })
        .map(|(_, _, label)| *label)
}

/// `bicycle_repair-station` → `Bicycle Repair Station`
pub fn friendly_from_type(type_id: &str) -> String {
    let spaced = type_id
        .split(|c| c == '_' || c == '-' || char::is_whitespace(c))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if spaced.is_empty() {
        return FALLBACK_LABEL.to_string();
    }

    let mut out = String::with_capacity(spaced.len());
    let mut previous_is_word = false;
    for c in spaced.chars() {
        if c.is_ascii_lowercase() && !previous_is_word {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        previous_is_word = c.is_ascii_alphanumeric();
    }
    out
}

/// Whole meters below 1 km, one decimal below 10 km, whole km above
pub fn format_distance(distance_m: Option<f64>) -> Option<String> {
    let meters = distance_m.filter(|d| d.is_finite())?.round();
    Some(if meters >= 10_000.0 {
        format!("{:.0} km", meters / 1000.0)
    } else if meters >= 1000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{meters:.0} m")
    })
}

/// First `H:MM-H:MM` range as `H:MM – H:MM`, else the input unchanged
pub fn pretty_opening_hours(hours: &str) -> String {
    let bytes = hours.as_bytes();
    (0..bytes.len())
        .find_map(|start| {
            let (open, rest) = scan_time(hours, start)?;
            let rest = skip_spaces(hours, rest);
            let rest = if hours[rest..].starts_with('-') {
                rest + 1
            } else if hours[rest..].starts_with('–') {
                rest + '–'.len_utf8()
            } else {
                return None;
            };
            let rest = skip_spaces(hours, rest);
            let (close, _) = scan_time(hours, rest)?;
            Some(format!("{open} – {close}"))
        })
        .unwrap_or_else(|| hours.to_string())
}

/// `H:MM` or `HH:MM` starting at byte `start`
fn scan_time(text: &str, start: usize) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    let digit = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);

    [2, 1].into_iter().find_map(|hour_digits| {
        let colon = start + hour_digits;
        let matched = (start..colon).all(digit)
            && bytes.get(colon) == Some(&b':')
            && digit(colon + 1)
            && digit(colon + 2);
        matched.then(|| (&text[start..colon + 3], colon + 3))
    })
}

fn skip_spaces(text: &str, mut index: usize) -> usize {
    while let Some(c) = text[index..].chars().next().filter(|c| c.is_whitespace()) {
        index += c.len_utf8();
    }
    index
}
