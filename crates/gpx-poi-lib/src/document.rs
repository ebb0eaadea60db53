//! Route document merge
//!
//! Waypoints are merged into the loaded GPX text at the event level: the
//! document is read with `quick-xml` and every event is written back as read,
//! so prefixed attributes, extension namespaces, comments and formatting all
//! survive untouched. New waypoints whose content signature already exists (in
//! the document or earlier in the same batch) are skipped, which makes
//! re-exporting idempotent.

use crate::export::{ExportFields, build_export_fields};
use crate::selection::ExportEntry;
use crate::{PoiError, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashSet;

/// Elements new waypoints are inserted before, in priority order
const INSERT_BEFORE: [&str; 3] = ["wpt", "rte", "trk"];

/// Waypoint children that take part in the signature, in signature order
const SIGNATURE_FIELDS: [&str; 3] = ["name", "desc", "sym"];

/// Content key of a waypoint
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WaypointSignature {
    lat: String,
    lon: String,
    sym: String,
    name: String,
    desc: String,
}

impl WaypointSignature {
    pub fn new(lat: &str, lon: &str, sym: &str, name: &str, desc: &str) -> Self {
        Self {
            lat: format_coordinate(lat),
            lon: format_coordinate(lon),
            sym: sym.trim().to_lowercase(),
            name: name.trim().to_string(),
            desc: desc.trim().to_string(),
        }
    }
}

/// Result of [`add_waypoints`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub document: String,
    pub inserted: usize,
    pub skipped: usize,
}

/// Insert one `<wpt>` per entry, skipping entries whose signature is already
/// present. New waypoints go before the first `wpt`, else `rte`, else `trk`.
pub fn add_waypoints(document: &str, entries: &[ExportEntry]) -> Result<MergeOutcome> {
    #[cfg(feature = "profiling")]
    profiling::scope!("document::add_waypoints");

    let outline = scan(document)?;
    let mut signatures: HashSet<WaypointSignature> = outline.waypoints.iter().cloned().collect();

    let mut new_waypoints = Vec::new();
    let mut skipped = 0;
    for entry in entries {
        let waypoint = NewWaypoint::from(entry);
        if signatures.insert(waypoint.signature()) {
            new_waypoints.push(waypoint);
        } else {
            skipped += 1;
        }
    }

    let insert_at = outline.insertion_point();
    let lead = outline.indent.as_ref().map(|indent| format!("\n{indent}"));
    let mut writer = Writer::new(Vec::new());
    for (index, event) in outline.events.iter().enumerate() {
        if index == insert_at {
            for waypoint in &new_waypoints {
                if let Some(lead) = &lead {
                    write_text(&mut writer, lead)?;
                }
                write_waypoint(
                    &mut writer,
                    waypoint,
                    &outline.prefix,
                    outline.indent.as_deref(),
                )?;
            }
        }
        write_event(&mut writer, event)?;
    }

    let inserted = new_waypoints.len();
    tracing::info!(
        "Added {} waypoints to route document ({} duplicates skipped)",
        inserted,
        skipped
    );

    Ok(MergeOutcome {
        document: finish(writer)?,
        inserted,
        skipped,
    })
}

/// Remove every top-level `<wpt>` together with the whitespace in front of
/// it, leaving everything else untouched
pub fn strip_waypoints(document: &str) -> Result<String> {
    let outline = scan(document)?;
    let mut skip = vec![false; outline.events.len()];
    let mut removed = 0;
    for child in outline.children.iter().filter(|c| c.name == "wpt") {
        skip[child.first..=child.last].fill(true);
        if child.first > 0 && is_whitespace(&outline.events[child.first - 1]) {
            skip[child.first - 1] = true;
        }
        removed += 1;
    }

    let mut writer = Writer::new(Vec::new());
    for (event, skipped) in outline.events.iter().zip(skip) {
        if !skipped {
            write_event(&mut writer, event)?;
        }
    }
    tracing::debug!("Stripped {} waypoints", removed);
    finish(writer)
}

/// Number of top-level `<wpt>` elements
pub fn count_waypoints(document: &str) -> Result<usize> {
    Ok(scan(document)?.waypoints.len())
}

/// Standalone `<wpt>` markup for one entry, as shown in popups
pub fn waypoint_snippet(entry: &ExportEntry) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write_waypoint(&mut writer, &NewWaypoint::from(entry), "", Some(""))?;
    finish(writer)
}

/// A waypoint about to be written
struct NewWaypoint {
    lat: String,
    lon: String,
    fields: ExportFields,
}

impl NewWaypoint {
    fn signature(&self) -> WaypointSignature {
        WaypointSignature::new(
            &self.lat,
            &self.lon,
            &self.fields.sym,
            &self.fields.name_label,
            &self.fields.desc,
        )
    }
}

impl From<&ExportEntry> for NewWaypoint {
    fn from(entry: &ExportEntry) -> Self {
        Self {
            lat: format!("{:.5}", entry.lat),
            lon: format!("{:.5}", entry.lon),
            fields: build_export_fields(&entry.tags, &entry.type_id, entry.distance_m),
        }
    }
}

/// Direct child of the document root, as an inclusive event range
#[derive(Debug)]
struct TopLevel {
    name: String,
    first: usize,
    last: usize,
}

/// Events of a route document plus the positions of its top-level elements
struct Outline<'a> {
    events: Vec<Event<'a>>,
    /// Prefix of the root element including the colon, usually empty
    prefix: String,
    children: Vec<TopLevel>,
    /// Signatures of the top-level waypoints, in document order
    waypoints: Vec<WaypointSignature>,
    root_end: usize,
    /// Line indentation of top-level elements; `None` for unindented documents
    indent: Option<String>,
}

impl Outline<'_> {
    /// Event index new waypoints are written in front of. In indented
    /// documents this is the whitespace before the anchor element, so each
    /// waypoint brings its own line break.
    fn insertion_point(&self) -> usize {
        let anchor = INSERT_BEFORE
            .iter()
            .find_map(|name| self.children.iter().find(|c| c.name == *name))
            .map(|c| c.first)
            .unwrap_or(self.root_end);
        if self.indent.is_some() && anchor > 0 && is_whitespace(&self.events[anchor - 1]) {
            anchor - 1
        } else {
            anchor
        }
    }
}

/// Signature parts collected while reading a `<wpt>`
#[derive(Default)]
struct PendingWaypoint {
    lat: String,
    lon: String,
    fields: [String; 3],
    /// Index into [`SIGNATURE_FIELDS`] of the open child
    open_field: Option<usize>,
}

impl PendingWaypoint {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let mut waypoint = Self::default();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| document_error("parse", e))?;
            let value = attribute
                .unescape_value()
                .map_err(|e| document_error("parse", e))?;
            match attribute.key.local_name().as_ref() {
                b"lat" => waypoint.lat = value.into_owned(),
                b"lon" => waypoint.lon = value.into_owned(),
                _ => {}
            }
        }
        Ok(waypoint)
    }

    fn push_text(&mut self, text: &str) {
        if let Some(field) = self.open_field {
            self.fields[field].push_str(text);
        }
    }

    fn signature(&self) -> WaypointSignature {
        let [name, desc, sym] = &self.fields;
        WaypointSignature::new(&self.lat, &self.lon, sym, name, desc)
    }
}

fn scan(document: &str) -> Result<Outline<'_>> {
    let mut reader = Reader::from_str(document.trim_start_matches('\u{feff}'));

    let mut events = Vec::new();
    let mut prefix = None;
    let mut children: Vec<TopLevel> = Vec::new();
    let mut waypoints = Vec::new();
    let mut root_end = None;
    let mut indent = None;
    let mut depth = 0usize;
    let mut pending: Option<PendingWaypoint> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            document_error("parse", format!("{e} (at byte {})", reader.buffer_position()))
        })?;
        let index = events.len();

        match &event {
            Event::Eof => break,
            Event::Start(start) | Event::Empty(start) => {
                let empty = matches!(event, Event::Empty(_));
                match depth {
                    0 if prefix.is_some() => {
                        return Err(PoiError::Document(
                            "Route document has more than one root element".to_string(),
                        ));
                    }
                    0 if empty => {
                        return Err(PoiError::Document("Route document is empty".to_string()));
                    }
                    0 => prefix = Some(qualified_prefix(start)),
                    1 => {
                        let name = local_name(start);
                        if indent.is_none() {
                            indent = events.last().and_then(line_indent);
                        }
                        if name == "wpt" {
                            let waypoint = PendingWaypoint::from_start(start)?;
                            if empty {
                                waypoints.push(waypoint.signature());
                            } else {
                                pending = Some(waypoint);
                            }
                        }
                        children.push(TopLevel {
                            name,
                            first: index,
                            last: index,
                        });
                    }
                    2 if !empty => {
                        if let Some(waypoint) = pending.as_mut() {
                            let name = local_name(start);
                            waypoint.open_field = SIGNATURE_FIELDS.iter().position(|f| *f == name);
                        }
                    }
                    _ => {}
                }
                if !empty {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    PoiError::Document("Unexpected closing tag in route document".to_string())
                })?;
                match depth {
                    0 => root_end = Some(index),
                    1 => {
                        if let Some(child) = children.last_mut() {
                            child.last = index;
                        }
                        if let Some(waypoint) = pending.take() {
                            waypoints.push(waypoint.signature());
                        }
                    }
                    2 => {
                        if let Some(waypoint) = pending.as_mut() {
                            waypoint.open_field = None;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(text) if depth == 3 => {
                if let Some(waypoint) = pending.as_mut() {
                    let text = text.unescape().map_err(|e| document_error("parse", e))?;
                    waypoint.push_text(&text);
                }
            }
            Event::CData(data) if depth == 3 => {
                if let Some(waypoint) = pending.as_mut() {
                    waypoint.push_text(&String::from_utf8_lossy(data));
                }
            }
            _ => {}
        }
        events.push(event);
    }

    match (prefix, root_end) {
        (Some(prefix), Some(root_end)) if depth == 0 => Ok(Outline {
            events,
            prefix,
            children,
            waypoints,
            root_end,
            indent,
        }),
        _ => Err(PoiError::Document(
            "Route document ended before its root element was closed".to_string(),
        )),
    }
}

/// `<wpt>` with `name`, `desc`, `sym` and `type` children. With an indent,
/// children go on their own lines one level deeper.
fn write_waypoint(
    writer: &mut Writer<Vec<u8>>,
    waypoint: &NewWaypoint,
    prefix: &str,
    indent: Option<&str>,
) -> Result<()> {
    let (child_lead, close_lead) = match indent {
        Some(indent) => {
            let unit = if indent.is_empty() { "  " } else { indent };
            (format!("\n{indent}{unit}"), format!("\n{indent}"))
        }
        None => (String::new(), String::new()),
    };

    let wpt = format!("{prefix}wpt");
    let mut start = BytesStart::new(wpt.as_str());
    start.push_attribute(("lat", waypoint.lat.as_str()));
    start.push_attribute(("lon", waypoint.lon.as_str()));
    write_event(writer, &Event::Start(start))?;

    for (name, text) in [
        ("name", &waypoint.fields.name_label),
        ("desc", &waypoint.fields.desc),
        ("sym", &waypoint.fields.sym),
        ("type", &waypoint.fields.sym),
    ] {
        let name = format!("{prefix}{name}");
        write_text(writer, &child_lead)?;
        write_event(writer, &Event::Start(BytesStart::new(name.as_str())))?;
        write_text(writer, text)?;
        write_event(writer, &Event::End(BytesEnd::new(name.as_str())))?;
    }

    write_text(writer, &close_lead)?;
    write_event(writer, &Event::End(BytesEnd::new(wpt.as_str())))
}

fn write_text(writer: &mut Writer<Vec<u8>>, text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    write_event(writer, &Event::Text(BytesText::new(text)))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: &Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| document_error("write", e))
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| PoiError::Document(format!("Route document is not UTF-8: {e}")))
}

fn document_error(action: &str, error: impl std::fmt::Display) -> PoiError {
    PoiError::Document(format!("Failed to {action} route document: {error}"))
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// `gpx:` for `<gpx:gpx>`, empty for `<gpx>`
fn qualified_prefix(start: &BytesStart<'_>) -> String {
    let name = start.name();
    let raw = name.as_ref();
    match raw.iter().position(|b| *b == b':') {
        Some(colon) => String::from_utf8_lossy(&raw[..=colon]).into_owned(),
        None => String::new(),
    }
}

fn is_whitespace(event: &Event<'_>) -> bool {
    match event {
        Event::Text(text) => text.iter().all(u8::is_ascii_whitespace),
        _ => false,
    }
}

/// Indentation after the last line break of a whitespace-only text event
fn line_indent(event: &Event<'_>) -> Option<String> {
    let Event::Text(text) = event else {
        return None;
    };
    if !is_whitespace(event) {
        return None;
    }
    let newline = text.iter().rposition(|b| *b == b'\n')?;
    Some(String::from_utf8_lossy(&text[newline + 1..]).into_owned())
}

/// Five decimals when numeric, else the trimmed input
fn format_coordinate(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => format!("{value:.5}"),
        _ => raw.trim().to_string(),
    }
}
