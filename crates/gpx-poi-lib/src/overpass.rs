//! Query service boundary
//!
//! Builds Overpass QL queries from source items and an area, defines the
//! [`QueryService`] seam the session fetches through, and provides
//! [`OverpassClient`], an HTTP implementation that retries each endpoint with a
//! fixed backoff before failing over to the next one.

use crate::config::{SourceItem, TagPair};
use crate::corridor::QueryArea;
use crate::{PoiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::future::Future;
use std::time::Duration;

/// Public Overpass interpreters, tried in order
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "https://overpass-api.de/api/interpreter",
    "https://overpass.kumi.systems/api/interpreter",
    "https://lz4.overpass-api.de/api/interpreter",
];

/// Server-side timeout written into queries, in seconds
pub const DEFAULT_QUERY_TIMEOUT_S: u32 = 90;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// A tagged element as returned by the query service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub element_type: String,
    pub id: i64,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Centroid for ways and relations (`out center`)
    #[serde(default)]
    pub center: Option<LatLon>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl OverpassElement {
    /// `type/id`, unique per response
    pub fn identity(&self) -> String {
        format!("{}/{}", self.element_type, self.id)
    }

    /// Own coordinate, else centroid; `None` unless both are finite
    pub fn position(&self) -> Option<(f64, f64)> {
        let finite = |lat: f64, lon: f64| (lat.is_finite() && lon.is_finite()).then_some((lat, lon));
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => finite(lat, lon),
            _ => self.center.and_then(|c| finite(c.lat, c.lon)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
}

impl OverpassResponse {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Build an Overpass QL query for the fetchable items inside `area`
///
/// Every OR pair becomes a `node` and a `way` statement; a non-empty AND list
/// becomes one chained `node` and `way` statement. Incomplete pairs are skipped.
pub fn build_query<'a>(
    area: &QueryArea,
    items: impl IntoIterator<Item = &'a SourceItem>,
    timeout_s: u32,
) -> String {
    let area_filter = area_filter(area);
    let mut statements = Vec::new();

    for item in items.into_iter().filter(|item| item.fetch) {
        for pair in item.tags.iter().filter(|p| p.is_complete()) {
            let filter = tag_filter(pair);
            statements.push(format!("node{filter}{area_filter};"));
            statements.push(format!("way{filter}{area_filter};"));
        }
        if !item.tags_all.is_empty() && item.tags_all.iter().all(TagPair::is_complete) {
            let filter: String = item.tags_all.iter().map(tag_filter).collect();
            statements.push(format!("node{filter}{area_filter};"));
            statements.push(format!("way{filter}{area_filter};"));
        }
    }

    if statements.is_empty() {
        return format!("[out:json][timeout:{timeout_s}];node(0,0,0,0);out body;");
    }

    format!(
        "[out:json][timeout:{timeout_s}];\n(\n{}\n);\nout body center;",
        statements.join("\n")
    )
}

fn tag_filter(pair: &TagPair) -> String {
    format!("[\"{}\"=\"{}\"]", escape_ql(&pair.k), escape_ql(&pair.v))
}

fn escape_ql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn area_filter(area: &QueryArea) -> String {
    match area {
        QueryArea::BoundingBox(rect) => format!(
            "({},{},{},{})",
            rect.min().y,
            rect.min().x,
            rect.max().y,
            rect.max().x
        ),
        QueryArea::Polygon(ring) => {
            let mut coords = ring.0.as_slice();
            if coords.len() > 1 && coords.first() == coords.last() {
                coords = &coords[..coords.len() - 1];
            }
            let mut poly = String::new();
            for (i, c) in coords.iter().enumerate() {
                if i > 0 {
                    poly.push(' ');
                }
                let _ = write!(poly, "{} {}", c.y, c.x);
            }
            format!("(poly:\"{poly}\")")
        }
    }
}

/// Anything that can answer a structured geographic query
pub trait QueryService {
    fn query(&self, ql: &str) -> impl Future<Output = Result<OverpassResponse>>;
}

/// Per-endpoint retry behaviour
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub attempts_per_endpoint: usize,
    /// Pause after a failed attempt; multiplied by the attempt number after
    /// an HTTP status failure
    pub backoff: Duration,
    /// Timeout of a single attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts_per_endpoint: 2,
            backoff: Duration::from_millis(400),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Why a single attempt failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The endpoint answered with a non-success status
    Status(u16),
    /// Connection, timeout or decoding failure
    Transport(String),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Transport(message) => f.write_str(message),
        }
    }
}

/// Run `attempt` against each endpoint in order, retrying per `policy`.
/// Only when every endpoint is exhausted is one aggregated error returned.
pub async fn with_failover<T, F, Fut>(
    endpoints: &[String],
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptFailure>>,
{
    let mut attempts = 0;
    let mut last_error = String::from("No query endpoints configured");

    for endpoint in endpoints {
        for retry in 0..policy.attempts_per_endpoint {
            attempts += 1;
            match attempt(endpoint.clone()).await {
                Ok(value) => {
                    tracing::debug!("Query succeeded on {} (attempt {})", endpoint, attempts);
                    return Ok(value);
                }
                Err(failure) => {
                    tracing::warn!("Query attempt {} on {} failed: {}", retry + 1, endpoint, failure);
                    let pause = match failure {
                        AttemptFailure::Status(_) => policy.backoff * (retry as u32 + 1),
                        AttemptFailure::Transport(_) => policy.backoff,
                    };
                    last_error = failure.to_string();
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    Err(PoiError::QueryFailed {
        attempts,
        last_error,
    })
}

/// HTTP client for Overpass interpreters
#[derive(Clone, Debug)]
pub struct OverpassClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    policy: RetryPolicy,
}

impl OverpassClient {
    pub fn new(endpoints: Vec<String>, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gpx-poi-lib/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoints,
            policy,
        })
    }

    /// Client for [`DEFAULT_ENDPOINTS`] with the default retry policy
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            RetryPolicy::default(),
        )
    }

    #[inline]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn attempt(
        &self,
        endpoint: String,
        ql: &str,
    ) -> std::result::Result<OverpassResponse, AttemptFailure> {
        let response = self
            .client
            .post(&endpoint)
            .timeout(self.policy.timeout)
            .form(&[("data", ql)])
            .send()
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure::Status(status.as_u16()));
        }

        response
            .json::<OverpassResponse>()
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))
    }
}

impl QueryService for OverpassClient {
    fn query(&self, ql: &str) -> impl Future<Output = Result<OverpassResponse>> {
        with_failover(&self.endpoints, &self.policy, move |endpoint| {
            self.attempt(endpoint, ql)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, LineString, Rect};
    use std::sync::Mutex;

    fn source(id: &str, tags: &[(&str, &str)], tags_all: &[(&str, &str)], fetch: bool) -> SourceItem {
        SourceItem {
            id: id.to_string(),
            label: id.to_string(),
            tags: tags.iter().map(|(k, v)| TagPair::new(*k, *v)).collect(),
            tags_all: tags_all.iter().map(|(k, v)| TagPair::new(*k, *v)).collect(),
            default_selected: false,
            fetch,
            type_id: None,
        }
    }

    fn bbox() -> QueryArea {
        QueryArea::BoundingBox(Rect::new(
            Coord { x: 16.0, y: 48.0 },
            Coord { x: 16.5, y: 48.25 },
        ))
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            attempts_per_endpoint: 2,
            backoff: Duration::ZERO,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_empty_query_is_valid() {
        let items = [source("off", &[("amenity", "cafe")], &[], false)];
        assert_eq!(
            build_query(&bbox(), &items, 90),
            "[out:json][timeout:90];node(0,0,0,0);out body;"
        );
    }

    #[test]
    fn test_bbox_query() {
        let items = [source("water", &[("amenity", "drinking_water"), ("", "x")], &[], true)];
        let query = build_query(&bbox(), &items, 25);
        assert!(query.starts_with("[out:json][timeout:25];"));
        assert!(query.contains(r#"node["amenity"="drinking_water"](48,16,48.25,16.5);"#));
        assert!(query.contains(r#"way["amenity"="drinking_water"](48,16,48.25,16.5);"#));
        assert!(query.ends_with("out body center;"));
        assert_eq!(query.matches("node[").count(), 1);
    }

    #[test]
    fn test_and_pairs_are_chained() {
        let items = [source("wine", &[], &[("craft", "winery"), ("shop", "wine")], true)];
        let query = build_query(&bbox(), &items, 90);
        assert!(query.contains(r#"node["craft"="winery"]["shop"="wine"](48,16,48.25,16.5);"#));
    }

    #[test]
    fn test_polygon_area_and_escaping() {
        let ring = LineString::from(vec![
            Coord { x: 16.0, y: 48.0 },
            Coord { x: 16.1, y: 48.0 },
            Coord { x: 16.1, y: 48.1 },
            Coord { x: 16.0, y: 48.0 },
        ]);
        let items = [source("q", &[("name", "Joe's \"Bar\"")], &[], true)];
        let query = build_query(&QueryArea::Polygon(ring), &items, 90);
        assert!(query.contains(r#"(poly:"48 16 48 16.1 48.1 16.1")"#));
        assert!(query.contains(r#"["name"="Joe's \"Bar\""]"#));
    }

    #[test]
    fn test_parse_response() {
        let json = r#"{"version": 0.6, "generator": "Overpass API", "elements": [
            {"type": "node", "id": 1, "lat": 48.1, "lon": 16.2, "tags": {"amenity": "cafe"}},
            {"type": "way", "id": 2, "center": {"lat": 48.3, "lon": 16.4}, "nodes": [1, 2, 3]},
            {"type": "way", "id": 3}
        ]}"#;
        let response = OverpassResponse::from_json(json).unwrap();
        assert_eq!(response.elements.len(), 3);
        assert_eq!(response.elements[0].identity(), "node/1");
        assert_eq!(response.elements[0].position(), Some((48.1, 16.2)));
        assert_eq!(response.elements[1].position(), Some((48.3, 16.4)));
        assert!(response.elements[1].tags.is_empty());
        assert_eq!(response.elements[2].position(), None);
    }

    #[tokio::test]
    async fn test_failover_to_second_endpoint() {
        let calls = Mutex::new(Vec::new());
        let endpoints = vec!["a".to_string(), "b".to_string()];
        let result = with_failover(&endpoints, &no_wait(), |endpoint| {
            calls.lock().unwrap().push(endpoint.clone());
            async move {
                if endpoint == "a" {
                    Err(AttemptFailure::Status(504))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(*calls.lock().unwrap(), vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_aggregates() {
        let endpoints = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result: Result<()> = with_failover(&endpoints, &no_wait(), |endpoint| async move {
            Err(AttemptFailure::Transport(format!("{endpoint} unreachable")))
        })
        .await;

        match result {
            Err(PoiError::QueryFailed {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 6);
                assert_eq!(last_error, "c unreachable");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_endpoints_fails() {
        let result: Result<()> = with_failover(&[], &no_wait(), |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(PoiError::QueryFailed { attempts: 0, .. })));
    }
}
