use clap::{Parser, ValueEnum};
use gpx_poi_lib::overpass::{DEFAULT_ENDPOINTS, DEFAULT_QUERY_TIMEOUT_S};
use gpx_poi_lib::{CorridorConfig, FetchScope, RetryPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// GPX POI Enricher - Add points of interest along a route to its GPX file
pub struct Settings {
    /// GPX route to enrich
    #[clap(value_name = "FILE")]
    pub route: PathBuf,

    /// Output file (default: `<stem>_enriched.gpx` next to the input)
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Type taxonomy (categories and items)
    #[clap(long, value_name = "FILE", default_value = "config/taxonomy.json")]
    pub taxonomy: PathBuf,

    /// Source items (tag predicates to query and classify with)
    #[clap(long, value_name = "FILE", default_value = "config/sources.json")]
    pub sources: PathBuf,

    /// Optional source id → taxonomy id mapping
    #[clap(long, value_name = "FILE")]
    pub mapping: Option<PathBuf>,

    /// Corridor half-width in meters; only POIs inside are exported
    #[clap(short, long, default_value = "100")]
    pub corridor_width: f64,

    /// Search half-width in meters; bounds the query area
    #[clap(short, long, default_value = "500")]
    pub search_width: f64,

    /// Route points used for geometry (larger routes are downsampled)
    #[clap(long, default_value = "2000")]
    pub max_route_points: usize,

    /// Coordinate budget of the search polygon
    #[clap(long, default_value = "400")]
    pub max_search_points: usize,

    /// Initial simplification tolerance of the search polygon in meters
    #[clap(long, default_value = "25")]
    pub simplify_tolerance: f64,

    /// Which sources to query
    #[clap(long, value_enum, default_value = "selected")]
    pub scope: Scope,

    /// Select a source item (repeatable)
    #[clap(long, value_name = "SOURCE_ID")]
    pub select: Vec<String>,

    /// Unselect a source item (repeatable)
    #[clap(long, value_name = "SOURCE_ID")]
    pub unselect: Vec<String>,

    /// Select every source of a category (repeatable)
    #[clap(long, value_name = "CATEGORY_ID")]
    pub select_category: Vec<String>,

    /// Unselect every source of a category (repeatable)
    #[clap(long, value_name = "CATEGORY_ID")]
    pub unselect_category: Vec<String>,

    /// Always export this POI, e.g. `node/123` (repeatable)
    #[clap(long, value_name = "POI_ID")]
    pub include: Vec<String>,

    /// Never export this POI (repeatable)
    #[clap(long, value_name = "POI_ID")]
    pub exclude: Vec<String>,

    /// Custom POI as `lat,lon,type[,label[,note]]` (repeatable)
    #[clap(long, value_name = "POI")]
    pub custom: Vec<CustomPoiArg>,

    /// Remove existing waypoints from the route before adding new ones
    #[clap(long, default_value = "false")]
    pub drop_waypoints: bool,

    /// Query endpoint, tried in order (repeatable; default: public Overpass servers)
    #[clap(long, value_name = "URL")]
    pub endpoint: Vec<String>,

    /// Attempts per endpoint
    #[clap(long, default_value = "2")]
    pub attempts: usize,

    /// Pause between attempts in milliseconds
    #[clap(long, default_value = "400")]
    pub backoff_ms: u64,

    /// Query timeout in seconds (per attempt and server-side)
    #[clap(long, default_value_t = DEFAULT_QUERY_TIMEOUT_S)]
    pub timeout: u32,

    /// Query the route's bounding box instead of the search polygon
    #[clap(long, default_value = "false")]
    pub bbox: bool,

    /// Do not read or write the response cache
    #[clap(long, default_value = "false")]
    pub no_cache: bool,

    /// Cached responses older than this are refetched
    #[clap(long, default_value = "24")]
    pub cache_ttl_hours: u64,

    /// Cache file (default: per-user config directory)
    #[clap(long, value_name = "FILE")]
    pub cache_file: Option<PathBuf>,

    /// Use a saved query response instead of querying
    #[clap(long, value_name = "FILE")]
    pub elements: Option<PathBuf>,

    /// Print the query and exit
    #[clap(long, default_value = "false")]
    pub print_query: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Selected sources only
    Selected,
    /// Every fetchable source
    All,
}

impl From<Scope> for FetchScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Selected => FetchScope::Selected,
            Scope::All => FetchScope::All,
        }
    }
}

/// `lat,lon,type[,label[,note]]`
#[derive(Debug, Clone, PartialEq)]
pub struct CustomPoiArg {
    pub lat: f64,
    pub lon: f64,
    pub type_id: String,
    pub label: Option<String>,
    pub note: Option<String>,
}

impl FromStr for CustomPoiArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(5, ',').map(str::trim);
        let mut coordinate = |name: &str| -> Result<f64, String> {
            let raw = parts.next().ok_or_else(|| format!("missing {name}"))?;
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("invalid {name}: {raw}"))
        };
        let lat = coordinate("latitude")?;
        let lon = coordinate("longitude")?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(format!("position out of range: {lat},{lon}"));
        }

        let type_id = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or("missing type")?
            .to_string();
        let mut optional = || parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        let label = optional();
        let note = optional();

        Ok(Self {
            lat,
            lon,
            type_id,
            label,
            note,
        })
    }
}

impl Settings {
    pub fn from_cli() -> Self {
        Settings::parse()
    }

    pub fn corridor_config(&self) -> CorridorConfig {
        CorridorConfig {
            corridor_width_m: self.corridor_width,
            search_width_m: self.search_width,
            max_route_points: self.max_route_points,
            max_search_polygon_points: self.max_search_points,
            search_simplify_tolerance_m: self.simplify_tolerance,
            ..CorridorConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts_per_endpoint: self.attempts.max(1),
            backoff: Duration::from_millis(self.backoff_ms),
            timeout: Duration::from_secs(u64::from(self.timeout)),
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        if self.endpoint.is_empty() {
            DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect()
        } else {
            self.endpoint.clone()
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }
}
