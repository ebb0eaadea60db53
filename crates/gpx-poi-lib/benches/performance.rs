//! Performance benchmarks for gpx-poi-lib
//!
//! Run with: cargo bench --package gpx-poi-lib

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use geo::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use gpx_poi_lib::overpass::OverpassElement;
use gpx_poi_lib::{
    Corridor, CorridorConfig, Route, Rule, RuleSet, TagPair, TaxonomyConfig, Taxonomy,
    normalize_elements,
};
use std::collections::BTreeMap;

/// Generate a wiggly GPX track with the specified number of points.
fn generate_route(num_points: usize, base_lat: f64, base_lon: f64) -> Route {
    let mut gpx = Gpx {
        version: GpxVersion::Gpx11,
        ..Default::default()
    };
    let mut track = Track::default();
    let mut segment = TrackSegment::default();

    for i in 0..num_points {
        let t = i as f64 / num_points as f64;
        let lat = base_lat + t * 0.5 + (t * 50.0).sin() * 0.01;
        let lon = base_lon + t * 0.5 + (t * 30.0).cos() * 0.01;
        segment.points.push(Waypoint::new(Point::new(lon, lat)));
    }

    track.segments.push(segment);
    gpx.tracks.push(track);
    Route::new(gpx).unwrap()
}

const TAG_VALUES: [&str; 8] = [
    "drinking_water",
    "toilets",
    "cafe",
    "restaurant",
    "bench",
    "shelter",
    "fuel",
    "atm",
];

fn generate_elements(count: usize, base_lat: f64, base_lon: f64) -> Vec<OverpassElement> {
    (0..count)
        .map(|i| {
            let t = i as f64 / count as f64;
            OverpassElement {
                element_type: "node".to_string(),
                id: i as i64,
                lat: Some(base_lat + t * 0.5 + 0.002),
                lon: Some(base_lon + t * 0.5),
                center: None,
                tags: BTreeMap::from([(
                    "amenity".to_string(),
                    TAG_VALUES[i % TAG_VALUES.len()].to_string(),
                )]),
            }
        })
        .collect()
}

fn generate_taxonomy_and_rules() -> (Taxonomy, RuleSet) {
    let items: Vec<String> = TAG_VALUES
        .iter()
        .map(|v| format!(r#"{{"id": "{v}", "label": "{v}"}}"#))
        .collect();
    let json = format!(
        r#"{{"categories": [{{"id": "all", "label": "All", "items": [{}]}}]}}"#,
        items.join(",")
    );
    let taxonomy = Taxonomy::new(&TaxonomyConfig::from_json(&json).unwrap());
    // Rare types last so most elements walk the whole list
    let rules = TAG_VALUES
        .iter()
        .rev()
        .map(|v| Rule::new(*v, vec![TagPair::new("amenity", *v)], vec![]))
        .collect();
    (taxonomy, RuleSet::new(rules))
}

// ============================================================================
// Core Benchmarks
// ============================================================================

fn bench_corridor_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("corridor");
    group.sample_size(20);

    for num_points in [1_000, 20_000] {
        let route = generate_route(num_points, 48.0, 16.0);
        let config = CorridorConfig::default();
        group.throughput(Throughput::Elements(num_points as u64));
        group.bench_with_input(BenchmarkId::new("build", num_points), &route, |b, route| {
            b.iter(|| Corridor::build(route, &config));
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    let route = generate_route(5_000, 48.0, 16.0);
    let corridor = Corridor::build(&route, &CorridorConfig::default());
    let (taxonomy, rules) = generate_taxonomy_and_rules();
    let elements = generate_elements(2_000, 48.0, 16.0);

    group.throughput(Throughput::Elements(elements.len() as u64));
    group.bench_function("classify_only_2k", |b| {
        b.iter(|| normalize_elements(&elements, &rules, &taxonomy, None));
    });
    group.bench_function("with_distance_2k", |b| {
        b.iter(|| {
            let mut pois =
                normalize_elements(&elements, &rules, &taxonomy, corridor.route_geometry());
            corridor.classify(&mut pois)
        });
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_corridor_build, bench_normalize);

criterion_main!(benches);
