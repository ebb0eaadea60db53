mod cache;
mod logging;
mod settings;
mod storage;

use anyhow::{Context, bail};
use cache::CachedService;
use gpx_poi_lib::{
    FetchScope, ForceState, MappingConfig, OverpassClient, OverpassResponse, Session,
    SourceConfig, TaxonomyConfig,
};
use settings::Settings;
use storage::FileStorage;

fn main() -> anyhow::Result<()> {
    logging::setup_logging();
    let settings = Settings::from_cli();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    rt.block_on(run(settings))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let mut session = create_session(&settings)?;

    let text = std::fs::read_to_string(&settings.route)
        .with_context(|| format!("Failed to read {}", settings.route.display()))?;
    let filename = settings
        .route
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    session
        .load_route(&text, &filename, settings.drop_waypoints)
        .with_context(|| format!("Failed to load {}", settings.route.display()))?;
    tracing::info!("{}", session.status());

    let scope = FetchScope::from(settings.scope);
    if settings.print_query {
        println!("{}", session.query_text(scope)?);
        return Ok(());
    }

    let fetched = fetch(&mut session, &settings, scope).await?;
    tracing::info!("{}", session.status());

    for id in &settings.include {
        force(&mut session, id, ForceState::Include);
    }
    for id in &settings.exclude {
        force(&mut session, id, ForceState::Exclude);
    }
    for poi in &settings.custom {
        let added = session.add_custom_poi(
            poi.lat,
            poi.lon,
            &poi.type_id,
            poi.label.as_deref(),
            poi.note.as_deref(),
        )?;
        tracing::info!("Added custom POI {} ({})", added.id, added.type_id);
    }

    let (inside, inside_selected) = session.counts();
    if !session.can_export() {
        bail!(
            "Nothing to export: {fetched} POIs fetched, {inside} inside the corridor, \
             {inside_selected} of a selected type"
        );
    }

    let outcome = session.export_document()?;
    let output = settings
        .output
        .clone()
        .unwrap_or_else(|| settings.route.with_file_name(session.export_filename()));
    std::fs::write(&output, &outcome.document)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{}: {} waypoints added, {} already present ({} fetched, {} inside corridor, {} custom)",
        output.display(),
        outcome.inserted,
        outcome.skipped,
        fetched,
        inside,
        session.custom_pois().len()
    );
    Ok(())
}

fn create_session(settings: &Settings) -> anyhow::Result<Session> {
    let taxonomy = TaxonomyConfig::from_path(&settings.taxonomy)
        .with_context(|| format!("Failed to load taxonomy {}", settings.taxonomy.display()))?;
    let sources = SourceConfig::from_path(&settings.sources)
        .with_context(|| format!("Failed to load sources {}", settings.sources.display()))?;
    let mapping = settings
        .mapping
        .as_ref()
        .map(|path| {
            MappingConfig::from_path(path)
                .with_context(|| format!("Failed to load mapping {}", path.display()))
        })
        .transpose()?;

    let mut session = Session::new(&taxonomy, sources, mapping);
    session.set_corridor_config(settings.corridor_config());
    session.set_query_options(settings.timeout, settings.bbox);

    for category in &settings.select_category {
        let changed = session.set_category_selected(category, true);
        tracing::debug!("Selected {} sources of {}", changed, category);
    }
    for category in &settings.unselect_category {
        session.set_category_selected(category, false);
    }
    for id in &settings.select {
        select(&mut session, id, true);
    }
    for id in &settings.unselect {
        select(&mut session, id, false);
    }
    Ok(session)
}

fn select(session: &mut Session, source_id: &str, selected: bool) {
    if session.sources().get(source_id).is_none() {
        tracing::warn!("Unknown source item: {}", source_id);
        return;
    }
    session.set_source_selected(source_id, selected);
}

fn force(session: &mut Session, poi_id: &str, state: ForceState) {
    if !session.pois().iter().any(|poi| poi.id == poi_id) {
        tracing::warn!("{} is not among the fetched POIs, ignoring", poi_id);
        return;
    }
    session.set_force(poi_id, state);
}

/// Fill the session with POIs from a saved response or the query service
async fn fetch(session: &mut Session, settings: &Settings, scope: FetchScope) -> anyhow::Result<usize> {
    if let Some(path) = &settings.elements {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let response = OverpassResponse::from_json(&json)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        return Ok(session.apply_response(&response, scope));
    }

    let client = OverpassClient::new(settings.endpoints(), settings.retry_policy())?;
    if settings.no_cache {
        return Ok(session.fetch(&client, scope).await?);
    }

    match FileStorage::new_with_path(settings.cache_file.clone()) {
        Ok(storage) => {
            tracing::debug!("Response cache at {}", storage.path().display());
            let cached = CachedService::new(client, Box::new(storage), settings.cache_ttl());
            Ok(session.fetch(&cached, scope).await?)
        }
        Err(e) => {
            tracing::warn!("Response cache unavailable, querying directly: {}", e);
            Ok(session.fetch(&client, scope).await?)
        }
    }
}
