mod settings;
mod sites;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use brownstone_crawler::{
    Archive, BlobStore, ConfigError, Connector, DirectConnector, FsQueue, FsStore, Harvester,
    IdentityManager, RobotsPolicy, Shutdown, TorConnector, Walker,
};
use brownstone_extract::{extract_to_csv, geolocate_csv, GeoCache, GeoGate, VirtualEarth};

use settings::Settings;

/// Browse, harvest, extract and geolocate real-estate listing sites.
#[derive(Debug, Parser)]
#[command(name = "brownstone", version)]
struct Args {
    /// Path to the YAML settings file
    #[arg(long, env = "BROWNSTONE_CONFIG", default_value = "brownstone.yaml")]
    config: PathBuf,

    /// When quiet no logs are outputted
    #[arg(long, short)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Traverse the listing index and enqueue detail pages
    Browse(StageArgs),
    /// Drain the queue, downloading and archiving detail pages
    Harvest(StageArgs),
    /// Replay one harvest date from the archive into a CSV of records
    Extract(StageArgs),
    /// Add coordinates to the extracted records
    Geolocate(StageArgs),
}

#[derive(Debug, clap::Args)]
struct StageArgs {
    /// Site to process
    #[arg(long)]
    site: String,

    /// Harvest date, YYYYMMDD (defaults to today)
    #[arg(long)]
    date: Option<String>,
}

fn main() {
    let args = Args::parse();
    if !args.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
    // per-page failures are logged, not fatal; only startup and
    // infrastructure errors reach this point
    if let Err(e) = run(args) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let settings = Settings::load(&args.config)?;
    match &args.cmd {
        Command::Browse(stage) => browse(&settings, stage),
        Command::Harvest(stage) => harvest(&settings, stage),
        Command::Extract(stage) => extract(&settings, stage),
        Command::Geolocate(stage) => geolocate(&settings, stage),
    }
}

fn browse(settings: &Settings, stage: &StageArgs) -> anyhow::Result<()> {
    let site = sites::by_name(&stage.site)?;
    let queue = site_queue(settings, &stage.site)?;
    let robots = RobotsPolicy::fetch(site.base_url(), robots_agent(settings));
    let shutdown = install_shutdown()?;
    let mut fetcher = IdentityManager::new(connector(settings)?, &settings.crawl);

    let mut walker = Walker::new(
        site.as_ref(),
        &mut fetcher,
        &queue,
        &robots,
        &shutdown,
        &settings.crawl,
    )?;
    let outcome = walker.walk(None)?;
    log::info!(
        "traversal finished ({outcome:?}), {} urls explored",
        walker.explored_len()
    );
    Ok(())
}

fn harvest(settings: &Settings, stage: &StageArgs) -> anyhow::Result<()> {
    let site = sites::by_name(&stage.site)?;
    let date = parse_date(stage)?;
    let queue = site_queue(settings, &stage.site)?;
    let robots = RobotsPolicy::fetch(site.base_url(), robots_agent(settings));
    let shutdown = install_shutdown()?;
    let mut fetcher = IdentityManager::new(connector(settings)?, &settings.crawl);

    let store: Arc<dyn BlobStore> = Arc::new(FsStore::new(&settings.archive_root));
    let archive = Archive::new(store, &site_prefix(&settings.harvest_prefix, stage), date);

    let mut harvester = Harvester::new(
        site.as_ref(),
        &mut fetcher,
        &queue,
        &robots,
        &archive,
        &shutdown,
        &settings.crawl,
    );
    harvester.run()?;
    Ok(())
}

fn extract(settings: &Settings, stage: &StageArgs) -> anyhow::Result<()> {
    let site = sites::by_name(&stage.site)?;
    let date = parse_date(stage)?;
    let store: Arc<dyn BlobStore> = Arc::new(FsStore::new(&settings.archive_root));
    let archive = Archive::new(
        store.clone(),
        &site_prefix(&settings.harvest_prefix, stage),
        date,
    );

    let workdir = tempfile::tempdir()?;
    let csv_path = workdir.path().join("extract.csv");
    let report = extract_to_csv(&archive, site.as_ref(), &csv_path)?;

    let key = stage_key(&settings.extract_prefix, stage, date, "extract.csv");
    store.put(&key, &fs::read(&csv_path)?)?;
    log::info!(
        "extracted {} records to {key} ({} flagged)",
        report.records,
        report.flagged.len()
    );
    Ok(())
}

fn geolocate(settings: &Settings, stage: &StageArgs) -> anyhow::Result<()> {
    // the site only scopes the storage keys here; no parser is involved
    sites::by_name(&stage.site)?;
    let date = parse_date(stage)?;
    let store: Arc<dyn BlobStore> = Arc::new(FsStore::new(&settings.archive_root));

    let extract_key = stage_key(&settings.extract_prefix, stage, date, "extract.csv");
    let bytes = store
        .get(&extract_key)
        .context("extract stage must run before geolocation")?;

    let workdir = tempfile::tempdir()?;
    let input = workdir.path().join("extract.csv");
    let output = workdir.path().join("coordinates.csv");
    fs::write(&input, bytes)?;

    let geocoder = settings
        .geocoder
        .as_ref()
        .ok_or_else(|| ConfigError::MissingKey("geocoder.api_key".to_string()))?;
    let mut gate = GeoGate::new(
        GeoCache::open(settings.geocache_path())?,
        Box::new(VirtualEarth::new(geocoder.api_key.clone())?),
    );
    let rows = geolocate_csv(&input, &output, &mut gate)?;

    let key = stage_key(&settings.geoloc_prefix, stage, date, "coordinates.csv");
    store.put(&key, &fs::read(&output)?)?;
    log::info!("geolocated {rows} records to {key}");
    Ok(())
}

/// `YYYYMMDD` on the command line, today (UTC) otherwise.
fn parse_date(stage: &StageArgs) -> anyhow::Result<NaiveDate> {
    match &stage.date {
        Some(text) => NaiveDate::parse_from_str(text, "%Y%m%d")
            .with_context(|| format!("harvest date {text:?} must be YYYYMMDD")),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Storage prefixes are scoped per site so sites never share keys.
fn site_prefix(prefix: &str, stage: &StageArgs) -> String {
    format!("{prefix}/{}", stage.site)
}

fn stage_key(prefix: &str, stage: &StageArgs, date: NaiveDate, file: &str) -> String {
    format!(
        "{}/{}/{file}",
        site_prefix(prefix, stage),
        date.format("%Y/%m/%d")
    )
}

fn site_queue(settings: &Settings, site: &str) -> anyhow::Result<FsQueue> {
    Ok(FsQueue::open(
        settings.queue_dir.join(site),
        Duration::from_secs(settings.queue_visibility_secs),
    )?)
}

fn robots_agent(settings: &Settings) -> &str {
    settings
        .crawl
        .user_agents
        .first()
        .map(String::as_str)
        .unwrap_or("brownstone")
}

fn connector(settings: &Settings) -> anyhow::Result<Box<dyn Connector>> {
    let conf = &settings.crawl;
    match &settings.tor {
        Some(tor) => {
            let password = std::env::var(&tor.password_env)
                .map_err(|_| ConfigError::MissingKey(tor.password_env.clone()))?;
            Ok(Box::new(TorConnector {
                socks_addr: tor.socks_addr.clone(),
                control_addr: tor.control_addr.clone(),
                password,
                user_agents: conf.user_agents.clone(),
                headers: conf.headers.clone(),
                timeout: Duration::from_secs(conf.timeout_secs),
            }))
        }
        None => Ok(Box::new(DirectConnector::from_config(conf))),
    }
}

fn install_shutdown() -> anyhow::Result<Shutdown> {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, finishing the current cycle");
        handle.trigger();
    })?;
    Ok(shutdown)
}
