mod api;
mod config;
mod db;
mod error;
mod ingest;
mod item_codec;
mod janitor;
mod names;
mod pricing;
mod stats;
mod types;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::Config;
use crate::db::SqliteStore;
use crate::error::Result;
use crate::ingest::{HttpFeed, IngestStatus, Ingestor};
use crate::janitor::EventJanitor;
use crate::names::NameCache;
use crate::pricing::build_pricer::BuildPricer;
use crate::pricing::market::HttpMarket;
use crate::pricing::resolver::PriceResolver;
use crate::stats::ReportBuilder;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&cfg) {
        eprintln!("Log setup error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(cfg: &Config) -> Result<()> {
    let filter = EnvFilter::new(&cfg.log_level);
    match &cfg.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = Arc::new(SqliteStore::connect(&cfg.db_path).await?);
    info!("Database ready at {}", cfg.db_path);

    // --- Shared caches ---
    let market = Arc::new(HttpMarket::new(cfg.price_url.clone(), cfg.price_locations.clone())?);
    let resolver = Arc::new(PriceResolver::new(store.clone(), market, cfg.price_stale_threshold));
    let names = Arc::new(NameCache::new(cfg.item_names_url.clone())?);
    let status = Arc::new(IngestStatus::new());
    info!(
        locations = %cfg.price_locations.join(","),
        stale_secs = cfg.price_stale_threshold.as_secs(),
        "Price resolver ready",
    );

    // --- Spawn tasks ---

    // Event ingestor (adaptive interval), warming the price cache after each cycle
    let feed = Arc::new(HttpFeed::new(cfg.event_url.clone())?);
    let ingestor = Ingestor::new(feed, store.clone(), Arc::clone(&status)).with_cache_warming(Arc::clone(&resolver));
    tokio::spawn(async move { ingestor.run().await });

    // Event retention sweep
    let janitor = EventJanitor::new(store.clone(), cfg.event_stale_threshold, cfg.event_cleanup_interval);
    tokio::spawn(async move { janitor.run().await });

    // HTTP API server
    let reports = ReportBuilder::new(store.clone(), BuildPricer::new(resolver), names);
    let api_state = ApiState {
        reports: Arc::new(reports),
        events: store.clone(),
        prices: store,
        status,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
