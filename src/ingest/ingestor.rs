use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::{MAX_POLL_INTERVAL, MIN_POLL_INTERVAL};
use crate::db::store::EventStore;
use crate::error::{AppError, Result};
use crate::ingest::feed::{page_offsets, PageSource};
use crate::pricing::build_pricer::items_in_builds;
use crate::pricing::resolver::PriceResolver;
use crate::types::{Event, SlotFilter};

/// Shared ingestion counters. Updated by the ingestor, read by the stats endpoint.
#[derive(Default)]
pub struct IngestStatus {
    cycles: AtomicU64,
    last_inserted: AtomicU64,
    sleep_secs: AtomicU64,
}

impl IngestStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn last_inserted(&self) -> u64 {
        self.last_inserted.load(Ordering::Relaxed)
    }

    /// Current adaptive poll interval in seconds.
    pub fn sleep_secs(&self) -> u64 {
        self.sleep_secs.load(Ordering::Relaxed)
    }

    fn record_cycle(&self, inserted: u64) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_inserted.store(inserted, Ordering::Relaxed);
    }

    fn set_sleep(&self, d: Duration) {
        self.sleep_secs.store(d.as_secs(), Ordering::Relaxed);
    }
}

/// Result of one fan-out over the feed. Partial success is normal: `errors`
/// holds one entry per failed page, `events` everything the other pages returned.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub events: Vec<Event>,
    pub errors: Vec<AppError>,
    /// Records dropped inside otherwise valid pages.
    pub skipped: usize,
    /// Slots left unequipped because their item code did not decode.
    pub skipped_slots: usize,
}

/// Requests every feed page concurrently, waits for all of them, and merges the
/// results. Pages overlap, so events are de-duplicated by id.
pub async fn run_cycle(source: &dyn PageSource) -> CycleOutcome {
    let fetches = page_offsets().map(|offset| async move { (offset, source.fetch_page(offset).await) });
    let results = join_all(fetches).await;

    let mut outcome = CycleOutcome::default();
    let mut seen = HashSet::new();
    for (offset, result) in results {
        match result {
            Ok(page) => {
                outcome.skipped += page.skipped;
                outcome.skipped_slots += page.skipped_slots;
                outcome
                    .events
                    .extend(page.events.into_iter().filter(|e| seen.insert(e.id)));
            }
            Err(e) => {
                warn!(offset, "Feed page failed: {e}");
                outcome.errors.push(e);
            }
        }
    }
    outcome
}

/// Half the timestamp span of the events just fetched, clamped to
/// `[MIN_POLL_INTERVAL, MAX_POLL_INTERVAL]`. A quiet feed is polled slowly,
/// a busy one often enough that pages do not scroll past between cycles.
///
/// Only the floor belongs to the feed's polling contract. The ceiling is a
/// local addition on top of the half-span rule.
pub fn poll_interval(events: &[Event]) -> Duration {
    let oldest = events.iter().map(|e| e.timestamp).min();
    let newest = events.iter().map(|e| e.timestamp).max();
    let half_span = match (oldest, newest) {
        (Some(oldest), Some(newest)) => (newest - oldest).to_std().unwrap_or_default() / 2,
        _ => Duration::ZERO,
    };
    half_span.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Long-lived background task: fetch, persist, warm the price cache, sleep.
pub struct Ingestor {
    source: Arc<dyn PageSource>,
    store: Arc<dyn EventStore>,
    resolver: Option<Arc<PriceResolver>>,
    status: Arc<IngestStatus>,
}

impl Ingestor {
    pub fn new(source: Arc<dyn PageSource>, store: Arc<dyn EventStore>, status: Arc<IngestStatus>) -> Self {
        Self { source, store, resolver: None, status }
    }

    /// Resolve prices for freshly ingested items in the background.
    pub fn with_cache_warming(mut self, resolver: Arc<PriceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn run(self) {
        loop {
            let sleep = match self.ingest_once().await {
                Ok(d) => d,
                Err(e) => {
                    error!("Ingestion cycle failed: {e}");
                    MIN_POLL_INTERVAL
                }
            };
            self.status.set_sleep(sleep);
            debug!(sleep_secs = sleep.as_secs(), "Ingestor sleeping");
            tokio::time::sleep(sleep).await;
        }
    }

    /// One `Fetching -> Merging` pass. Returns the interval to wait before the next one.
    /// Only a persistence failure is an error; failed pages are logged and skipped.
    pub async fn ingest_once(&self) -> Result<Duration> {
        let outcome = run_cycle(self.source.as_ref()).await;
        let inserted = self.store.insert_events_if_absent(&outcome.events).await?;
        self.status.record_cycle(inserted);

        let sleep = poll_interval(&outcome.events);
        info!(
            fetched = outcome.events.len(),
            inserted,
            page_errors = outcome.errors.len(),
            skipped = outcome.skipped,
            skipped_slots = outcome.skipped_slots,
            sleep_secs = sleep.as_secs(),
            "Ingestion cycle complete: {inserted} new of {} fetched",
            outcome.events.len(),
        );

        if inserted > 0 {
            self.warm_cache(&outcome.events);
        }
        Ok(sleep)
    }

    fn warm_cache(&self, events: &[Event]) {
        let Some(resolver) = &self.resolver else { return };
        let builds = events.iter().flat_map(|e| [&e.killer, &e.victim]);
        let items = items_in_builds(builds, &SlotFilter::economic());
        let resolver = Arc::clone(resolver);
        tokio::spawn(async move {
            match resolver.resolve(&items).await {
                Ok(resolution) => {
                    if let Some(e) = resolution.incomplete() {
                        debug!("Cache warm incomplete: {e}");
                    }
                }
                Err(e) => warn!("Cache warm failed: {e}"),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
