use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::config::PRICE_BATCH_SIZE;
use crate::db::store::PriceCache;
use crate::error::{AppError, Result};
use crate::pricing::market::{listed_prices, median, MarketSource};
use crate::types::{Item, PriceKey};

// ---------------------------------------------------------------------------
// PriceMap
// ---------------------------------------------------------------------------

/// Known prices by market identity. Absence means "unknown"; a zero is never stored.
#[derive(Debug, Clone, Default)]
pub struct PriceMap(HashMap<PriceKey, f64>);

impl PriceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PriceKey) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Non-positive prices are ignored.
    pub fn insert(&mut self, key: PriceKey, price: f64) {
        if price > 0.0 {
            self.0.insert(key, price);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(PriceKey, f64)> for PriceMap {
    fn from_iter<I: IntoIterator<Item = (PriceKey, f64)>>(iter: I) -> Self {
        let mut map = PriceMap::new();
        for (key, price) in iter {
            map.insert(key, price);
        }
        map
    }
}

/// Outcome of a resolution. Always carries whatever could be priced.
#[derive(Debug, Default)]
pub struct Resolution {
    pub prices: PriceMap,
    /// Requested items whose price is still unknown.
    pub unresolved: usize,
    /// Remote batches that failed at the transport level.
    pub failed_batches: usize,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.unresolved == 0 && self.failed_batches == 0
    }

    /// The aggregate "best effort" error, if anything is missing.
    pub fn incomplete(&self) -> Option<AppError> {
        (!self.is_complete()).then(|| AppError::Unresolved {
            unresolved: self.unresolved,
            failed_batches: self.failed_batches,
        })
    }
}

// ---------------------------------------------------------------------------
// PriceResolver
// ---------------------------------------------------------------------------

/// Resolves item prices through the persistent cache, falling back to batched
/// market lookups for entries that are absent or older than the stale threshold.
pub struct PriceResolver {
    cache: Arc<dyn PriceCache>,
    market: Arc<dyn MarketSource>,
    stale_threshold: Duration,
    batch_size: usize,
}

impl PriceResolver {
    pub fn new(cache: Arc<dyn PriceCache>, market: Arc<dyn MarketSource>, stale_threshold: Duration) -> Self {
        Self {
            cache,
            market,
            stale_threshold,
            batch_size: PRICE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn resolve(&self, items: &[Item]) -> Result<Resolution> {
        self.resolve_at(items, Utc::now()).await
    }

    /// Fails only when the cache itself fails. Transport errors cost their batch.
    pub async fn resolve_at(&self, items: &[Item], now: DateTime<Utc>) -> Result<Resolution> {
        let keys: Vec<PriceKey> = items
            .iter()
            .filter(|i| i.is_equipped())
            .map(Item::price_key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if keys.is_empty() {
            return Ok(Resolution::default());
        }

        let cached = self.cache.get_cached_prices(&keys).await?;
        let mut resolution = Resolution::default();
        let mut misses: BTreeMap<u8, Vec<PriceKey>> = BTreeMap::new();
        let mut hits = 0usize;
        for key in &keys {
            match cached.get(key) {
                Some(entry) if entry.is_fresh(now, self.stale_threshold) => {
                    hits += 1;
                    if let Some(price) = entry.known() {
                        resolution.prices.insert(key.clone(), price);
                    }
                }
                _ => misses.entry(key.quality()).or_default().push(key.clone()),
            }
        }

        let batches: Vec<(u8, &[PriceKey])> = misses
            .iter()
            .flat_map(|(quality, keys)| keys.chunks(self.batch_size).map(move |chunk| (*quality, chunk)))
            .collect();
        let batch_count = batches.len();

        let results = join_all(
            batches
                .into_iter()
                .map(|(quality, chunk)| self.resolve_batch(quality, chunk, now)),
        )
        .await;

        for result in results {
            match result? {
                Some(resolved) => {
                    for (key, price) in resolved {
                        resolution.prices.insert(key, price);
                    }
                }
                None => resolution.failed_batches += 1,
            }
        }
        resolution.unresolved = keys.iter().filter(|k| resolution.prices.get(k).is_none()).count();

        info!(
            requested = keys.len(),
            hits,
            misses = keys.len() - hits,
            batches = batch_count,
            failed_batches = resolution.failed_batches,
            unresolved = resolution.unresolved,
            priced = resolution.prices.len(),
            "Price resolution complete",
        );
        Ok(resolution)
    }

    /// One market request. `Ok(None)` means the request failed and nothing was cached.
    async fn resolve_batch(
        &self,
        quality: u8,
        keys: &[PriceKey],
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<(PriceKey, f64)>>> {
        let codes: Vec<String> = keys.iter().map(PriceKey::code).collect();
        let quotes = match self.market.fetch_quotes(&codes, quality).await {
            Ok(q) => q,
            Err(e) => {
                warn!(quality, items = keys.len(), "Market batch failed: {e}");
                return Ok(None);
            }
        };

        let listed = listed_prices(&quotes);
        let resolved: Vec<(PriceKey, f64)> = keys
            .iter()
            .zip(&codes)
            .map(|(key, code)| {
                let price = listed.get(code.as_str()).map(|p| median(p)).unwrap_or(0.0);
                (key.clone(), price)
            })
            .collect();

        // Zeros are cached too: "looked up, no listing" until they go stale.
        self.cache.put_cached_prices(&resolved, now).await?;
        debug!(quality, items = keys.len(), "Market batch cached");
        Ok(Some(resolved))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::pricing::market::MarketQuote;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Quotes keyed by (code, quality). Records every request.
    #[derive(Default)]
    struct FakeMarket {
        quotes: HashMap<(String, u8), Vec<f64>>,
        failing_qualities: HashSet<u8>,
        calls: Mutex<Vec<(Vec<String>, u8)>>,
    }

    impl FakeMarket {
        fn with_quotes(mut self, code: &str, quality: u8, prices: &[f64]) -> Self {
            self.quotes.insert((code.to_string(), quality), prices.to_vec());
            self
        }

        fn failing(mut self, quality: u8) -> Self {
            self.failing_qualities.insert(quality);
            self
        }

        fn calls(&self) -> Vec<(Vec<String>, u8)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketSource for FakeMarket {
        async fn fetch_quotes(&self, codes: &[String], quality: u8) -> Result<Vec<MarketQuote>> {
            self.calls.lock().unwrap().push((codes.to_vec(), quality));
            if self.failing_qualities.contains(&quality) {
                return Err(AppError::Status { url: "market".to_string(), status: 500 });
            }
            let mut out = Vec::new();
            for code in codes {
                for price in self.quotes.get(&(code.clone(), quality)).into_iter().flatten() {
                    out.push(MarketQuote {
                        item_id: code.clone(),
                        sell_price_min: *price,
                    });
                }
            }
            Ok(out)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    async fn setup(market: FakeMarket) -> (Arc<SqliteStore>, Arc<FakeMarket>, PriceResolver) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let market = Arc::new(market);
        let resolver = PriceResolver::new(store.clone(), market.clone(), WEEK);
        (store, market, resolver)
    }

    #[tokio::test]
    async fn misses_are_fetched_and_cached_with_median() {
        let market = FakeMarket::default().with_quotes("T4_MAIN_SWORD", 1, &[1000.0, 3000.0, 1200.0, 0.0]);
        let (store, market, resolver) = setup(market).await;
        let sword = Item::new("MAIN_SWORD", 4, 0, 1);

        let resolution = resolver.resolve_at(&[sword.clone()], now()).await.unwrap();
        assert!(resolution.is_complete());
        assert_eq!(resolution.prices.get(&sword.price_key()), Some(1200.0));

        let cached = store.get_cached_price(&sword.price_key()).await.unwrap().unwrap();
        assert_eq!(cached.price, 1200.0);
        assert_eq!(cached.observed_at, now());

        // Second call is a cache hit.
        resolver.resolve_at(&[sword], now()).await.unwrap();
        assert_eq!(market.calls().len(), 1);
    }

    #[tokio::test]
    async fn stale_entries_are_refetched_and_fresh_ones_are_not() {
        let market = FakeMarket::default()
            .with_quotes("T4_MAIN_SWORD", 1, &[500.0])
            .with_quotes("T5_MAIN_SWORD", 1, &[900.0]);
        let (store, market, resolver) = setup(market).await;
        let fresh = Item::new("MAIN_SWORD", 4, 0, 1);
        let stale = Item::new("MAIN_SWORD", 5, 0, 1);
        let stale_at = now() - chrono::Duration::from_std(WEEK).unwrap() - chrono::Duration::seconds(1);
        store.put_cached_price(&fresh.price_key(), 450.0, now()).await.unwrap();
        store.put_cached_price(&stale.price_key(), 800.0, stale_at).await.unwrap();

        let resolution = resolver.resolve_at(&[fresh.clone(), stale.clone()], now()).await.unwrap();

        assert_eq!(resolution.prices.get(&fresh.price_key()), Some(450.0));
        assert_eq!(resolution.prices.get(&stale.price_key()), Some(900.0));
        assert_eq!(market.calls(), vec![(vec!["T5_MAIN_SWORD".to_string()], 1)]);
    }

    #[tokio::test]
    async fn unlisted_items_are_cached_as_known_absent() {
        let (store, market, resolver) = setup(FakeMarket::default()).await;
        let cape = Item::new("CAPEITEM_FW_MARTLOCK", 6, 1, 2);

        let resolution = resolver.resolve_at(&[cape.clone()], now()).await.unwrap();
        assert_eq!(resolution.prices.get(&cape.price_key()), None);
        assert_eq!(resolution.unresolved, 1);
        assert!(matches!(resolution.incomplete(), Some(AppError::Unresolved { unresolved: 1, failed_batches: 0 })));

        let cached = store.get_cached_price(&cape.price_key()).await.unwrap().unwrap();
        assert_eq!(cached.price, 0.0);

        // Known-absent and fresh: not asked again.
        resolver.resolve_at(&[cape.clone()], now()).await.unwrap();
        assert_eq!(market.calls().len(), 1);

        // Once stale it is retried.
        let later = now() + chrono::Duration::from_std(WEEK).unwrap() + chrono::Duration::seconds(1);
        resolver.resolve_at(&[cape], later).await.unwrap();
        assert_eq!(market.calls().len(), 2);
    }

    #[tokio::test]
    async fn misses_are_grouped_by_quality_and_chunked() {
        let (_, market, resolver) = setup(FakeMarket::default()).await;
        let resolver = resolver.with_batch_size(2);
        let mut items: Vec<Item> = (1..=5).map(|t| Item::new("MAIN_SWORD", t, 0, 1)).collect();
        items.push(Item::new("MAIN_SWORD", 4, 0, 3));
        items.push(Item::new("MAIN_SWORD", 4, 0, 3));
        items.push(Item::default());

        resolver.resolve_at(&items, now()).await.unwrap();

        let calls = market.calls();
        let q1: Vec<usize> = calls.iter().filter(|(_, q)| *q == 1).map(|(c, _)| c.len()).collect();
        let q3: Vec<usize> = calls.iter().filter(|(_, q)| *q == 3).map(|(c, _)| c.len()).collect();
        assert_eq!(q1.iter().sum::<usize>(), 5);
        assert!(q1.iter().all(|n| *n <= 2));
        assert_eq!(q1.len(), 3);
        assert_eq!(q3, vec![1]);
    }

    #[tokio::test]
    async fn failed_batch_does_not_abort_others() {
        let market = FakeMarket::default()
            .with_quotes("T4_MAIN_SWORD", 1, &[700.0])
            .failing(2);
        let (store, _, resolver) = setup(market).await;
        let ok = Item::new("MAIN_SWORD", 4, 0, 1);
        let failed = Item::new("MAIN_SWORD", 4, 0, 2);

        let resolution = resolver.resolve_at(&[ok.clone(), failed.clone()], now()).await.unwrap();

        assert_eq!(resolution.prices.get(&ok.price_key()), Some(700.0));
        assert_eq!(resolution.prices.get(&failed.price_key()), None);
        assert_eq!(resolution.failed_batches, 1);
        assert_eq!(resolution.unresolved, 1);
        // Nothing cached for the failed batch, so it is retried next time.
        assert!(store.get_cached_price(&failed.price_key()).await.unwrap().is_none());
    }

    #[test]
    fn price_map_never_holds_zero() {
        let key = Item::new("MAIN_SWORD", 4, 0, 1).price_key();
        let map: PriceMap = [(key.clone(), 0.0)].into_iter().collect();
        assert_eq!(map.len(), 0);
        assert_eq!(map.get(&key), None);
    }
}
