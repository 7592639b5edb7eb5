use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::models::{millis_to_utc, EventRow, PriceRow};
use crate::error::Result;
use crate::types::{Event, PriceKey};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Persistent event log. Event ids are unique; re-inserting a known id is a no-op.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns the number of events that were actually new.
    async fn insert_events_if_absent(&self, events: &[Event]) -> Result<u64>;

    async fn all_events(&self) -> Result<Vec<Event>>;

    async fn event_count(&self) -> Result<i64>;

    /// Returns the number of events removed.
    async fn delete_events_older_than(&self, threshold: DateTime<Utc>) -> Result<u64>;
}

/// A price as last observed. `price == 0.0` records a lookup that found no listing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedPrice {
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl CachedPrice {
    /// Entries observed in the future count as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, stale_threshold: Duration) -> bool {
        match now.signed_duration_since(self.observed_at).to_std() {
            Ok(age) => age <= stale_threshold,
            Err(_) => true,
        }
    }

    pub fn known(&self) -> Option<f64> {
        (self.price > 0.0).then_some(self.price)
    }
}

/// Persistent, quality-exact price cache.
#[async_trait]
pub trait PriceCache: Send + Sync {
    async fn get_cached_price(&self, key: &PriceKey) -> Result<Option<CachedPrice>>;

    async fn get_cached_prices(&self, keys: &[PriceKey]) -> Result<HashMap<PriceKey, CachedPrice>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(cached) = self.get_cached_price(key).await? {
                found.insert(key.clone(), cached);
            }
        }
        Ok(found)
    }

    /// Upserts every entry with `observed_at = now`.
    async fn put_cached_prices(&self, prices: &[(PriceKey, f64)], now: DateTime<Utc>) -> Result<()>;

    async fn put_cached_price(&self, key: &PriceKey, price: f64, now: DateTime<Utc>) -> Result<()> {
        self.put_cached_prices(&[(key.clone(), price)], now).await
    }

    async fn price_count(&self) -> Result<i64>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection, since every
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn insert_events_if_absent(&self, events: &[Event]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }
        let rows = events.iter().map(EventRow::from_event).collect::<Result<Vec<_>>>()?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for row in &rows {
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO events (
                    id, killer_build, killer_avg_ip, victim_build, victim_avg_ip,
                    participants, timestamp_ms
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(&row.killer_build)
            .bind(row.killer_avg_ip)
            .bind(&row.victim_build)
            .bind(row.victim_avg_ip)
            .bind(row.participants)
            .bind(row.timestamp_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        debug!(offered = events.len(), inserted, "Events committed");
        Ok(inserted)
    }

    async fn all_events(&self) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, killer_build, killer_avg_ip, victim_build, victim_avg_ip,
                   participants, timestamp_ms
            FROM events
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn event_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete_events_older_than(&self, threshold: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM events WHERE timestamp_ms < ?")
            .bind(threshold.timestamp_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[async_trait]
impl PriceCache for SqliteStore {
    async fn get_cached_price(&self, key: &PriceKey) -> Result<Option<CachedPrice>> {
        let item = key.item();
        let row = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT name, tier, enchantment, quality, price, observed_at_ms
            FROM prices
            WHERE name = ? AND tier = ? AND enchantment = ? AND quality = ?
            "#,
        )
        .bind(&item.name)
        .bind(i64::from(item.tier))
        .bind(i64::from(item.enchantment))
        .bind(i64::from(item.quality))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CachedPrice {
            price: r.price,
            observed_at: millis_to_utc(r.observed_at_ms),
        }))
    }

    async fn get_cached_prices(&self, keys: &[PriceKey]) -> Result<HashMap<PriceKey, CachedPrice>> {
        let mut found = HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return Ok(found);
        }

        // One read transaction so the batch sees a single snapshot.
        let mut tx = self.pool.begin().await?;
        for key in keys {
            let item = key.item();
            let row = sqlx::query_as::<_, PriceRow>(
                r#"
                SELECT name, tier, enchantment, quality, price, observed_at_ms
                FROM prices
                WHERE name = ? AND tier = ? AND enchantment = ? AND quality = ?
                "#,
            )
            .bind(&item.name)
            .bind(i64::from(item.tier))
            .bind(i64::from(item.enchantment))
            .bind(i64::from(item.quality))
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                found.insert(
                    row.item().price_key(),
                    CachedPrice {
                        price: row.price,
                        observed_at: millis_to_utc(row.observed_at_ms),
                    },
                );
            }
        }
        tx.commit().await?;
        Ok(found)
    }

    async fn put_cached_prices(&self, prices: &[(PriceKey, f64)], now: DateTime<Utc>) -> Result<()> {
        if prices.is_empty() {
            return Ok(());
        }
        let observed_at_ms = now.timestamp_millis();

        let mut tx = self.pool.begin().await?;
        for (key, price) in prices {
            let item = key.item();
            sqlx::query(
                r#"
                INSERT INTO prices (name, tier, enchantment, quality, price, observed_at_ms)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(name, tier, enchantment, quality) DO UPDATE SET
                    price = excluded.price,
                    observed_at_ms = excluded.observed_at_ms
                "#,
            )
            .bind(&item.name)
            .bind(i64::from(item.tier))
            .bind(i64::from(item.enchantment))
            .bind(i64::from(item.quality))
            .bind(*price)
            .bind(observed_at_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = prices.len(), "Prices cached");
        Ok(())
    }

    async fn price_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prices")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Build, Item};
    use chrono::TimeZone;

    fn event(id: i64, ts_secs: i64) -> Event {
        let mut killer = Build::default();
        killer.main_hand = Item::new("MAIN_SWORD", 4, 0, 1);
        let mut victim = Build::default();
        victim.main_hand = Item::new("2H_CLAYMORE", 5, 1, 2);
        Event {
            id,
            killer,
            killer_avg_ip: 1100.0,
            victim,
            victim_avg_ip: 1050.5,
            participants: 1,
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn events_round_trip_through_sqlite() {
        let store = SqliteStore::in_memory().await.unwrap();
        let original = event(42, 1_700_000_000);
        assert_eq!(store.insert_events_if_absent(&[original.clone()]).await.unwrap(), 1);

        let events = store.all_events().await.unwrap();
        assert_eq!(events, vec![original]);
    }

    #[tokio::test]
    async fn reinserting_an_id_is_a_noop() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = event(7, 1_700_000_000);
        store.insert_events_if_absent(&[first.clone()]).await.unwrap();

        // Same id, different payload: must neither duplicate nor update.
        let mut changed = event(7, 1_700_000_500);
        changed.participants = 3;
        let inserted = store.insert_events_if_absent(&[changed, event(8, 1_700_000_000)]).await.unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.event_count().await.unwrap(), 2);
        let events = store.all_events().await.unwrap();
        assert_eq!(events[0], first);
    }

    #[tokio::test]
    async fn deletes_only_old_events() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_events_if_absent(&[event(1, 1_000), event(2, 2_000), event(3, 3_000)])
            .await
            .unwrap();

        let deleted = store
            .delete_events_older_than(Utc.timestamp_opt(2_500, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        let ids: Vec<i64> = store.all_events().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn price_upsert_overwrites_by_exact_identity() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_000_600, 0).unwrap();
        let q1 = Item::new("MAIN_SWORD", 4, 0, 1).price_key();
        let q2 = Item::new("MAIN_SWORD", 4, 0, 2).price_key();

        store.put_cached_prices(&[(q1.clone(), 100.0), (q2.clone(), 0.0)], t0).await.unwrap();
        store.put_cached_price(&q1, 150.0, t1).await.unwrap();

        let got = store.get_cached_price(&q1).await.unwrap().unwrap();
        assert_eq!(got, CachedPrice { price: 150.0, observed_at: t1 });

        let batch = store.get_cached_prices(&[q1.clone(), q2.clone()]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[&q2].known(), None);
        assert_eq!(store.price_count().await.unwrap(), 2);

        let absent = Item::new("MAIN_SWORD", 4, 0, 3).price_key();
        assert!(store.get_cached_price(&absent).await.unwrap().is_none());
    }

    #[test]
    fn staleness_boundary() {
        let threshold = Duration::from_secs(7 * 24 * 3600);
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let stale_at = now - chrono::Duration::from_std(threshold).unwrap() - chrono::Duration::seconds(1);

        let fresh = CachedPrice { price: 10.0, observed_at: now };
        let stale = CachedPrice { price: 10.0, observed_at: stale_at };
        assert!(fresh.is_fresh(now, threshold));
        assert!(!stale.is_fresh(now, threshold));
    }
}
