use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ITEM_LOOT_FACTOR;
use crate::db::store::EventStore;
use crate::error::{AppError, Result};
use crate::names::NameCache;
use crate::pricing::build_pricer::BuildPricer;
use crate::pricing::resolver::PriceMap;
use crate::stats::aggregator::{aggregate_builds, aggregate_items, build_rows, item_rows, BuildRow, ItemRow};
use crate::types::{Event, Slot, SlotFilter};

/// Turns the event log into report rows: load, price, aggregate, name.
pub struct ReportBuilder {
    events: Arc<dyn EventStore>,
    pricer: BuildPricer,
    names: Arc<NameCache>,
}

impl ReportBuilder {
    pub fn new(events: Arc<dyn EventStore>, pricer: BuildPricer, names: Arc<NameCache>) -> Self {
        Self { events, pricer, names }
    }

    pub async fn build_item_report(&self, filter: &SlotFilter) -> Result<Vec<ItemRow>> {
        let (events, prices) = self.priced_solo_events(filter).await?;
        let stats = aggregate_items(&events, filter, &prices);
        let mut rows = item_rows(&stats, ITEM_LOOT_FACTOR);

        self.names.ensure_loaded().await;
        for row in &mut rows {
            row.name = self.names.code_name(&row.item_id);
        }
        info!(events = events.len(), rows = rows.len(), "Item report built");
        Ok(rows)
    }

    pub async fn build_build_report(&self, filter: &SlotFilter) -> Result<Vec<BuildRow>> {
        let (events, prices) = self.priced_solo_events(filter).await?;
        let stats = aggregate_builds(&events, filter, &prices);

        self.names.ensure_loaded().await;
        let rows: Vec<BuildRow> = build_rows(&stats)
            .into_iter()
            .map(|(signature, mut row)| {
                for slot in Slot::ALL {
                    let name = signature.name(slot);
                    if !name.is_empty() {
                        *row.slot_mut(slot) = self.names.bare_name(name);
                    }
                }
                row
            })
            .collect();
        info!(events = events.len(), rows = rows.len(), "Build report built");
        Ok(rows)
    }

    /// Solo events plus the prices of every item their builds need. Missing
    /// prices degrade the report, they do not fail it.
    async fn priced_solo_events(&self, filter: &SlotFilter) -> Result<(Vec<Event>, PriceMap)> {
        let events: Vec<Event> = self
            .events
            .all_events()
            .await?
            .into_iter()
            .filter(Event::is_solo)
            .collect();

        let builds = events.iter().flat_map(|e| [&e.killer, &e.victim]);
        let resolution = self.pricer.resolve_builds(builds, filter).await?;
        if let Some(e) = resolution.incomplete() {
            warn!("Report priced on best effort: {e}");
        }
        Ok((events, resolution.prices))
    }
}

/// CSV with a header row taken from the row struct's field names.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| AppError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::pricing::market::{MarketQuote, MarketSource};
    use crate::pricing::resolver::PriceResolver;
    use crate::types::{Build, Item};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    /// Every listed code sells for a fixed price.
    struct FixedMarket(Vec<(&'static str, f64)>);

    #[async_trait]
    impl MarketSource for FixedMarket {
        async fn fetch_quotes(&self, codes: &[String], _quality: u8) -> Result<Vec<MarketQuote>> {
            Ok(self
                .0
                .iter()
                .filter(|(code, _)| codes.iter().any(|c| c == code))
                .map(|(code, price)| MarketQuote {
                    item_id: code.to_string(),
                    sell_price_min: *price,
                })
                .collect())
        }
    }

    fn event(id: i64, participants: u8, killer: Build, victim: Build) -> Event {
        Event {
            id,
            killer,
            killer_avg_ip: 1100.0,
            victim,
            victim_avg_ip: 1000.0,
            participants,
            timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        }
    }

    async fn builder(events: &[Event], market: FixedMarket) -> ReportBuilder {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store.insert_events_if_absent(events).await.unwrap();
        let resolver = PriceResolver::new(store.clone(), Arc::new(market), Duration::from_secs(3600));
        let names = NameCache::offline();
        names.load_dump("1: T4_MAIN_SWORD : Adept's Broadsword\n2: T5_2H_BOW : Expert's Bow\n");
        ReportBuilder::new(store, BuildPricer::new(Arc::new(resolver)), Arc::new(names))
    }

    fn killer() -> Build {
        let mut b = Build::default();
        b.main_hand = Item::new("MAIN_SWORD", 4, 0, 1);
        b
    }

    fn victim() -> Build {
        let mut b = Build::default();
        b.main_hand = Item::new("2H_BOW", 5, 0, 1);
        b.chest = Item::new("ARMOR_LEATHER_SET1", 5, 0, 1);
        b
    }

    fn market() -> FixedMarket {
        FixedMarket(vec![
            ("T4_MAIN_SWORD", 2_000.0),
            ("T5_2H_BOW", 6_000.0),
            ("T5_ARMOR_LEATHER_SET1", 4_000.0),
        ])
    }

    #[tokio::test]
    async fn item_report_end_to_end() {
        let events = vec![event(1, 1, killer(), victim()), event(2, 3, killer(), victim())];
        let reports = builder(&events, market()).await;

        let rows = reports.build_item_report(&SlotFilter::economic()).await.unwrap();
        let sword = rows.iter().find(|r| r.item_id == "T4_MAIN_SWORD").unwrap();
        assert_eq!(sword.kills, 1);
        assert!((sword.silver_gained - 10_000.0 * ITEM_LOOT_FACTOR).abs() < 1e-6);
        assert_eq!(sword.name, "Adept's Broadsword");

        let armor = rows.iter().find(|r| r.item_id == "T5_ARMOR_LEATHER_SET1").unwrap();
        assert_eq!(armor.deaths, 1);
        assert_eq!(armor.name, "T5_ARMOR_LEATHER_SET1");
    }

    #[tokio::test]
    async fn unpriced_victims_leave_an_empty_report() {
        let events = vec![event(1, 1, killer(), victim())];
        let reports = builder(&events, FixedMarket(vec![("T5_2H_BOW", 6_000.0)])).await;

        assert!(reports.build_item_report(&SlotFilter::economic()).await.unwrap().is_empty());
        assert!(reports.build_build_report(&SlotFilter::economic()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn build_report_uses_bare_names() {
        let events = vec![event(1, 1, killer(), victim())];
        let reports = builder(&events, market()).await;

        let rows = reports.build_build_report(&SlotFilter::economic()).await.unwrap();
        assert_eq!(rows.len(), 2);
        let bow = rows.iter().find(|r| r.deaths == 1).unwrap();
        assert_eq!(bow.main_hand, "Bow");
        assert_eq!(bow.chest, "ARMOR_LEATHER_SET1");
        assert_eq!(bow.silver_lost, 10_000.0);
    }

    #[test]
    fn csv_has_header_and_rows() {
        let row = ItemRow {
            item_id: "T4_MAIN_SWORD".to_string(),
            name: "Adept's Broadsword".to_string(),
            tier: 4,
            enchantment: 0,
            tier_plus_enchant: 4,
            usages: 2,
            average_ip: 1050.0,
            kd: 1.0,
            silver_ratio: 0.5,
            kills: 1,
            deaths: 1,
            silver_gained: 7000.0,
            silver_lost: 10000.0,
        };
        let csv = String::from_utf8(to_csv(&[row]).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("item_id,name,tier,enchantment,tier_plus_enchant,usages,average_ip,kd,silver_ratio,kills,deaths,silver_gained,silver_lost")
        );
        assert!(lines.next().unwrap().starts_with("T4_MAIN_SWORD,Adept's Broadsword,4,0,4,2,"));
    }
}
