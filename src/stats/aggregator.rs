//! Per-item and per-build performance statistics over priced solo kills.
//!
//! Pure: events and a resolved price map in, rows out. Accumulators are
//! rebuilt on every run and never persisted.

use std::collections::HashMap;

use serde::Serialize;

use crate::pricing::build_pricer::price_of;
use crate::pricing::market::median;
use crate::pricing::resolver::PriceMap;
use crate::types::{BuildSignature, Event, Slot, SlotFilter, UsageKey, QUALITIES};

/// Running totals for one item or one build signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub silver_gained: f64,
    pub silver_lost: f64,
    pub kills: u64,
    pub deaths: u64,
    pub sum_average_ip: f64,
    /// Market prices seen for this row; their median normalises the silver ratio.
    pub observed_prices: Vec<f64>,
}

pub type ItemStats = Stats;
pub type BuildStats = Stats;

impl Stats {
    fn credit_kill(&mut self, silver: f64, average_ip: f64) {
        self.kills += 1;
        self.silver_gained += silver;
        self.sum_average_ip += average_ip;
    }

    fn credit_death(&mut self, silver: f64, average_ip: f64) {
        self.deaths += 1;
        self.silver_lost += silver;
        self.sum_average_ip += average_ip;
    }

    pub fn usages(&self) -> u64 {
        self.kills + self.deaths
    }

    pub fn average_ip(&self) -> f64 {
        match self.usages() {
            0 => 0.0,
            n => self.sum_average_ip / n as f64,
        }
    }

    pub fn kd(&self) -> f64 {
        self.kills as f64 / (self.deaths.max(1)) as f64
    }

    /// Median of the observed prices, or +inf when nothing was ever priced.
    pub fn representative_price(&self) -> f64 {
        match median(&self.observed_prices) {
            p if p > 0.0 => p,
            _ => f64::INFINITY,
        }
    }

    /// `gained * loot / max(lost, 1, representative)`. Tends to 0, never to
    /// infinity, for rows without a price.
    pub fn silver_ratio(&self, loot_factor: f64) -> f64 {
        let denominator = self.silver_lost.max(1.0).max(self.representative_price());
        self.silver_gained * loot_factor / denominator
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Solo events whose victim build has a known price, paired with that price.
fn priced_solo_events<'a>(
    events: &'a [Event],
    filter: &'a SlotFilter,
    prices: &'a PriceMap,
) -> impl Iterator<Item = (&'a Event, f64)> + 'a {
    events
        .iter()
        .filter(|e| e.is_solo())
        .filter_map(move |e| price_of(&e.victim, filter, prices).map(|p| (e, p)))
}

/// Item-level accumulation, keyed quality-independently. Each item's observed
/// prices are its known quality variants.
pub fn aggregate_items(events: &[Event], filter: &SlotFilter, prices: &PriceMap) -> HashMap<UsageKey, ItemStats> {
    let mut stats: HashMap<UsageKey, ItemStats> = HashMap::new();

    for (event, victim_price) in priced_solo_events(events, filter, prices) {
        for (_, item) in event.killer.equipped(filter) {
            stats
                .entry(item.usage_key())
                .or_default()
                .credit_kill(victim_price, event.killer_avg_ip);
        }
        for (_, item) in event.victim.equipped(filter) {
            stats
                .entry(item.usage_key())
                .or_default()
                .credit_death(victim_price, event.victim_avg_ip);
        }
    }

    for (key, row) in stats.iter_mut() {
        row.observed_prices = QUALITIES.filter_map(|q| prices.get(&key.with_quality(q))).collect();
    }
    stats
}

/// Build-level accumulation, keyed by name-only signature. Each side's own
/// build price is observed when known.
pub fn aggregate_builds(
    events: &[Event],
    filter: &SlotFilter,
    prices: &PriceMap,
) -> HashMap<BuildSignature, BuildStats> {
    let mut stats: HashMap<BuildSignature, BuildStats> = HashMap::new();

    for (event, victim_price) in priced_solo_events(events, filter, prices) {
        let killer = stats.entry(event.killer.signature(filter)).or_default();
        killer.credit_kill(victim_price, event.killer_avg_ip);
        if let Some(killer_price) = price_of(&event.killer, filter, prices) {
            killer.observed_prices.push(killer_price);
        }

        let victim = stats.entry(event.victim.signature(filter)).or_default();
        victim.credit_death(victim_price, event.victim_avg_ip);
        victim.observed_prices.push(victim_price);
    }
    stats
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRow {
    pub item_id: String,
    /// Human-readable name; the item code until a name is known.
    pub name: String,
    pub tier: u8,
    pub enchantment: u8,
    pub tier_plus_enchant: u8,
    pub usages: u64,
    pub average_ip: f64,
    pub kd: f64,
    pub silver_ratio: f64,
    pub kills: u64,
    pub deaths: u64,
    pub silver_gained: f64,
    pub silver_lost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildRow {
    pub main_hand: String,
    pub off_hand: String,
    pub head: String,
    pub chest: String,
    pub foot: String,
    pub cape: String,
    pub potion: String,
    pub food: String,
    pub mount: String,
    pub bag: String,
    pub usages: u64,
    pub average_ip: f64,
    pub kd: f64,
    pub silver_ratio: f64,
    pub kills: u64,
    pub deaths: u64,
    pub silver_gained: f64,
    pub silver_lost: f64,
}

impl BuildRow {
    pub fn slot_mut(&mut self, slot: Slot) -> &mut String {
        match slot {
            Slot::MainHand => &mut self.main_hand,
            Slot::OffHand => &mut self.off_hand,
            Slot::Head => &mut self.head,
            Slot::Chest => &mut self.chest,
            Slot::Foot => &mut self.foot,
            Slot::Cape => &mut self.cape,
            Slot::Potion => &mut self.potion,
            Slot::Food => &mut self.food,
            Slot::Mount => &mut self.mount,
            Slot::Bag => &mut self.bag,
        }
    }
}

/// Item rows, most used first. `silver_gained` already has the loot factor applied.
pub fn item_rows(stats: &HashMap<UsageKey, ItemStats>, loot_factor: f64) -> Vec<ItemRow> {
    let mut rows: Vec<ItemRow> = stats
        .iter()
        .map(|(key, s)| {
            let item = key.item();
            let code = key.code();
            ItemRow {
                name: code.clone(),
                item_id: code,
                tier: item.tier,
                enchantment: item.enchantment,
                tier_plus_enchant: item.tier + item.enchantment,
                usages: s.usages(),
                average_ip: s.average_ip(),
                kd: s.kd(),
                silver_ratio: s.silver_ratio(loot_factor),
                kills: s.kills,
                deaths: s.deaths,
                silver_gained: s.silver_gained * loot_factor,
                silver_lost: s.silver_lost,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.usages.cmp(&a.usages).then_with(|| a.item_id.cmp(&b.item_id)));
    rows
}

/// Build rows, most used first. Slot columns hold item names; slots outside
/// the filter are empty.
pub fn build_rows(stats: &HashMap<BuildSignature, BuildStats>) -> Vec<(BuildSignature, BuildRow)> {
    let mut rows: Vec<(BuildSignature, BuildRow)> = stats
        .iter()
        .map(|(signature, s)| {
            let mut row = BuildRow {
                main_hand: String::new(),
                off_hand: String::new(),
                head: String::new(),
                chest: String::new(),
                foot: String::new(),
                cape: String::new(),
                potion: String::new(),
                food: String::new(),
                mount: String::new(),
                bag: String::new(),
                usages: s.usages(),
                average_ip: s.average_ip(),
                kd: s.kd(),
                silver_ratio: s.silver_ratio(1.0),
                kills: s.kills,
                deaths: s.deaths,
                silver_gained: s.silver_gained,
                silver_lost: s.silver_lost,
            };
            for slot in Slot::ALL {
                *row.slot_mut(slot) = signature.name(slot).to_string();
            }
            (signature.clone(), row)
        })
        .collect();
    rows.sort_by(|a, b| b.1.usages.cmp(&a.1.usages).then_with(|| a.0.cmp(&b.0)));
    rows
}
