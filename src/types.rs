use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item_codec;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// One equipped item. An empty `name` means the slot was not equipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub tier: u8,
    pub enchantment: u8,
    pub quality: u8,
}

impl Item {
    pub fn new(name: impl Into<String>, tier: u8, enchantment: u8, quality: u8) -> Self {
        Self { name: name.into(), tier, enchantment, quality }
    }

    pub fn is_equipped(&self) -> bool {
        !self.name.is_empty()
    }

    /// Market identity: every field, quality included.
    pub fn price_key(&self) -> PriceKey {
        PriceKey(self.clone())
    }

    /// Build-choice identity: quality is a market variable, so it is dropped.
    pub fn usage_key(&self) -> UsageKey {
        UsageKey(Item { quality: 0, ..self.clone() })
    }

    /// `T<tier>_<NAME>[@<enchant>]`
    pub fn code(&self) -> String {
        item_codec::encode(self)
    }
}

/// Key of the price cache and of resolved price maps. Quality-exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriceKey(Item);

impl PriceKey {
    pub fn item(&self) -> &Item {
        &self.0
    }

    pub fn quality(&self) -> u8 {
        self.0.quality
    }

    pub fn code(&self) -> String {
        self.0.code()
    }
}

/// Key of item-level statistics. Quality-independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageKey(Item);

impl UsageKey {
    pub fn item(&self) -> &Item {
        &self.0
    }

    /// The market identity of this item at a given quality.
    pub fn with_quality(&self, quality: u8) -> PriceKey {
        PriceKey(Item { quality, ..self.0.clone() })
    }

    pub fn code(&self) -> String {
        self.0.code()
    }
}

/// Quality tiers the market distinguishes.
pub const QUALITIES: std::ops::RangeInclusive<u8> = 0..=4;

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    MainHand,
    OffHand,
    Head,
    Chest,
    Foot,
    Cape,
    Potion,
    Food,
    Mount,
    Bag,
}

impl Slot {
    pub const ALL: [Slot; 10] = [
        Slot::MainHand,
        Slot::OffHand,
        Slot::Head,
        Slot::Chest,
        Slot::Foot,
        Slot::Cape,
        Slot::Potion,
        Slot::Food,
        Slot::Mount,
        Slot::Bag,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::MainHand => "main_hand",
            Slot::OffHand => "off_hand",
            Slot::Head => "head",
            Slot::Chest => "chest",
            Slot::Foot => "foot",
            Slot::Cape => "cape",
            Slot::Potion => "potion",
            Slot::Food => "food",
            Slot::Mount => "mount",
            Slot::Bag => "bag",
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Slot::ALL
            .into_iter()
            .find(|slot| slot.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown slot {s:?}"))
    }
}

/// Which slots count economically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotFilter([bool; 10]);

impl SlotFilter {
    /// Weapon, off-hand and armor. Consumables, mount and bag are excluded.
    pub fn economic() -> Self {
        Self::from_slots(&[
            Slot::MainHand,
            Slot::OffHand,
            Slot::Head,
            Slot::Chest,
            Slot::Foot,
            Slot::Cape,
        ])
    }

    pub fn from_slots(slots: &[Slot]) -> Self {
        let mut mask = [false; 10];
        for slot in slots {
            mask[slot.index()] = true;
        }
        Self(mask)
    }

    /// Parses a comma-separated slot list such as `main_hand,head`.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let slots = raw
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<std::result::Result<Vec<Slot>, _>>()?;
        Ok(Self::from_slots(&slots))
    }

    pub fn includes(&self, slot: Slot) -> bool {
        self.0[slot.index()]
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        Slot::ALL.into_iter().filter(|s| self.includes(*s))
    }
}

impl Default for SlotFilter {
    fn default() -> Self {
        Self::economic()
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Snapshot of the ten equipment slots at event time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Build {
    pub main_hand: Item,
    pub off_hand: Item,
    pub head: Item,
    pub chest: Item,
    pub foot: Item,
    pub cape: Item,
    pub potion: Item,
    pub food: Item,
    pub mount: Item,
    pub bag: Item,
}

impl Build {
    pub fn slot(&self, slot: Slot) -> &Item {
        match slot {
            Slot::MainHand => &self.main_hand,
            Slot::OffHand => &self.off_hand,
            Slot::Head => &self.head,
            Slot::Chest => &self.chest,
            Slot::Foot => &self.foot,
            Slot::Cape => &self.cape,
            Slot::Potion => &self.potion,
            Slot::Food => &self.food,
            Slot::Mount => &self.mount,
            Slot::Bag => &self.bag,
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut Item {
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

    /// Equipped items in the filtered slots.
    pub fn equipped<'a>(&'a self, filter: &'a SlotFilter) -> impl Iterator<Item = (Slot, &'a Item)> + 'a {
        filter
            .slots()
            .map(move |slot| (slot, self.slot(slot)))
            .filter(|(_, item)| item.is_equipped())
    }

    /// Names-only projection over the filtered slots.
    pub fn signature(&self, filter: &SlotFilter) -> BuildSignature {
        let mut names: [String; 10] = Default::default();
        for slot in filter.slots() {
            names[slot.index()] = self.slot(slot).name.clone();
        }
        BuildSignature(names)
    }
}

/// Aggregation key for build-level statistics: slot item names, tier, enchantment
/// and quality dropped. Slots outside the filter are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildSignature([String; 10]);

impl BuildSignature {
    pub fn name(&self, slot: Slot) -> &str {
        &self.0[slot.index()]
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One kill as reported by the feed. Immutable once ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    pub killer: Build,
    pub killer_avg_ip: f64,
    pub victim: Build,
    pub victim_avg_ip: f64,
    pub participants: u8,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Exactly one participant on the killing side.
    pub fn is_solo(&self) -> bool {
        self.participants == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_key_drops_quality_only() {
        let a = Item::new("MAIN_SWORD", 4, 1, 3);
        let b = Item::new("MAIN_SWORD", 4, 1, 0);
        assert_eq!(a.usage_key(), b.usage_key());
        assert_ne!(a.price_key(), b.price_key());
        assert_ne!(a.usage_key(), Item::new("MAIN_SWORD", 5, 1, 3).usage_key());
    }

    #[test]
    fn usage_key_quality_variants() {
        let key = Item::new("HEAD_PLATE_SET1", 6, 0, 2).usage_key();
        let variant = key.with_quality(4);
        assert_eq!(variant.quality(), 4);
        assert_eq!(variant.item().name, "HEAD_PLATE_SET1");
    }

    #[test]
    fn signature_ignores_tier_and_excluded_slots() {
        let filter = SlotFilter::economic();
        let mut a = Build::default();
        a.main_hand = Item::new("MAIN_SWORD", 4, 0, 1);
        a.food = Item::new("MEAL_STEW", 4, 0, 0);
        let mut b = a.clone();
        b.main_hand = Item::new("MAIN_SWORD", 8, 3, 4);
        b.food = Item::new("MEAL_OMELETTE", 7, 0, 0);

        assert_eq!(a.signature(&filter), b.signature(&filter));
        assert_eq!(a.signature(&filter).name(Slot::MainHand), "MAIN_SWORD");
        assert_eq!(a.signature(&filter).name(Slot::Food), "");
        let all = SlotFilter::from_slots(&Slot::ALL);
        assert_ne!(a.signature(&all), b.signature(&all));
    }

    #[test]
    fn equipped_skips_empty_and_filtered_slots() {
        let mut build = Build::default();
        build.main_hand = Item::new("MAIN_SWORD", 4, 0, 1);
        build.bag = Item::new("BAG", 4, 0, 1);
        let slots: Vec<_> = build.equipped(&SlotFilter::economic()).map(|(s, _)| s).collect();
        assert_eq!(slots, vec![Slot::MainHand]);
    }

    #[test]
    fn slot_filter_parsing() {
        let filter = SlotFilter::parse("main_hand, HEAD").unwrap();
        assert!(filter.includes(Slot::MainHand));
        assert!(filter.includes(Slot::Head));
        assert!(!filter.includes(Slot::Chest));
        assert!(SlotFilter::parse("main_hand,wings").is_err());
    }
}
