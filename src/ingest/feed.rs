use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{EVENT_MAX_OFFSET, EVENT_PAGE_LIMIT, EVENT_PAGE_STEP, HTTP_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::item_codec;
use crate::types::{Build, Event, Slot};

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "EventId")]
    event_id: i64,
    #[serde(rename = "TimeStamp")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "numberOfParticipants", default)]
    participants: u32,
    #[serde(rename = "Killer")]
    killer: RawParticipant,
    #[serde(rename = "Victim")]
    victim: RawParticipant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawParticipant {
    #[serde(default)]
    average_item_power: f64,
    #[serde(default)]
    equipment: RawEquipment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawEquipment {
    main_hand: Option<RawItem>,
    off_hand: Option<RawItem>,
    head: Option<RawItem>,
    armor: Option<RawItem>,
    shoes: Option<RawItem>,
    cape: Option<RawItem>,
    potion: Option<RawItem>,
    food: Option<RawItem>,
    mount: Option<RawItem>,
    bag: Option<RawItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawItem {
    #[serde(rename = "Type", default)]
    code: String,
    #[serde(default)]
    quality: u8,
}

impl RawEquipment {
    fn raw_slot(&self, slot: Slot) -> Option<&RawItem> {
        match slot {
            Slot::MainHand => self.main_hand.as_ref(),
            Slot::OffHand => self.off_hand.as_ref(),
            Slot::Head => self.head.as_ref(),
            Slot::Chest => self.armor.as_ref(),
            Slot::Foot => self.shoes.as_ref(),
            Slot::Cape => self.cape.as_ref(),
            Slot::Potion => self.potion.as_ref(),
            Slot::Food => self.food.as_ref(),
            Slot::Mount => self.mount.as_ref(),
            Slot::Bag => self.bag.as_ref(),
        }
    }

    /// Decodes every present slot. A slot whose code does not decode is left
    /// unequipped; the kill itself is kept. Returns the number of such slots.
    fn to_build(&self, event_id: i64) -> (Build, usize) {
        let mut build = Build::default();
        let mut bad_slots = 0;
        for slot in Slot::ALL {
            let Some(raw) = self.raw_slot(slot) else { continue };
            match item_codec::decode(&raw.code, raw.quality) {
                Ok(item) => *build.slot_mut(slot) = item,
                Err(e) => {
                    warn!(event_id, %slot, "Leaving slot unequipped: {e}");
                    bad_slots += 1;
                }
            }
        }
        (build, bad_slots)
    }
}

impl RawEvent {
    fn into_event(self) -> (Event, usize) {
        let (killer, killer_bad) = self.killer.equipment.to_build(self.event_id);
        let (victim, victim_bad) = self.victim.equipment.to_build(self.event_id);
        let event = Event {
            id: self.event_id,
            killer,
            killer_avg_ip: self.killer.average_item_power,
            victim,
            victim_avg_ip: self.victim.average_item_power,
            participants: u8::try_from(self.participants).unwrap_or(u8::MAX),
            timestamp: self.timestamp,
        };
        (event, killer_bad + victim_bad)
    }
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

/// Events parsed from one feed page, plus what had to be dropped on the way.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub events: Vec<Event>,
    /// Records dropped whole (bad id, timestamp or shape).
    pub skipped: usize,
    /// Slots left unequipped because their item code did not decode.
    pub skipped_slots: usize,
}

/// Parses one page. A body that is not a JSON array fails the page; a malformed
/// record inside the array is skipped and its siblings are kept. An undecodable
/// item code only costs its slot.
pub fn parse_page(body: &str) -> Result<ParsedPage> {
    let records: Vec<serde_json::Value> = serde_json::from_str(body)?;
    let mut page = ParsedPage::default();

    for record in records {
        let id = record.get("EventId").and_then(|v| v.as_i64());
        match serde_json::from_value::<RawEvent>(record) {
            Ok(raw) => {
                let (event, bad_slots) = raw.into_event();
                page.skipped_slots += bad_slots;
                page.events.push(event);
            }
            Err(e) => {
                warn!(event_id = ?id, "Skipping malformed feed record: {e}");
                page.skipped += 1;
            }
        }
    }

    Ok(page)
}

/// Offsets of every page requested in one ingestion cycle.
pub fn page_offsets() -> impl Iterator<Item = u32> {
    (0..=EVENT_MAX_OFFSET).step_by(EVENT_PAGE_STEP as usize)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// One page of the paginated kill feed.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, offset: u32) -> Result<ParsedPage>;
}

/// `GET <event_url>?limit=L&offset=O`
pub struct HttpFeed {
    client: reqwest::Client,
    event_url: String,
}

impl HttpFeed {
    pub fn new(event_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, event_url: event_url.into() })
    }

    fn page_url(&self, offset: u32) -> String {
        format!("{}?limit={}&offset={}", self.event_url, EVENT_PAGE_LIMIT, offset)
    }
}

#[async_trait]
impl PageSource for HttpFeed {
    async fn fetch_page(&self, offset: u32) -> Result<ParsedPage> {
        let url = self.page_url(offset);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Status { url, status: status.as_u16() });
        }
        let body = resp.text().await?;
        let page = parse_page(&body).map_err(|e| AppError::Feed(format!("{url}: {e}")))?;
        debug!(
            offset,
            events = page.events.len(),
            skipped = page.skipped,
            skipped_slots = page.skipped_slots,
            "Feed page parsed"
        );
        Ok(page)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
