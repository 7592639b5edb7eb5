//! Database row types matching `migrations/`. Used by sqlx for typed queries.

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::types::{Build, Event, Item};

#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub killer_build: String,
    pub killer_avg_ip: f64,
    pub victim_build: String,
    pub victim_avg_ip: f64,
    pub participants: i64,
    pub timestamp_ms: i64,
}

impl EventRow {
    pub fn from_event(event: &Event) -> Result<Self> {
        Ok(Self {
            id: event.id,
            killer_build: serde_json::to_string(&event.killer)?,
            killer_avg_ip: event.killer_avg_ip,
            victim_build: serde_json::to_string(&event.victim)?,
            victim_avg_ip: event.victim_avg_ip,
            participants: i64::from(event.participants),
            timestamp_ms: event.timestamp.timestamp_millis(),
        })
    }
}

impl TryFrom<EventRow> for Event {
    type Error = AppError;

    fn try_from(row: EventRow) -> Result<Self> {
        let killer: Build = serde_json::from_str(&row.killer_build)?;
        let victim: Build = serde_json::from_str(&row.victim_build)?;
        Ok(Event {
            id: row.id,
            killer,
            killer_avg_ip: row.killer_avg_ip,
            victim,
            victim_avg_ip: row.victim_avg_ip,
            participants: u8::try_from(row.participants).unwrap_or(u8::MAX),
            timestamp: millis_to_utc(row.timestamp_ms),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PriceRow {
    pub name: String,
    pub tier: i64,
    pub enchantment: i64,
    pub quality: i64,
    pub price: f64,
    pub observed_at_ms: i64,
}

impl PriceRow {
    pub fn item(&self) -> Item {
        Item {
            name: self.name.clone(),
            tier: clamp_u8(self.tier),
            enchantment: clamp_u8(self.enchantment),
            quality: clamp_u8(self.quality),
        }
    }
}

pub fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn clamp_u8(v: i64) -> u8 {
    v.clamp(0, i64::from(u8::MAX)) as u8
}
