use std::time::Duration;

use crate::error::{AppError, Result};

pub const EVENT_URL: &str = "https://gameinfo.albiononline.com/api/gameinfo/events";
pub const PRICE_URL: &str = "https://old.west.albion-online-data.com/api/v2/stats/Prices";
pub const ITEM_NAMES_URL: &str =
    "https://raw.githubusercontent.com/ao-data/ao-bin-dumps/master/formatted/items.txt";
pub const PRICE_LOCATIONS: &[&str] = &["Lymhurst", "Thetford", "FortSterling", "Martlock", "Bridgewatch"];

/// Events requested per feed page. One more than the step so adjacent pages overlap.
pub const EVENT_PAGE_LIMIT: u32 = 51;

/// Offset increment between feed pages.
pub const EVENT_PAGE_STEP: u32 = 50;

/// The feed refuses offsets past this value.
pub const EVENT_MAX_OFFSET: u32 = 1000;

/// Floor of the adaptive poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Ceiling of the adaptive poll interval. The feed contract only floors the
/// sleep; this cap is local, so a burst of old events cannot park the loop for hours.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(600);

/// Maximum item codes per market request (URL length limit of the market API).
pub const PRICE_BATCH_SIZE: usize = 249;

/// Share of a victim's build the killer actually loots. Applied on item-level reports only.
pub const ITEM_LOOT_FACTOR: f64 = 0.7;

/// Timeout for every outbound HTTP request.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// How long a loaded item name dump is trusted before it is re-fetched.
pub const NAME_REFRESH_INTERVAL_SECS: u64 = 24 * 3600;

/// Wait after a failed dump fetch before trying again.
pub const NAME_RETRY_INTERVAL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub event_url: String,
    pub price_url: String,
    /// Market locations queried for every price lookup (PRICE_LOCATIONS, comma-separated).
    pub price_locations: Vec<String>,
    /// Cached prices older than this are re-resolved (PRICE_STALE_THRESHOLD_SECS).
    pub price_stale_threshold: Duration,
    /// Events older than this are swept by the janitor (EVENT_STALE_THRESHOLD_SECS).
    pub event_stale_threshold: Duration,
    pub event_cleanup_interval: Duration,
    pub item_names_url: String,
    pub log_level: String,
    /// Append logs to this file instead of stdout (LOG_FILE).
    pub log_file: Option<String>,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "amt.sqlite".to_string(),
            event_url: EVENT_URL.to_string(),
            price_url: PRICE_URL.to_string(),
            price_locations: PRICE_LOCATIONS.iter().map(|s| s.to_string()).collect(),
            price_stale_threshold: Duration::from_secs(7 * 24 * 3600),
            event_stale_threshold: Duration::from_secs(30 * 24 * 3600),
            event_cleanup_interval: Duration::from_secs(3600),
            item_names_url: ITEM_NAMES_URL.to_string(),
            log_level: "info".to_string(),
            log_file: None,
            api_port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            event_url: std::env::var("EVENT_URL").unwrap_or(defaults.event_url),
            price_url: std::env::var("PRICE_URL").unwrap_or(defaults.price_url),
            price_locations: match std::env::var("PRICE_LOCATIONS") {
                Ok(raw) => parse_list(&raw),
                Err(_) => defaults.price_locations,
            },
            price_stale_threshold: secs_var("PRICE_STALE_THRESHOLD_SECS", defaults.price_stale_threshold)?,
            event_stale_threshold: secs_var("EVENT_STALE_THRESHOLD_SECS", defaults.event_stale_threshold)?,
            event_cleanup_interval: secs_var("EVENT_CLEANUP_INTERVAL_SECS", defaults.event_cleanup_interval)?,
            item_names_url: std::env::var("ITEM_NAMES_URL").unwrap_or(defaults.item_names_url),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_file: std::env::var("LOG_FILE").ok().filter(|s| !s.trim().is_empty()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| defaults.api_port.to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
        })
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| AppError::Config(format!("{name} must be a whole number of seconds"))),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
