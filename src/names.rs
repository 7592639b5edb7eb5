use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{HTTP_TIMEOUT_SECS, NAME_REFRESH_INTERVAL_SECS, NAME_RETRY_INTERVAL_SECS};
use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// NameCache
// ---------------------------------------------------------------------------

/// Human-readable item names, loaded lazily from the static item dump.
///
/// Dump lines look like `  1203: T4_MAIN_SWORD      : Adept's Broadsword`.
/// Two views are kept: by full code (`T4_MAIN_SWORD` -> `Adept's Broadsword`) and
/// by bare name with the tier adjective dropped (`MAIN_SWORD` -> `Broadsword`).
/// Lookups never fail; an unknown key is returned as-is.
pub struct NameCache {
    /// `None` for an offline cache fed only through `load_dump`.
    source: Option<(reqwest::Client, String)>,
    by_code: DashMap<String, String>,
    by_name: DashMap<String, String>,
    last_attempt: Mutex<Option<Attempt>>,
    refresh_interval: Duration,
    retry_interval: Duration,
}

/// When the dump was last fetched and whether that fetch worked.
#[derive(Debug, Clone, Copy)]
struct Attempt {
    at: Instant,
    ok: bool,
}

impl Attempt {
    /// A good dump is kept for `refresh`; a failed fetch is retried after `retry`.
    fn is_due(last: Option<Attempt>, now: Instant, refresh: Duration, retry: Duration) -> bool {
        match last {
            None => true,
            Some(attempt) => {
                let wait = if attempt.ok { refresh } else { retry };
                now.saturating_duration_since(attempt.at) >= wait
            }
        }
    }
}

impl NameCache {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_source(Some((client, url.into()))))
    }

    pub fn offline() -> Self {
        Self::with_source(None)
    }

    fn with_source(source: Option<(reqwest::Client, String)>) -> Self {
        Self {
            source,
            by_code: DashMap::new(),
            by_name: DashMap::new(),
            last_attempt: Mutex::new(None),
            refresh_interval: Duration::from_secs(NAME_REFRESH_INTERVAL_SECS),
            retry_interval: Duration::from_secs(NAME_RETRY_INTERVAL_SECS),
        }
    }

    /// Fetches the dump if it was never loaded or has expired. A failed fetch
    /// keeps whatever was loaded before and is not repeated until the retry
    /// interval has passed, so a dead host costs one timeout per interval.
    pub async fn ensure_loaded(&self) {
        let Some((client, url)) = &self.source else { return };
        let mut last_attempt = self.last_attempt.lock().await;
        if !Attempt::is_due(*last_attempt, Instant::now(), self.refresh_interval, self.retry_interval) {
            return;
        }
        let ok = match fetch_dump(client, url).await {
            Ok(text) => {
                let count = self.load_dump(&text);
                info!(count, total = self.len(), "Item names loaded");
                true
            }
            Err(e) => {
                warn!(retry_secs = self.retry_interval.as_secs(), "Item name dump unavailable, falling back to codes: {e}");
                false
            }
        };
        *last_attempt = Some(Attempt { at: Instant::now(), ok });
    }

    /// Parses a dump and merges it in. Returns the number of named codes.
    pub fn load_dump(&self, text: &str) -> usize {
        let mut count = 0;
        for (code, display) in text.lines().filter_map(parse_line) {
            if let Some(name) = bare_name(code) {
                self.by_name
                    .entry(name.to_string())
                    .or_insert_with(|| strip_tier_adjective(display).to_string());
            }
            self.by_code.insert(code.to_string(), display.to_string());
            count += 1;
        }
        count
    }

    pub fn code_name(&self, code: &str) -> String {
        self.by_code
            .get(code)
            .map(|n| n.value().clone())
            .unwrap_or_else(|| code.to_string())
    }

    pub fn bare_name(&self, name: &str) -> String {
        self.by_name
            .get(name)
            .map(|n| n.value().clone())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }
}

async fn fetch_dump(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::Status { url: url.to_string(), status: status.as_u16() });
    }
    Ok(resp.text().await?)
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.splitn(3, ':').map(str::trim);
    let _index = parts.next()?;
    let code = parts.next().filter(|c| !c.is_empty())?;
    let display = parts.next().filter(|d| !d.is_empty())?;
    Some((code, display))
}

/// `T4_MAIN_SWORD@2` -> `MAIN_SWORD`. Codes without a tier prefix have no bare name.
fn bare_name(code: &str) -> Option<&str> {
    let bytes = code.as_bytes();
    if bytes.len() < 4 || bytes[0] != b'T' || !bytes[1].is_ascii_digit() || bytes[2] != b'_' {
        return None;
    }
    let rest = &code[3..];
    Some(rest.split_once('@').map_or(rest, |(name, _)| name))
}

/// `Adept's Broadsword` -> `Broadsword`.
fn strip_tier_adjective(display: &str) -> &str {
    display.split_once("'s ").map_or(display, |(_, rest)| rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
    0: UNIQUE_HIDEOUT                                    : Hideout Construction Kit
 1203: T4_MAIN_SWORD                                     : Adept's Broadsword
 1204: T5_MAIN_SWORD                                     : Expert's Broadsword
 1205: T5_MAIN_SWORD@1                                   : Expert's Broadsword
 2001: T4_NONAME
garbage line
";

    fn cache() -> NameCache {
        NameCache::offline()
    }

    #[test]
    fn loads_codes_and_bare_names() {
        let names = cache();
        assert_eq!(names.load_dump(DUMP), 4);
        assert_eq!(names.code_name("T4_MAIN_SWORD"), "Adept's Broadsword");
        assert_eq!(names.code_name("T5_MAIN_SWORD@1"), "Expert's Broadsword");
        assert_eq!(names.bare_name("MAIN_SWORD"), "Broadsword");
        assert_eq!(names.code_name("UNIQUE_HIDEOUT"), "Hideout Construction Kit");
    }

    #[test]
    fn unknown_keys_fall_back_to_themselves() {
        let names = cache();
        names.load_dump(DUMP);
        assert_eq!(names.code_name("T4_NONAME"), "T4_NONAME");
        assert_eq!(names.bare_name("2H_BOW"), "2H_BOW");
        assert_eq!(cache().code_name("T4_MAIN_SWORD"), "T4_MAIN_SWORD");
    }

    #[test]
    fn bare_name_strips_tier_and_enchantment() {
        assert_eq!(bare_name("T6_HEAD_PLATE_SET1@3"), Some("HEAD_PLATE_SET1"));
        assert_eq!(bare_name("UNIQUE_HIDEOUT"), None);
    }

    #[tokio::test]
    async fn offline_cache_never_fetches() {
        let names = cache();
        names.ensure_loaded().await;
        assert_eq!(names.len(), 0);
    }

    #[test]
    fn failed_fetch_backs_off_before_retrying() {
        let refresh = Duration::from_secs(NAME_REFRESH_INTERVAL_SECS);
        let retry = Duration::from_secs(NAME_RETRY_INTERVAL_SECS);
        let start = Instant::now();
        let failed = Some(Attempt { at: start, ok: false });

        assert!(!Attempt::is_due(failed, start, refresh, retry));
        assert!(!Attempt::is_due(failed, start + retry / 2, refresh, retry));
        assert!(Attempt::is_due(failed, start + retry, refresh, retry));
    }

    #[test]
    fn loaded_dump_is_kept_until_refresh() {
        let refresh = Duration::from_secs(NAME_REFRESH_INTERVAL_SECS);
        let retry = Duration::from_secs(NAME_RETRY_INTERVAL_SECS);
        let start = Instant::now();
        let loaded = Some(Attempt { at: start, ok: true });

        assert!(Attempt::is_due(None, start, refresh, retry));
        assert!(!Attempt::is_due(loaded, start + retry, refresh, retry));
        assert!(Attempt::is_due(loaded, start + refresh, refresh, retry));
    }
}
