use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::HTTP_TIMEOUT_SECS;
use crate::error::{AppError, Result};

/// One location's quote for one item, as returned by the market API. The
/// payload's other fields (city, quality, buy side) are not needed.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketQuote {
    pub item_id: String,
    /// 0 when the location has no sell order.
    #[serde(default)]
    pub sell_price_min: f64,
}

/// Remote market data, queried for a batch of item codes at one quality.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_quotes(&self, codes: &[String], quality: u8) -> Result<Vec<MarketQuote>>;
}

/// `GET <price_url>/<codes>.json?locations=<csv>&qualities=<q>`
pub struct HttpMarket {
    client: reqwest::Client,
    price_url: String,
    locations: Vec<String>,
}

impl HttpMarket {
    pub fn new(price_url: impl Into<String>, locations: Vec<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, price_url: price_url.into(), locations })
    }

    fn batch_url(&self, codes: &[String], quality: u8) -> String {
        format!(
            "{}/{}.json?locations={}&qualities={}",
            self.price_url.trim_end_matches('/'),
            codes.join(","),
            self.locations.join(","),
            quality
        )
    }
}

#[async_trait]
impl MarketSource for HttpMarket {
    async fn fetch_quotes(&self, codes: &[String], quality: u8) -> Result<Vec<MarketQuote>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.batch_url(codes, quality);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Status { url, status: status.as_u16() });
        }
        let quotes: Vec<MarketQuote> = resp.json().await?;
        debug!(codes = codes.len(), quality, quotes = quotes.len(), "Market batch fetched");
        Ok(quotes)
    }
}

/// Listed sell prices grouped by item code. Locations without a listing are dropped.
pub fn listed_prices(quotes: &[MarketQuote]) -> HashMap<&str, Vec<f64>> {
    let mut by_item: HashMap<&str, Vec<f64>> = HashMap::new();
    for quote in quotes {
        if quote.sell_price_min > 0.0 {
            by_item.entry(quote.item_id.as_str()).or_default().push(quote.sell_price_min);
        }
    }
    by_item
}

/// Median; the mean of the two middle values for an even count, 0 for no values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
