use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{error, info};

use crate::db::store::EventStore;
use crate::error::Result;

/// Periodically deletes events older than the retention window.
pub struct EventJanitor {
    store: Arc<dyn EventStore>,
    retention: Duration,
    interval: Duration,
}

impl EventJanitor {
    pub fn new(store: Arc<dyn EventStore>, retention: Duration, interval: Duration) -> Self {
        Self { store, retention, interval }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                error!("Event cleanup failed: {e}");
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let threshold = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.store.delete_events_older_than(threshold).await?;
        if deleted > 0 {
            info!(deleted, %threshold, "Stale events removed");
        }
        Ok(deleted)
    }
}
