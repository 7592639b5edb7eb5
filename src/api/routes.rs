use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::store::{EventStore, PriceCache};
use crate::error::AppError;
use crate::ingest::IngestStatus;
use crate::stats::report::to_csv;
use crate::stats::ReportBuilder;
use crate::types::SlotFilter;

#[derive(Clone)]
pub struct ApiState {
    pub reports: Arc<ReportBuilder>,
    pub events: Arc<dyn EventStore>,
    pub prices: Arc<dyn PriceCache>,
    pub status: Arc<IngestStatus>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/itemReport", get(get_item_report))
        .route("/buildReport", get(get_build_report))
        .route("/stats", get(get_stats))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    /// Comma-separated slot names; the economic slots when absent.
    pub slots: Option<String>,
    /// `csv` (default) or `json`.
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv,
    Json,
}

impl ReportQuery {
    fn filter(&self) -> Result<SlotFilter, AppError> {
        match self.slots.as_deref() {
            None => Ok(SlotFilter::economic()),
            Some(raw) => SlotFilter::parse(raw).map_err(AppError::BadRequest),
        }
    }

    fn format(&self) -> Result<Format, AppError> {
        match self.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("csv") => Ok(Format::Csv),
            Some("json") => Ok(Format::Json),
            Some(other) => Err(AppError::BadRequest(format!("unknown format {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub num_events: i64,
    pub num_prices: i64,
    pub sleep_time_secs: u64,
    pub ingestion_cycles: u64,
    pub last_cycle_inserted: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_item_report(
    State(state): State<ApiState>,
    Query(params): Query<ReportQuery>,
) -> Result<Response, AppError> {
    let (filter, format) = (params.filter()?, params.format()?);
    let rows = state.reports.build_item_report(&filter).await?;
    render(&rows, format)
}

async fn get_build_report(
    State(state): State<ApiState>,
    Query(params): Query<ReportQuery>,
) -> Result<Response, AppError> {
    let (filter, format) = (params.filter()?, params.format()?);
    let rows = state.reports.build_build_report(&filter).await?;
    render(&rows, format)
}

async fn get_stats(State(state): State<ApiState>) -> Result<Json<StatsResponse>, AppError> {
    Ok(Json(StatsResponse {
        num_events: state.events.event_count().await?,
        num_prices: state.prices.price_count().await?,
        sleep_time_secs: state.status.sleep_secs(),
        ingestion_cycles: state.status.cycles(),
        last_cycle_inserted: state.status.last_inserted(),
    }))
}

fn render<T: Serialize>(rows: &[T], format: Format) -> Result<Response, AppError> {
    Ok(match format {
        Format::Json => Json(rows).into_response(),
        Format::Csv => ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], to_csv(rows)?).into_response(),
    })
}
