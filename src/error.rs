use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

/// Malformed `T<tier>_<NAME>[@<enchant>]` item code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemCodeError {
    #[error("item code {0:?} is too short")]
    TooShort(String),

    #[error("item code {0:?} does not start with a T<tier>_ prefix")]
    MissingTier(String),

    #[error("item code {code:?} has tier {tier} outside 1..=8")]
    TierOutOfRange { code: String, tier: u8 },

    #[error("item code {0:?} has an invalid enchantment suffix")]
    BadEnchantment(String),

    #[error("item code {0:?} has an empty name")]
    EmptyName(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Item code error: {0}")]
    ItemCode(#[from] ItemCodeError),

    #[error("Feed payload error: {0}")]
    Feed(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Price resolution incomplete: {unresolved} item(s) unresolved, {failed_batches} batch(es) failed")]
    Unresolved { unresolved: usize, failed_batches: usize },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Transport faults abort only the page or batch they happened in.
    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Http(_) | AppError::Status { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            e if e.is_transport() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
