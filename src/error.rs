use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("exchange API error (HTTP {status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("gave up after {attempts} request timeouts")]
    Timeout { attempts: u32 },

    #[error("pagination cursor stalled at {cursor_ms}ms: a full page advanced the window by zero")]
    CursorStalled { cursor_ms: i64 },

    #[error("trade for {symbol} has {fields} fields, expected {expected}")]
    TradeShape {
        symbol: String,
        fields: usize,
        expected: usize,
    },

    #[error("timestamp {0}ms is out of range")]
    InvalidTimestamp(i64),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
