use crate::error::{AppError, Result};

pub const API_URL: &str = "https://api.bitfinex.com";

/// Maximum trades per `/v2/trades/{symbol}/hist` request. A response shorter
/// than this signals the end of the requested window.
pub const REQUEST_LIMIT: u32 = 1000;

/// Seconds to wait after a 429 whose `Retry-After` header is missing or
/// unparsable.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Per-request timeout for the underlying HTTP client (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub log_level: String,
    /// Page size requested from the trades endpoint (BFX_REQUEST_LIMIT)
    pub request_limit: u32,
    /// Timed-out requests are re-issued up to this many times; `None` retries
    /// forever (BFX_MAX_TIMEOUT_RETRIES, empty/unset = unbounded)
    pub max_timeout_retries: Option<u32>,
    /// Render normalized timestamps with the local clock instead of UTC
    /// (BFX_USE_LOCAL_TIME)
    pub use_local_time: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A zero limit would make every page count as full and disable the
        // short-page termination rule, so it is rejected up front.
        let request_limit = std::env::var("BFX_REQUEST_LIMIT")
            .unwrap_or_else(|_| REQUEST_LIMIT.to_string())
            .parse::<u32>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| {
                AppError::Config("BFX_REQUEST_LIMIT must be a positive integer".to_string())
            })?;

        Ok(Self {
            api_url: std::env::var("BFX_API_URL").unwrap_or_else(|_| API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            request_limit,
            max_timeout_retries: match std::env::var("BFX_MAX_TIMEOUT_RETRIES") {
                Ok(v) if !v.trim().is_empty() => Some(v.parse::<u32>().map_err(|_| {
                    AppError::Config("BFX_MAX_TIMEOUT_RETRIES must be an integer".to_string())
                })?),
                _ => None,
            },
            use_local_time: std::env::var("BFX_USE_LOCAL_TIME")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: API_URL.to_string(),
            log_level: "info".to_string(),
            request_limit: REQUEST_LIMIT,
            max_timeout_retries: None,
            use_local_time: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No other test touches this env var, so no cross-test interference.
    #[test]
    fn zero_request_limit_is_rejected() {
        std::env::set_var("BFX_REQUEST_LIMIT", "0");
        let result = Config::from_env();
        std::env::remove_var("BFX_REQUEST_LIMIT");

        match result {
            Err(AppError::Config(msg)) => assert!(msg.contains("BFX_REQUEST_LIMIT")),
            other => panic!("expected Config error for zero limit, got {other:?}"),
        }
    }
}
