pub mod auth;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod symbol;
pub mod types;

pub use auth::{ApiCredentials, RequestSigner};
pub use config::Config;
pub use error::{AppError, Result};
pub use fetcher::{RetryPolicy, Sleeper, TokioSleeper, TradesClient};
pub use types::{RawTrade, RawTradeRecord, Side, Trade, FEED};
