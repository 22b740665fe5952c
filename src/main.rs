use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures_util::StreamExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bitfinex_hist::{AppError, Config, Result, TradesClient};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: bfx-hist <symbol|pair> <start> <end>");
        eprintln!("  e.g. bfx-hist BTC-USD 2021-01-01 2021-01-02");
        eprintln!("  e.g. bfx-hist fUSD 2021-01-01T00:00:00Z 2021-01-01T06:00:00Z");
        std::process::exit(2);
    }

    if let Err(e) = run(cfg, &args[1], &args[2], &args[3]).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, symbol: &str, start: &str, end: &str) -> Result<()> {
    let start = parse_time(start)?;
    let end = parse_time(end)?;

    let client = TradesClient::new(&cfg)?;
    let mut pages = Box::pin(client.trades(symbol, Some(start), Some(end)));

    let mut page_count = 0usize;
    let mut trade_count = 0usize;
    while let Some(page) = pages.next().await {
        let page = page?;
        page_count += 1;
        trade_count += page.len();
        for trade in &page {
            println!("{}", serde_json::to_string(trade)?);
        }
    }

    info!(
        "Fetched {} trades across {} pages for {} in [{}, {})",
        trade_count, page_count, symbol, start, end
    );
    Ok(())
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
fn parse_time(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    Err(AppError::Config(format!(
        "unrecognized time '{input}', expected RFC 3339 or YYYY-MM-DD"
    )))
}
