use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::symbol::is_funding;

/// Feed identifier stamped on every normalized trade.
pub const FEED: &str = "BITFINEX";

// ---------------------------------------------------------------------------
// Raw wire records
// ---------------------------------------------------------------------------

/// One element of the `/v2/trades/{symbol}/hist` response array.
///
/// The exchange returns trades as positional arrays of mixed types:
/// `[id, timestamp_ms, amount, price]` for spot symbols, with a fifth
/// `period` element (loan days, 2-30) for funding symbols. Parsed with a
/// sequence visitor; elements past the fifth are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTradeRecord {
    pub id: i64,
    pub timestamp_ms: i64,
    pub amount: f64,
    pub price: f64,
    pub period: Option<u32>,
}

impl<'de> Deserialize<'de> for RawTradeRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        struct RawTradeVisitor;

        impl<'de> serde::de::Visitor<'de> for RawTradeVisitor {
            type Value = RawTradeRecord;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a trade array [id, timestamp_ms, amount, price(, period)]")
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                use serde::de::Error;

                let id = seq
                    .next_element::<i64>()?
                    .ok_or_else(|| A::Error::invalid_length(0, &self))?;
                let timestamp_ms = seq
                    .next_element::<i64>()?
                    .ok_or_else(|| A::Error::invalid_length(1, &self))?;
                let amount = seq
                    .next_element::<f64>()?
                    .ok_or_else(|| A::Error::invalid_length(2, &self))?;
                let price = seq
                    .next_element::<f64>()?
                    .ok_or_else(|| A::Error::invalid_length(3, &self))?;
                let period = seq.next_element::<u32>()?;

                while seq.next_element::<serde::de::IgnoredAny>()?.is_some() {}

                Ok(RawTradeRecord {
                    id,
                    timestamp_ms,
                    amount,
                    price,
                    period,
                })
            }
        }

        deserializer.deserialize_seq(RawTradeVisitor)
    }
}

/// A raw trade classified by its symbol rather than by field count, so a
/// shape mismatch between symbol class and record surfaces as an error
/// instead of silently mis-parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTrade {
    Spot {
        id: i64,
        timestamp_ms: i64,
        amount: f64,
        price: f64,
    },
    Funding {
        id: i64,
        timestamp_ms: i64,
        amount: f64,
        price: f64,
        period: u32,
    },
}

impl RawTrade {
    /// Classify a wire record under the given exchange-native symbol.
    /// Funding symbols require the fifth `period` field; spot symbols
    /// require its absence.
    pub fn classify(symbol: &str, record: RawTradeRecord) -> Result<Self> {
        match (is_funding(symbol), record.period) {
            (true, Some(period)) => Ok(RawTrade::Funding {
                id: record.id,
                timestamp_ms: record.timestamp_ms,
                amount: record.amount,
                price: record.price,
                period,
            }),
            (true, None) => Err(AppError::TradeShape {
                symbol: symbol.to_string(),
                fields: 4,
                expected: 5,
            }),
            (false, None) => Ok(RawTrade::Spot {
                id: record.id,
                timestamp_ms: record.timestamp_ms,
                amount: record.amount,
                price: record.price,
            }),
            (false, Some(_)) => Err(AppError::TradeShape {
                symbol: symbol.to_string(),
                fields: 5,
                expected: 4,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Canonical trade record emitted to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: String,
    pub pair: String,
    pub id: i64,
    pub feed: String,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
}

impl Trade {
    /// Normalize a classified raw trade for the queried pair. Pure; the only
    /// failure mode is a millisecond timestamp outside chrono's range.
    pub fn from_raw(pair: &str, raw: &RawTrade, use_local_time: bool) -> Result<Trade> {
        let (id, timestamp_ms, amount, price, period) = match *raw {
            RawTrade::Spot {
                id,
                timestamp_ms,
                amount,
                price,
            } => (id, timestamp_ms, amount, price, None),
            RawTrade::Funding {
                id,
                timestamp_ms,
                amount,
                price,
                period,
            } => (id, timestamp_ms, amount, price, Some(period)),
        };

        let side = if amount >= 0.0 { Side::Buy } else { Side::Sell };

        Ok(Trade {
            timestamp: format_timestamp(timestamp_ms, use_local_time)?,
            pair: pair.to_string(),
            id,
            feed: FEED.to_string(),
            side,
            amount: amount.abs(),
            price,
            period,
        })
    }
}

/// Render an epoch-millisecond timestamp with microsecond precision.
///
/// The trailing `Z` is kept on the local-clock rendering as well: historical
/// consumers of this feed expect it even though local times are not UTC.
fn format_timestamp(timestamp_ms: i64, use_local_time: bool) -> Result<String> {
    let utc: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp_ms)
        .ok_or(AppError::InvalidTimestamp(timestamp_ms))?;

    let rendered = if use_local_time {
        Local
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .ok_or(AppError::InvalidTimestamp(timestamp_ms))?
            .format("%Y-%m-%d %H:%M:%S%.6fZ")
            .to_string()
    } else {
        utc.format("%Y-%m-%d %H:%M:%S%.6fZ").to_string()
    };

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_spot_trade_array() {
        let raw: RawTradeRecord = serde_json::from_str("[42, 1609459200000, -1.5, 30000.0]").unwrap();
        assert_eq!(
            raw,
            RawTradeRecord {
                id: 42,
                timestamp_ms: 1609459200000,
                amount: -1.5,
                price: 30000.0,
                period: None,
            }
        );
    }

    #[test]
    fn deserializes_funding_trade_array() {
        let raw: RawTradeRecord = serde_json::from_str("[7, 1609459200000, 100.0, 0.0002, 5]").unwrap();
        assert_eq!(raw.period, Some(5));
    }

    #[test]
    fn classify_rejects_shape_mismatch() {
        let spot = RawTradeRecord {
            id: 1,
            timestamp_ms: 0,
            amount: 1.0,
            price: 1.0,
            period: None,
        };
        let funding = RawTradeRecord {
            period: Some(5),
            ..spot.clone()
        };

        assert!(RawTrade::classify("tBTCUSD", spot.clone()).is_ok());
        assert!(RawTrade::classify("fUSD", funding.clone()).is_ok());
        assert!(matches!(
            RawTrade::classify("fUSD", spot),
            Err(AppError::TradeShape { expected: 5, .. })
        ));
        assert!(matches!(
            RawTrade::classify("tBTCUSD", funding),
            Err(AppError::TradeShape { expected: 4, .. })
        ));
    }

    #[test]
    fn normalizes_spot_sell() {
        let raw = RawTrade::classify(
            "BTCUSD",
            RawTradeRecord {
                id: 42,
                timestamp_ms: 1609459200000,
                amount: -1.5,
                price: 30000.0,
                period: None,
            },
        )
        .unwrap();

        let trade = Trade::from_raw("BTCUSD", &raw, false).unwrap();
        assert_eq!(trade.id, 42);
        assert_eq!(trade.pair, "BTCUSD");
        assert_eq!(trade.feed, "BITFINEX");
        assert_eq!(trade.side, Side::Sell);
        assert!((trade.amount - 1.5).abs() < 1e-12);
        assert!((trade.price - 30000.0).abs() < 1e-12);
        assert_eq!(trade.timestamp, "2021-01-01 00:00:00.000000Z");
        assert_eq!(trade.period, None);
    }

    #[test]
    fn normalizes_funding_buy_with_period() {
        let raw = RawTrade::classify(
            "fUSD",
            RawTradeRecord {
                id: 7,
                timestamp_ms: 1609459200000,
                amount: 100.0,
                price: 0.0002,
                period: Some(5),
            },
        )
        .unwrap();

        let trade = Trade::from_raw("fUSD", &raw, false).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.period, Some(5));
        assert!((trade.amount - 100.0).abs() < 1e-12);
    }

    #[test]
    fn zero_amount_is_buy() {
        let raw = RawTrade::Spot {
            id: 1,
            timestamp_ms: 1609459200000,
            amount: 0.0,
            price: 1.0,
        };
        let trade = Trade::from_raw("tBTCUSD", &raw, false).unwrap();
        assert_eq!(trade.side, Side::Buy);
    }

    #[test]
    fn period_omitted_from_spot_json() {
        let raw = RawTrade::Spot {
            id: 1,
            timestamp_ms: 1609459200000,
            amount: 1.0,
            price: 2.0,
        };
        let json = serde_json::to_string(&Trade::from_raw("tBTCUSD", &raw, false).unwrap()).unwrap();
        assert!(!json.contains("period"));
        assert!(json.contains("\"side\":\"Buy\""));
    }

    #[test]
    fn microsecond_precision_survives() {
        let raw = RawTrade::Spot {
            id: 1,
            timestamp_ms: 1609459200123,
            amount: 1.0,
            price: 2.0,
        };
        let trade = Trade::from_raw("tBTCUSD", &raw, false).unwrap();
        assert_eq!(trade.timestamp, "2021-01-01 00:00:00.123000Z");
    }
}
