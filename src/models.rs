//! Wire models for the market-data feed.
//!
//! Structures deserialized from the Binance futures WebSocket with serde;
//! field names are mapped to the exchange payload via `rename`. Raw payloads
//! are converted into validated [`Tick`] values before they reach the
//! aggregation core.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickError {
    #[error("unparseable price '{0}'")]
    BadPrice(String),

    #[error("prices must be positive: bid={bid}, ask={ask}")]
    NonPositivePrice { bid: f64, ask: f64 },

    #[error("ask {ask} must be greater than bid {bid}")]
    CrossedBook { bid: f64, ask: f64 },

    #[error("invalid event time {0}")]
    BadTimestamp(i64),
}

/// Envelope of the combined-stream endpoint
/// (`/stream?streams=btcusdt@bookTicker/...`).
#[derive(Debug, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    pub data: BookTicker,
}

/// Best bid/ask update (`bookTicker`).
///
/// Prices arrive as strings and are parsed to f64 during validation.
#[derive(Debug, Deserialize)]
pub struct BookTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "b")]
    pub bid: String,
    #[serde(rename = "a")]
    pub ask: String,
}

impl BookTicker {
    /// Validates and converts the raw payload into a [`Tick`].
    pub fn to_tick(&self) -> Result<Tick, TickError> {
        let bid: f64 = self
            .bid
            .parse()
            .map_err(|_| TickError::BadPrice(self.bid.clone()))?;
        let ask: f64 = self
            .ask
            .parse()
            .map_err(|_| TickError::BadPrice(self.ask.clone()))?;

        // NaN and infinity parse as valid f64 but would poison every
        // downstream min/max and score.
        if !bid.is_finite() {
            return Err(TickError::BadPrice(self.bid.clone()));
        }
        if !ask.is_finite() {
            return Err(TickError::BadPrice(self.ask.clone()));
        }
        if bid <= 0.0 || ask <= 0.0 {
            return Err(TickError::NonPositivePrice { bid, ask });
        }
        if ask <= bid {
            return Err(TickError::CrossedBook { bid, ask });
        }

        let time = DateTime::from_timestamp_millis(self.event_time)
            .ok_or(TickError::BadTimestamp(self.event_time))?;

        Ok(Tick { time, bid, ask })
    }
}

/// One validated market sample: positive bid/ask with `ask > bid`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
}

impl Tick {
    /// Mid-price, the value fed to every aggregator.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bid: &str, ask: &str) -> BookTicker {
        BookTicker {
            symbol: "EURUSD".to_string(),
            event_time: 1_700_000_000_000,
            bid: bid.to_string(),
            ask: ask.to_string(),
        }
    }

    #[test]
    fn valid_payload_converts() {
        let tick = raw("1.1000", "1.1002").to_tick().unwrap();
        assert_eq!(tick.bid, 1.1);
        assert_eq!(tick.ask, 1.1002);
        assert!((tick.mid() - 1.1001).abs() < 1e-12);
    }

    #[test]
    fn crossed_or_flat_book_rejected() {
        assert!(matches!(
            raw("1.1002", "1.1000").to_tick(),
            Err(TickError::CrossedBook { .. })
        ));
        assert!(matches!(
            raw("1.1000", "1.1000").to_tick(),
            Err(TickError::CrossedBook { .. })
        ));
    }

    #[test]
    fn non_positive_prices_rejected() {
        assert!(matches!(
            raw("0", "1.0").to_tick(),
            Err(TickError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn non_finite_prices_rejected() {
        for (bid, ask) in [
            ("NaN", "1.0"),
            ("1.0", "NaN"),
            ("inf", "1.0"),
            ("1.0", "inf"),
            ("-inf", "1.0"),
        ] {
            assert!(
                matches!(raw(bid, ask).to_tick(), Err(TickError::BadPrice(_))),
                "bid={bid} ask={ask}"
            );
        }
    }

    #[test]
    fn garbage_price_rejected() {
        assert!(matches!(
            raw("abc", "1.0").to_tick(),
            Err(TickError::BadPrice(_))
        ));
    }

    #[test]
    fn envelope_deserializes() {
        let json = r#"{"stream":"btcusdt@bookTicker","data":{"e":"bookTicker","u":400900217,"E":1568014460893,"T":1568014460891,"s":"BTCUSDT","b":"25.35190000","B":"31.21000000","a":"25.36520000","A":"40.66000000"}}"#;
        let envelope: StreamEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.symbol, "BTCUSDT");
        let tick = envelope.data.to_tick().unwrap();
        assert!(tick.ask > tick.bid);
    }
}
