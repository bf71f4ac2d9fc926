//! # Order-Book Snapshot Model
//!
//! ## Purpose
//!
//! Immutable depth-of-market view handed to strategies once per update:
//! best-first bid and ask levels, the capture timestamp, and an open-ended
//! metadata map. Feeds may attach a `metrics` object to the metadata with
//! precomputed `mid_price`, `spread`, `total_bid_size` and `total_ask_size`,
//! which take precedence over values derived from the levels.
//!
//! ## Integration Points
//!
//! - **Input**: Market events (JSON) via [`DomSnapshot::from_market_event`]
//!   or direct construction from a DOM service
//! - **Output**: Mid price, spread and depth totals for strategy analytics
//!
//! ## Architecture Role
//!
//! ```text
//! Market Event (JSON) ──► DomSnapshot ──► Strategy Engine
//!                            │
//!                            ├─ mid_price()     (book first, then metrics)
//!                            ├─ spread()        (metrics first, then book)
//!                            └─ depth_totals()  (book, metrics override when non-zero)
//! ```

use crate::common::errors::SnapshotError;
use crate::common::numeric::{coerce_f64, is_truthy};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Event keys copied into the snapshot's `metrics` metadata
pub const SNAPSHOT_METRIC_KEYS: [&str; 7] = [
    "mid_price",
    "spread",
    "total_bid_size",
    "total_ask_size",
    "best_bid",
    "best_ask",
    "depth",
];

/// Single price level of the book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl DomLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(0.0)
    }

    pub fn size_f64(&self) -> f64 {
        self.size.to_f64().unwrap_or(0.0)
    }
}

/// Order-book snapshot for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomSnapshot {
    pub symbol: String,
    /// Bid levels, best (highest) first
    pub bids: Vec<DomLevel>,
    /// Ask levels, best (lowest) first
    pub asks: Vec<DomLevel>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DomSnapshot {
    pub fn new(
        symbol: impl Into<String>,
        bids: Vec<DomLevel>,
        asks: Vec<DomLevel>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            bids,
            asks,
            received_at,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn best_bid(&self) -> Option<&DomLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&DomLevel> {
        self.asks.first()
    }

    /// Wall-clock capture time as fractional epoch seconds
    pub fn timestamp_seconds(&self) -> f64 {
        self.received_at.timestamp_micros() as f64 / 1_000_000.0
    }

    /// Precomputed metric attached by the feed under `metadata.metrics`
    pub fn metric(&self, key: &str) -> Option<&Value> {
        match self.metadata.get("metrics") {
            Some(Value::Object(metrics)) => metrics.get(key).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    /// Midpoint of the best levels, falling back to the feed's `mid_price`
    /// metric when either side of the book is empty.
    pub fn mid_price(&self) -> Result<f64, SnapshotError> {
        let mid = match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                let mid = ask
                    .price
                    .checked_sub(bid.price)
                    .and_then(|width| width.checked_div(Decimal::TWO))
                    .and_then(|half| bid.price.checked_add(half))
                    .ok_or(SnapshotError::Overflow { field: "mid_price" })?;
                mid.to_f64()
            }
            _ => self.metric("mid_price").and_then(coerce_f64),
        };
        match mid {
            Some(value) if value.is_finite() => Ok(value),
            Some(value) => Err(SnapshotError::NonFinite {
                field: "mid_price",
                value,
            }),
            None => Err(SnapshotError::MissingMidPrice {
                symbol: self.symbol.clone(),
            }),
        }
    }

    /// Spread from the feed's `spread` metric when present, otherwise
    /// best ask minus best bid. A present but unparseable metric yields
    /// `None` rather than falling through to the book.
    pub fn spread(&self) -> Option<f64> {
        if let Some(value) = self.metric("spread") {
            return coerce_f64(value);
        }
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.price.checked_sub(bid.price).and_then(|spread| spread.to_f64()),
            _ => None,
        }
    }

    /// Total resting size on each side across every level.
    ///
    /// Non-zero `total_bid_size`/`total_ask_size` metrics replace the
    /// level sums. Level sums past the decimal range are an error.
    pub fn depth_totals(&self) -> Result<(f64, f64), SnapshotError> {
        let total_bid = match self.metric_total("total_bid_size") {
            Some(total) => total,
            None => sum_sizes(&self.bids).ok_or(SnapshotError::Overflow { field: "total_bid_size" })?,
        };
        let total_ask = match self.metric_total("total_ask_size") {
            Some(total) => total,
            None => sum_sizes(&self.asks).ok_or(SnapshotError::Overflow { field: "total_ask_size" })?,
        };
        Ok((total_bid, total_ask))
    }

    fn metric_total(&self, key: &str) -> Option<f64> {
        self.metric(key)
            .filter(|value| is_truthy(value))
            .and_then(coerce_f64)
            .filter(|value| *value != 0.0)
    }

    /// Build a snapshot from a JSON market event.
    ///
    /// Accepted shape:
    /// `{type?, symbol?, timestamp?, snapshot: {bids, asks, timestamp?, ...},
    /// mid_price?, spread?, total_bid_size?, total_ask_size?, best_bid?,
    /// best_ask?, depth?}`
    ///
    /// The timestamp may be an RFC 3339 string (with `Z` or an offset), a
    /// naive ISO string (read as UTC), or epoch seconds; anything else means
    /// "now". Non-object level entries are skipped and unparseable prices or
    /// sizes become zero.
    pub fn from_market_event(event: &Value, default_symbol: &str) -> Result<Self, SnapshotError> {
        let event = event.as_object().ok_or(SnapshotError::NotAnObject {
            kind: SnapshotError::kind_of(event),
        })?;

        match event.get("type") {
            None | Some(Value::Null) => {}
            Some(Value::String(kind)) if kind == "dom" => {}
            Some(other) => {
                return Err(SnapshotError::UnsupportedEventType {
                    event_type: other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string()),
                })
            }
        }

        let empty = Map::new();
        let snapshot = match event.get("snapshot") {
            Some(Value::Object(snapshot)) => snapshot,
            _ => &empty,
        };

        let symbol = [event.get("symbol"), snapshot.get("symbol")]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_uppercase())
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| default_symbol.trim().to_uppercase());
        if symbol.is_empty() {
            return Err(SnapshotError::MissingSymbol);
        }

        let bids = parse_levels(snapshot.get("bids"));
        let asks = parse_levels(snapshot.get("asks"));

        let raw_timestamp = event
            .get("timestamp")
            .filter(|value| is_truthy(value))
            .or_else(|| snapshot.get("timestamp"));
        let received_at = raw_timestamp.and_then(parse_timestamp).unwrap_or_else(Utc::now);

        let mut metadata: Map<String, Value> = snapshot
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "bids" | "asks" | "symbol"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let metrics: Map<String, Value> = SNAPSHOT_METRIC_KEYS
            .iter()
            .filter_map(|key| {
                event
                    .get(*key)
                    .filter(|value| !value.is_null())
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect();
        if !metrics.is_empty() {
            let entry = metadata
                .entry("metrics")
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(existing) = entry {
                existing.extend(metrics);
            }
        }

        Ok(Self {
            symbol,
            bids,
            asks,
            received_at,
            metadata,
        })
    }
}

fn sum_sizes(levels: &[DomLevel]) -> Option<f64> {
    let total = levels
        .iter()
        .try_fold(Decimal::ZERO, |total, level| total.checked_add(level.size))?;
    Some(total.to_f64().unwrap_or(0.0))
}

fn parse_levels(raw: Option<&Value>) -> Vec<DomLevel> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|level| {
            DomLevel::new(
                parse_decimal(level.get("price")),
                parse_decimal(level.get("size")),
            )
        })
        .collect()
}

fn parse_decimal(raw: Option<&Value>) -> Decimal {
    match raw {
        Some(Value::Number(number)) => Decimal::from_str(&number.to_string())
            .or_else(|_| Decimal::from_scientific(&number.to_string()))
            .unwrap_or(Decimal::ZERO),
        Some(Value::String(text)) => Decimal::from_str(text.trim()).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(number) => {
            let seconds = number.as_f64()?;
            if !seconds.is_finite() {
                return None;
            }
            let micros = (seconds * 1_000_000.0).round() as i64;
            DateTime::from_timestamp_micros(micros)
        }
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> DomSnapshot {
        DomSnapshot::new(
            "es",
            bids.iter().map(|(p, s)| DomLevel::new(*p, *s)).collect(),
            asks.iter().map(|(p, s)| DomLevel::new(*p, *s)).collect(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn test_mid_price_from_book() {
        let snapshot = book(&[(dec!(100.00), dec!(5))], &[(dec!(100.50), dec!(7))]);
        assert_eq!(snapshot.symbol, "ES");
        assert_eq!(snapshot.mid_price().unwrap(), 100.25);
        assert_eq!(snapshot.spread(), Some(0.5));
    }

    #[test]
    fn test_mid_price_falls_back_to_metrics() {
        let snapshot = book(&[(dec!(100.00), dec!(5))], &[])
            .with_metadata(json!({"metrics": {"mid_price": "101.5"}}).as_object().unwrap().clone());
        assert_eq!(snapshot.mid_price().unwrap(), 101.5);

        let missing = book(&[], &[]);
        assert!(matches!(
            missing.mid_price(),
            Err(SnapshotError::MissingMidPrice { .. })
        ));
    }

    #[test]
    fn test_spread_metric_takes_precedence() {
        let snapshot = book(&[(dec!(100.00), dec!(5))], &[(dec!(100.50), dec!(7))])
            .with_metadata(json!({"metrics": {"spread": 0.25}}).as_object().unwrap().clone());
        assert_eq!(snapshot.spread(), Some(0.25));

        let garbage = book(&[(dec!(100.00), dec!(5))], &[(dec!(100.50), dec!(7))])
            .with_metadata(json!({"metrics": {"spread": "wide"}}).as_object().unwrap().clone());
        assert_eq!(garbage.spread(), None);
    }

    #[test]
    fn test_depth_totals_override_only_when_non_zero() {
        let levels = book(
            &[(dec!(100.00), dec!(5)), (dec!(99.75), dec!(10))],
            &[(dec!(100.25), dec!(4))],
        )
        .with_metadata(
            json!({"metrics": {"total_bid_size": 0, "total_ask_size": "40"}})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert_eq!(levels.depth_totals(), Ok((15.0, 40.0)));
    }

    #[test]
    fn test_book_arithmetic_overflow_is_an_error() {
        let stacked = book(
            &[(dec!(100.00), Decimal::MAX), (dec!(99.75), Decimal::MAX)],
            &[(dec!(100.25), dec!(4))],
        );
        assert_eq!(
            stacked.depth_totals(),
            Err(SnapshotError::Overflow { field: "total_bid_size" })
        );

        // An explicit total sidesteps the level sum
        let overridden = stacked
            .clone()
            .with_metadata(json!({"metrics": {"total_bid_size": 12}}).as_object().unwrap().clone());
        assert_eq!(overridden.depth_totals(), Ok((12.0, 4.0)));

        let wide = book(&[(Decimal::MIN, dec!(1))], &[(Decimal::MAX, dec!(1))]);
        assert_eq!(wide.mid_price(), Err(SnapshotError::Overflow { field: "mid_price" }));
        assert_eq!(wide.spread(), None);
    }

    #[test]
    fn test_oversized_market_event_parses_without_panicking() {
        let event = json!({
            "symbol": "ES",
            "snapshot": {
                "bids": [
                    {"price": "5000.00", "size": "79228162514264337593543950335"},
                    {"price": "4999.75", "size": "79228162514264337593543950335"}
                ],
                "asks": [{"price": "5000.25", "size": 3}]
            }
        });
        let snapshot = DomSnapshot::from_market_event(&event, "").unwrap();
        assert_eq!(snapshot.bids[0].size, Decimal::MAX);
        assert!(snapshot.depth_totals().is_err());
        assert_eq!(snapshot.mid_price().unwrap(), 5000.125);
    }

    #[test]
    fn test_from_market_event() {
        let event = json!({
            "type": "dom",
            "symbol": " es ",
            "timestamp": "2024-03-01T14:30:00Z",
            "mid_price": 5000.125,
            "snapshot": {
                "bids": [{"price": "5000.00", "size": 12}, "junk", {"price": "x", "size": 3}],
                "asks": [{"price": 5000.25, "size": "9"}],
                "exchange": "CME"
            }
        });
        let snapshot = DomSnapshot::from_market_event(&event, "").unwrap();

        assert_eq!(snapshot.symbol, "ES");
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.bids[1].price, Decimal::ZERO);
        assert_eq!(snapshot.asks[0].size, dec!(9));
        assert_eq!(snapshot.received_at.to_rfc3339(), "2024-03-01T14:30:00+00:00");
        assert_eq!(snapshot.metadata["exchange"], json!("CME"));
        assert_eq!(snapshot.metric("mid_price"), Some(&json!(5000.125)));
    }

    #[test]
    fn test_from_market_event_epoch_and_naive_timestamps() {
        let epoch = json!({"symbol": "NQ", "timestamp": 1_700_000_000.5, "snapshot": {}});
        let snapshot = DomSnapshot::from_market_event(&epoch, "").unwrap();
        assert_eq!(snapshot.timestamp_seconds(), 1_700_000_000.5);

        let naive = json!({"symbol": "NQ", "snapshot": {"timestamp": "2024-03-01T14:30:00.250"}});
        let snapshot = DomSnapshot::from_market_event(&naive, "").unwrap();
        assert_eq!(snapshot.received_at.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn test_from_market_event_rejects_other_types() {
        let event = json!({"type": "trade", "symbol": "ES"});
        assert!(matches!(
            DomSnapshot::from_market_event(&event, "ES"),
            Err(SnapshotError::UnsupportedEventType { .. })
        ));
        assert!(matches!(
            DomSnapshot::from_market_event(&json!([1, 2]), "ES"),
            Err(SnapshotError::NotAnObject { kind: "array" })
        ));
        assert_eq!(
            DomSnapshot::from_market_event(&json!({"snapshot": {}}), " "),
            Err(SnapshotError::MissingSymbol)
        );
    }
}
