//! Signal definitions, the pending-signal queue and outbound event shape

use chrono::{DateTime, SecondsFormat, Utc};
use dom_types::{extract_contract_metadata, Side};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;

/// Pending signals kept before the oldest is evicted
pub const SIGNAL_QUEUE_CAPACITY: usize = 64;

/// Reason tag carried by every signal this engine emits
pub const SIGNAL_REASON: &str = "dom-structure";

/// Below this the floored-off part of a quantity is not worth recording
const FRACTION_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub side: Side,

    /// Whole contracts; fractional sizing is floored away
    pub quantity: u64,

    pub reason: String,

    pub metadata: Map<String, Value>,

    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Build a signal, flooring `quantity` to whole contracts.
    ///
    /// The discarded fraction lands in `metadata.quantity_fractional_discarded`
    /// when it is material.
    pub fn new(side: Side, quantity: f64, reason: impl Into<String>, mut metadata: Map<String, Value>) -> Self {
        let quantity = if quantity.is_finite() { quantity.max(0.0) } else { 0.0 };
        let whole = quantity.floor();
        let fraction = quantity - whole;
        if fraction > FRACTION_EPSILON {
            metadata.insert("quantity_fractional_discarded".into(), json!(fraction));
        }
        Self {
            side,
            quantity: whole as u64,
            reason: reason.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Order payload: metadata flattened at the top level, then the core
    /// fields, with the metadata also nested under `metadata`.
    pub fn to_order(&self) -> Map<String, Value> {
        let mut order = self.metadata.clone();
        order.insert("side".into(), json!(self.side));
        order.insert("quantity".into(), json!(self.quantity));
        order.insert("reason".into(), json!(self.reason));
        order.insert("metadata".into(), Value::Object(self.metadata.clone()));
        order
    }
}

/// Bounded FIFO of signals awaiting `generate_orders`
#[derive(Debug, Clone)]
pub struct SignalQueue {
    signals: VecDeque<Signal>,
    capacity: usize,
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::with_capacity(SIGNAL_QUEUE_CAPACITY)
    }
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            signals: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest signal when full
    pub fn push(&mut self, signal: Signal) -> Option<Signal> {
        let evicted = if self.signals.len() >= self.capacity {
            self.signals.pop_front()
        } else {
            None
        };
        self.signals.push_back(signal);
        evicted
    }

    pub fn drain(&mut self) -> Vec<Signal> {
        self.signals.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }
}

/// Event handed to the dispatcher for one emitted signal
pub fn build_signal_event(signal: &Signal) -> Value {
    let mut event = Map::new();
    event.insert("stream".into(), json!("dom"));
    event.insert("data_stream".into(), json!("dom"));
    event.insert("type".into(), json!("dom_structure_signal"));
    event.insert("side".into(), json!(signal.side));
    event.insert("quantity".into(), json!(signal.quantity));
    event.insert("reason".into(), json!(signal.reason));
    event.insert(
        "timestamp".into(),
        json!(signal.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    event.insert("metadata".into(), Value::Object(signal.metadata.clone()));
    for (key, value) in extract_contract_metadata(&[&signal.metadata]) {
        event.entry(key).or_insert(value);
    }
    Value::Object(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata() -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("zone".into(), json!("support"));
        metadata.insert("symbol".into(), json!("ES"));
        metadata.insert("subscription_id".into(), json!("ES-DOM"));
        metadata
    }

    #[test]
    fn test_quantity_is_floored_and_fraction_recorded() {
        let signal = Signal::new(Side::Buy, 2.75, SIGNAL_REASON, metadata());
        assert_eq!(signal.quantity, 2);
        assert_eq!(signal.metadata["quantity_fractional_discarded"], json!(0.75));

        let whole = Signal::new(Side::Sell, 3.0, SIGNAL_REASON, metadata());
        assert_eq!(whole.quantity, 3);
        assert!(!whole.metadata.contains_key("quantity_fractional_discarded"));
    }

    #[test]
    fn test_order_flattens_metadata() {
        let order = Signal::new(Side::Buy, 1.0, SIGNAL_REASON, metadata()).to_order();
        assert_eq!(order["side"], json!("BUY"));
        assert_eq!(order["quantity"], json!(1));
        assert_eq!(order["zone"], json!("support"));
        assert_eq!(order["metadata"]["zone"], json!("support"));
        assert_eq!(order["reason"], json!("dom-structure"));
    }

    #[test]
    fn test_queue_evicts_oldest() {
        let mut queue = SignalQueue::with_capacity(2);
        for quantity in 1..=3 {
            queue.push(Signal::new(Side::Buy, quantity as f64, SIGNAL_REASON, Map::new()));
        }
        let drained = queue.drain();
        assert_eq!(drained.iter().map(|s| s.quantity).collect::<Vec<_>>(), vec![2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_signal_event_shape() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let signal = Signal::new(Side::Sell, 1.0, SIGNAL_REASON, metadata()).at(timestamp);
        let event = build_signal_event(&signal);
        assert_eq!(event["type"], json!("dom_structure_signal"));
        assert_eq!(event["stream"], json!("dom"));
        assert_eq!(event["side"], json!("SELL"));
        assert_eq!(event["timestamp"], json!("2024-03-01T14:30:00.000000Z"));
        assert_eq!(event["subscription_id"], json!("ES-DOM"));
        assert_eq!(event["symbol"], json!("ES"));
    }
}
