//! Error types for snapshot construction and validation
//!
//! Snapshot errors describe input anomalies. Consumers treat every variant
//! as "drop this snapshot", never as a fatal condition.

use thiserror::Error;

/// Errors raised while decoding or interrogating an order-book snapshot
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    /// Market event payload was not a JSON object
    #[error("Market event must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },

    /// Market event carried a type other than "dom"
    #[error("Unsupported market event type: '{event_type}'")]
    UnsupportedEventType { event_type: String },

    /// No symbol could be resolved from the event or its snapshot
    #[error("Market event has no symbol")]
    MissingSymbol,

    /// Neither the book nor the metadata yields a mid price
    #[error("Snapshot for {symbol} has no usable mid price")]
    MissingMidPrice { symbol: String },

    /// A derived value is NaN or infinite
    #[error("Snapshot field '{field}' is not finite: {value}")]
    NonFinite { field: &'static str, value: f64 },

    /// Book arithmetic exceeded the decimal range
    #[error("Snapshot field '{field}' overflowed")]
    Overflow { field: &'static str },
}

impl SnapshotError {
    pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
        match value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "bool",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        }
    }
}
