//! Runtime telemetry sink interface
//!
//! Telemetry is keyed by strategy identifier. A sink that does not know an
//! identifier returns [`TelemetryError::SessionNotFound`], which lets callers
//! walk an ordered list of candidate identifiers until one matches a live
//! session.

use chrono::{DateTime, Utc};
use dom_types::Side;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Telemetry session not found for identifiers {identifiers:?}")]
    SessionNotFound { identifiers: Vec<String> },

    #[error("Telemetry sink error: {message}")]
    Sink { message: String },
}

impl TelemetryError {
    pub fn session_not_found(identifier: impl Into<String>) -> Self {
        Self::SessionNotFound {
            identifiers: vec![identifier.into()],
        }
    }

    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TelemetryLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl TelemetryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryLevel::Debug => "DEBUG",
            TelemetryLevel::Info => "INFO",
            TelemetryLevel::Warn => "WARN",
            TelemetryLevel::Error => "ERROR",
        }
    }
}

/// Presentation hint for operator dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Neutral,
    Positive,
    Warning,
    Negative,
}

/// Structured status message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub message: String,
    pub level: TelemetryLevel,
    pub tone: Tone,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

/// Snapshot arrival record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub timestamp: DateTime<Utc>,
    pub subscription_id: Option<String>,
    pub symbol: String,
}

/// Fire-and-forget telemetry sink
pub trait TelemetrySink: Send + Sync {
    fn start_session(
        &self,
        strategy_id: &str,
        subscription_id: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<(), TelemetryError>;

    fn stop_session(&self, strategy_id: &str, reason: Option<&str>) -> Result<(), TelemetryError>;

    fn record_dom_snapshot(&self, strategy_id: &str, record: &SnapshotRecord) -> Result<(), TelemetryError>;

    fn record_threshold_hit(&self, strategy_id: &str) -> Result<(), TelemetryError>;

    fn record_signal(&self, strategy_id: &str, side: Side) -> Result<(), TelemetryError>;

    fn log_event(&self, strategy_id: &str, event: &TelemetryEvent) -> Result<(), TelemetryError>;

    fn clear_status_cause(&self, strategy_id: &str) -> Result<(), TelemetryError>;
}
