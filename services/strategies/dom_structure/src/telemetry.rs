//! # Telemetry Reporter
//!
//! ## Purpose
//!
//! Forwards engine status to the external telemetry sink without ever
//! letting a sink failure reach signal logic. Every status message is
//! logged through `tracing` first; the sink is best effort on top.
//!
//! ## Candidate Fallback
//!
//! A strategy may be registered with the sink under several identifiers
//! (explicit identifiers, subscription, name). Each call walks the
//! ordered candidate list and stops at the first identifier the sink
//! recognises:
//!
//! ```text
//! candidate[0] ──SessionNotFound──► candidate[1] ──SessionNotFound──► ... ──► Err(SessionNotFound{all})
//!      │                                 │
//!      └──Ok──► done                     └──Ok──► done
//!
//! any other sink error ──► logged, returned, remaining candidates skipped
//! ```
//!
//! ## Deduplication
//!
//! Status messages are deduplicated against the last status the sink
//! accepted, so a gate that suppresses every snapshot reports once.
//! Non-deduplicated events reset that memory.

use dom_types::Side;
use serde_json::{Map, Value};
use std::sync::Arc;
use strategy_shared::{SnapshotRecord, TelemetryError, TelemetryEvent, TelemetryLevel, TelemetrySink, Tone};
use tracing::{debug, error, info, warn};

pub const STOP_REASON: &str = "DOM structure strategy stopped";

pub struct TelemetryReporter {
    sink: Option<Arc<dyn TelemetrySink>>,
    strategy_name: String,
    candidates: Vec<String>,
    last_status: Option<String>,
}

impl std::fmt::Debug for TelemetryReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryReporter")
            .field("sink", &self.sink.is_some())
            .field("strategy_name", &self.strategy_name)
            .field("candidates", &self.candidates)
            .field("last_status", &self.last_status)
            .finish()
    }
}

impl TelemetryReporter {
    pub fn new(strategy_name: impl Into<String>, candidates: Vec<String>) -> Self {
        Self {
            sink: None,
            strategy_name: strategy_name.into(),
            candidates,
            last_status: None,
        }
    }

    pub fn set_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn set_candidates(&mut self, candidates: Vec<String>) {
        self.candidates = candidates;
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    /// Run `call` against each candidate until one is accepted.
    ///
    /// Returns the identifier that matched.
    fn for_candidates<F>(&self, action: &str, mut call: F) -> Result<String, TelemetryError>
    where
        F: FnMut(&dyn TelemetrySink, &str) -> Result<(), TelemetryError>,
    {
        let Some(sink) = self.sink.as_deref() else {
            return Err(TelemetryError::sink("no telemetry sink attached"));
        };
        for candidate in &self.candidates {
            match call(sink, candidate) {
                Ok(()) => return Ok(candidate.clone()),
                Err(TelemetryError::SessionNotFound { .. }) => continue,
                Err(err) => {
                    error!("Telemetry sink failed while {}: {}", action, err);
                    return Err(err);
                }
            }
        }
        warn!(
            "Telemetry session not found for identifiers {:?} while {}",
            self.candidates, action
        );
        Err(TelemetryError::SessionNotFound {
            identifiers: self.candidates.clone(),
        })
    }

    pub fn start_session(&self, subscription_id: Option<&str>, symbol: Option<&str>) -> Result<(), TelemetryError> {
        let Some(sink) = self.sink.as_deref() else {
            return Ok(());
        };
        sink.start_session(&self.strategy_name, subscription_id.or(symbol), symbol)
            .inspect_err(|err| warn!("Failed to start telemetry session: {}", err))
    }

    /// End the session; an unknown session is not an error here
    pub fn stop_session(&self) -> Result<(), TelemetryError> {
        let Some(sink) = self.sink.as_deref() else {
            return Ok(());
        };
        match sink.stop_session(&self.strategy_name, Some(STOP_REASON)) {
            Ok(()) | Err(TelemetryError::SessionNotFound { .. }) => Ok(()),
            Err(err) => {
                warn!("Failed to stop telemetry session: {}", err);
                Err(err)
            }
        }
    }

    pub fn record_snapshot(&self, record: &SnapshotRecord) -> Result<(), TelemetryError> {
        if self.sink.is_none() {
            return Ok(());
        }
        self.for_candidates("recording DOM snapshot", |sink, id| sink.record_dom_snapshot(id, record))
            .map(|_| ())
    }

    /// Count a threshold hit and attach the composed detail payload
    pub fn record_threshold_hit(&self, details: Map<String, Value>) -> Result<(), TelemetryError> {
        if self.sink.is_none() {
            return Ok(());
        }
        let event = (!details.is_empty()).then(|| TelemetryEvent {
            message: "Signal threshold reached".to_string(),
            level: TelemetryLevel::Info,
            tone: Tone::Neutral,
            details: Some(details),
        });
        self.for_candidates("recording threshold hit", |sink, id| {
            sink.record_threshold_hit(id)?;
            match &event {
                Some(event) => sink.log_event(id, event),
                None => Ok(()),
            }
        })
        .map(|_| ())
    }

    pub fn record_signal(&self, side: Side) -> Result<(), TelemetryError> {
        if self.sink.is_none() {
            return Ok(());
        }
        self.for_candidates("recording signal", |sink, id| sink.record_signal(id, side))
            .map(|_| ())
    }

    pub fn clear_status(&mut self) -> Result<(), TelemetryError> {
        if self.sink.is_none() {
            return Ok(());
        }
        self.for_candidates("clearing telemetry status", |sink, id| sink.clear_status_cause(id))?;
        self.last_status = None;
        Ok(())
    }

    /// Deduplicated status message
    pub fn status(&mut self, message: &str, tone: Tone, details: Option<Map<String, Value>>) -> Result<(), TelemetryError> {
        self.log(message, TelemetryLevel::Info, tone, details, true)
    }

    /// Log `message` through `tracing`, then forward it to the sink.
    ///
    /// With `deduplicate`, a message equal to the last accepted status is
    /// dropped entirely.
    pub fn log(
        &mut self,
        message: &str,
        level: TelemetryLevel,
        tone: Tone,
        details: Option<Map<String, Value>>,
        deduplicate: bool,
    ) -> Result<(), TelemetryError> {
        if deduplicate && self.last_status.as_deref() == Some(message) {
            return Ok(());
        }

        let fields = details
            .as_ref()
            .filter(|details| !details.is_empty())
            .map(|details| Value::Object(details.clone()).to_string())
            .unwrap_or_default();
        match level {
            TelemetryLevel::Debug => debug!(strategy = %self.strategy_name, ?tone, details = %fields, "{}", message),
            TelemetryLevel::Info => info!(strategy = %self.strategy_name, ?tone, details = %fields, "{}", message),
            TelemetryLevel::Warn => warn!(strategy = %self.strategy_name, ?tone, details = %fields, "{}", message),
            TelemetryLevel::Error => error!(strategy = %self.strategy_name, ?tone, details = %fields, "{}", message),
        }

        let remembered = deduplicate.then(|| message.to_string());
        if self.sink.is_none() {
            self.last_status = remembered;
            return Ok(());
        }

        let event = TelemetryEvent {
            message: message.to_string(),
            level,
            tone,
            details,
        };
        self.for_candidates("logging telemetry event", |sink, id| sink.log_event(id, &event))?;
        self.last_status = remembered;
        Ok(())
    }
}

/// Drop null entries so the sink only sees populated fields
pub fn compact(details: Map<String, Value>) -> Map<String, Value> {
    details.into_iter().filter(|(_, value)| !value.is_null()).collect()
}
