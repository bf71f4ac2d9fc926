//! Testing utilities for strategies
//!
//! In-memory collaborators that record every interaction so tests can
//! assert on what a strategy asked for and emitted.

use crate::collaborators::{
    EventDispatcher, FeatureVector, OrderEvaluationContext, PositionProvider, RiskAuthority,
    RiskDecision, ThresholdModel,
};
use crate::telemetry::{SnapshotRecord, TelemetryError, TelemetryEvent, TelemetrySink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dom_types::Side;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Risk authority with a fixed verdict
pub struct MockRiskAuthority {
    decision: Mutex<Option<RiskDecision>>,
    pub evaluations: Mutex<Vec<OrderEvaluationContext>>,
}

impl MockRiskAuthority {
    pub fn permit_all() -> Self {
        Self::with_decision(Some(RiskDecision::permit()))
    }

    pub fn deny_all(reason: &str) -> Self {
        Self::with_decision(Some(RiskDecision::deny(reason)))
    }

    /// Every evaluation returns an error
    pub fn failing() -> Self {
        Self::with_decision(None)
    }

    fn with_decision(decision: Option<RiskDecision>) -> Self {
        Self {
            decision: Mutex::new(decision),
            evaluations: Mutex::new(Vec::new()),
        }
    }

    pub fn set_decision(&self, decision: RiskDecision) {
        *self.decision.lock() = Some(decision);
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.lock().len()
    }
}

impl RiskAuthority for MockRiskAuthority {
    fn evaluate_order(&self, context: &OrderEvaluationContext) -> Result<RiskDecision> {
        self.evaluations.lock().push(context.clone());
        self.decision
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("risk engine unavailable"))
    }
}

/// Position provider backed by a map; unknown symbols are an error
#[derive(Default)]
pub struct StaticPositionProvider {
    positions: Mutex<HashMap<String, f64>>,
}

impl StaticPositionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, position: f64) {
        self.positions.lock().insert(symbol.to_string(), position);
    }
}

impl PositionProvider for StaticPositionProvider {
    fn position(&self, symbol: &str) -> Result<f64> {
        self.positions
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("no position for {}", symbol))
    }
}

/// Telemetry sink that records calls per identifier
///
/// When built with [`RecordingTelemetry::with_sessions`] only the listed
/// identifiers are live; any other identifier yields `SessionNotFound`.
#[derive(Default)]
pub struct RecordingTelemetry {
    live_sessions: Option<HashSet<String>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<(String, Option<String>)>>,
    pub snapshots: Mutex<Vec<(String, SnapshotRecord)>>,
    pub threshold_hits: Mutex<Vec<String>>,
    pub signals: Mutex<Vec<(String, Side)>>,
    pub events: Mutex<Vec<(String, TelemetryEvent)>>,
    pub cleared: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(identifiers: &[&str]) -> Self {
        Self {
            live_sessions: Some(identifiers.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    fn check(&self, strategy_id: &str) -> Result<(), TelemetryError> {
        match &self.live_sessions {
            Some(live) if !live.contains(strategy_id) => {
                Err(TelemetryError::session_not_found(strategy_id))
            }
            _ => Ok(()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|(_, event)| event.message.clone())
            .collect()
    }

    pub fn count_message(&self, message: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| event.message == message)
            .count()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn start_session(
        &self,
        strategy_id: &str,
        _subscription_id: Option<&str>,
        _symbol: Option<&str>,
    ) -> Result<(), TelemetryError> {
        self.started.lock().push(strategy_id.to_string());
        Ok(())
    }

    fn stop_session(&self, strategy_id: &str, reason: Option<&str>) -> Result<(), TelemetryError> {
        self.check(strategy_id)?;
        self.stopped
            .lock()
            .push((strategy_id.to_string(), reason.map(str::to_string)));
        Ok(())
    }

    fn record_dom_snapshot(&self, strategy_id: &str, record: &SnapshotRecord) -> Result<(), TelemetryError> {
        self.check(strategy_id)?;
        self.snapshots
            .lock()
            .push((strategy_id.to_string(), record.clone()));
        Ok(())
    }

    fn record_threshold_hit(&self, strategy_id: &str) -> Result<(), TelemetryError> {
        self.check(strategy_id)?;
        self.threshold_hits.lock().push(strategy_id.to_string());
        Ok(())
    }

    fn record_signal(&self, strategy_id: &str, side: Side) -> Result<(), TelemetryError> {
        self.check(strategy_id)?;
        self.signals.lock().push((strategy_id.to_string(), side));
        Ok(())
    }

    fn log_event(&self, strategy_id: &str, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.check(strategy_id)?;
        self.events
            .lock()
            .push((strategy_id.to_string(), event.clone()));
        Ok(())
    }

    fn clear_status_cause(&self, strategy_id: &str) -> Result<(), TelemetryError> {
        self.check(strategy_id)?;
        self.cleared.lock().push(strategy_id.to_string());
        Ok(())
    }
}

/// Dispatcher that keeps every event it receives
#[derive(Default)]
pub struct RecordingDispatcher {
    fail: bool,
    pub events: Mutex<Vec<(String, Value)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the event, then reports a delivery failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

#[async_trait]
impl EventDispatcher for RecordingDispatcher {
    async fn dispatch(&self, strategy: &str, event: Value) -> Result<()> {
        self.events.lock().push((strategy.to_string(), event));
        if self.fail {
            return Err(anyhow!("order gateway offline"));
        }
        Ok(())
    }
}

enum ModelResponse {
    Payload(Value),
    Error(String),
}

/// Threshold model returning a canned response, optionally after a delay
pub struct StaticThresholdModel {
    response: ModelResponse,
    delay: Option<Duration>,
    calls: AtomicU64,
    pub last_features: Mutex<Option<FeatureVector>>,
}

impl StaticThresholdModel {
    pub fn new(payload: Value) -> Self {
        Self::build(ModelResponse::Payload(payload))
    }

    pub fn failing(message: &str) -> Self {
        Self::build(ModelResponse::Error(message.to_string()))
    }

    fn build(response: ModelResponse) -> Self {
        Self {
            response,
            delay: None,
            calls: AtomicU64::new(0),
            last_features: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ThresholdModel for StaticThresholdModel {
    async fn predict_thresholds(&self, features: FeatureVector) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_features.lock() = Some(features);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.response {
            ModelResponse::Payload(value) => Ok(value.clone()),
            ModelResponse::Error(message) => Err(anyhow!("{}", message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recording_telemetry_rejects_unknown_sessions() {
        let telemetry = RecordingTelemetry::with_sessions(&["dom-1"]);
        assert!(telemetry.record_threshold_hit("dom-1").is_ok());
        assert_eq!(
            telemetry.record_threshold_hit("other"),
            Err(TelemetryError::session_not_found("other"))
        );
        assert_eq!(telemetry.threshold_hits.lock().len(), 1);
    }

    #[test]
    fn test_mock_risk_authority_records_contexts() {
        let risk = MockRiskAuthority::deny_all("max position");
        let context = OrderEvaluationContext {
            symbol: "ES".to_string(),
            side: Side::Buy,
            quantity: 1,
            current_position: 0.0,
        };
        let decision = risk.evaluate_order(&context).unwrap();
        assert!(!decision.permitted);
        assert_eq!(risk.evaluation_count(), 1);

        assert!(MockRiskAuthority::failing().evaluate_order(&context).is_err());
    }

    #[tokio::test]
    async fn test_static_threshold_model() {
        let model = StaticThresholdModel::new(json!({"ofi_threshold": 4.0}));
        let result = model.predict_thresholds(FeatureVector::new()).await.unwrap();
        assert_eq!(result["ofi_threshold"], json!(4.0));
        assert_eq!(model.calls(), 1);

        let failing = StaticThresholdModel::failing("boom");
        assert!(failing.predict_thresholds(FeatureVector::new()).await.is_err());
    }

    #[test]
    fn test_dispatcher_records_before_failing() {
        let dispatcher = RecordingDispatcher::failing();
        let result = tokio_test::block_on(dispatcher.dispatch("dom", json!({"side": "BUY"})));
        assert!(result.is_err());
        assert_eq!(dispatcher.event_count(), 1);
    }
}
