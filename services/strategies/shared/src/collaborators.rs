//! External collaborators consumed by strategies
//!
//! Strategies never own these dependencies; they are injected through
//! [`StrategyDependencies`]. Every method returns `anyhow::Result` because
//! implementations are foreign code. Strategies degrade on failure: a risk
//! error denies the order, a position error reads as flat, a dispatch error
//! is logged.

use crate::telemetry::TelemetrySink;
use anyhow::Result;
use async_trait::async_trait;
use dom_types::Side;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Order facts handed to the risk authority
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderEvaluationContext {
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub current_position: f64,
}

/// Verdict from the risk authority
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskDecision {
    pub permitted: bool,
    pub reason: Option<String>,
}

impl RiskDecision {
    pub fn permit() -> Self {
        Self {
            permitted: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permitted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Pre-trade risk policy
pub trait RiskAuthority: Send + Sync {
    fn evaluate_order(&self, context: &OrderEvaluationContext) -> Result<RiskDecision>;
}

/// Current net position per symbol
pub trait PositionProvider: Send + Sync {
    fn position(&self, symbol: &str) -> Result<f64>;
}

/// Order-generation boundary that receives signal events
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch(&self, strategy: &str, event: Value) -> Result<()>;
}

/// Numeric features handed to a threshold model, keyed by feature name
pub type FeatureVector = BTreeMap<String, f64>;

/// External predictive-threshold source
///
/// Expected to return a JSON object of `threshold name -> number`. Any other
/// shape is treated as a failed prediction by the caller.
#[async_trait]
pub trait ThresholdModel: Send + Sync {
    async fn predict_thresholds(&self, features: FeatureVector) -> Result<Value>;
}

/// Collaborators injected into a strategy
#[derive(Clone, Default)]
pub struct StrategyDependencies {
    pub risk_authority: Option<Arc<dyn RiskAuthority>>,
    pub position_provider: Option<Arc<dyn PositionProvider>>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    pub event_dispatcher: Option<Arc<dyn EventDispatcher>>,
    pub threshold_model: Option<Arc<dyn ThresholdModel>>,
}

impl StrategyDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_risk_authority(mut self, authority: Arc<dyn RiskAuthority>) -> Self {
        self.risk_authority = Some(authority);
        self
    }

    pub fn with_position_provider(mut self, provider: Arc<dyn PositionProvider>) -> Self {
        self.position_provider = Some(provider);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_event_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.event_dispatcher = Some(dispatcher);
        self
    }

    pub fn with_threshold_model(mut self, model: Arc<dyn ThresholdModel>) -> Self {
        self.threshold_model = Some(model);
        self
    }
}

impl std::fmt::Debug for StrategyDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyDependencies")
            .field("risk_authority", &self.risk_authority.is_some())
            .field("position_provider", &self.position_provider.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .field("event_dispatcher", &self.event_dispatcher.is_some())
            .field("threshold_model", &self.threshold_model.is_some())
            .finish()
    }
}
