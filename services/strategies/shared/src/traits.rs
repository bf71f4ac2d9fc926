//! Strategy traits and interfaces

use crate::collaborators::StrategyDependencies;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// Core strategy trait that all DOM strategies implement
///
/// Bundles lifecycle hooks, the tunable parameter schema and dependency
/// injection into one capability interface.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Strategy name for identification
    fn name(&self) -> &str;

    /// Stable type tag, e.g. `"dom_structure"`
    fn strategy_type(&self) -> &'static str;

    /// Inject collaborators. Only `Some` fields replace existing ones.
    fn set_dependencies(&mut self, dependencies: StrategyDependencies);

    /// Start the strategy
    async fn start(&mut self) -> Result<()>;

    /// Stop the strategy
    async fn stop(&mut self) -> Result<()>;

    fn is_active(&self) -> bool;

    /// Schema of every runtime-tunable parameter
    fn parameter_definitions(&self) -> Vec<ParameterDefinition>;

    /// Apply runtime parameter updates, returning the fields that changed
    fn apply_parameter_updates(&mut self, updates: &Map<String, Value>) -> Map<String, Value>;

    /// Feed one inbound market event
    async fn on_market_event(&mut self, event: &Value) -> Result<()>;

    /// Drain pending signals into order payloads
    fn generate_orders(&mut self) -> Vec<Map<String, Value>>;

    /// Feedback from the execution side after a position closes
    fn record_trade_result(&mut self, pnl: f64);

    /// Get current strategy metrics
    fn metrics(&self) -> StrategyMetrics;

    fn describe(&self) -> StrategyDescription {
        StrategyDescription {
            name: self.name().to_string(),
            strategy_type: self.strategy_type().to_string(),
            active: self.is_active(),
            parameters: self.parameter_definitions(),
        }
    }
}

/// Basic strategy metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StrategyMetrics {
    pub snapshots_processed: u64,
    pub snapshots_dropped: u64,
    pub signals_generated: u64,
    pub signals_suppressed: u64,
    pub model_failures: u64,
    pub errors: u64,
}

/// Value type of a tunable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Str,
    Int,
    Float,
    Bool,
    Tuple,
    Dict,
}

/// Description of one tunable parameter, as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDefinition {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub default: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    pub label: &'static str,
    pub description: &'static str,
    pub allow_null: bool,
}

impl ParameterDefinition {
    pub fn new(name: &'static str, kind: ParameterKind, default: Value) -> Self {
        Self {
            name,
            kind,
            default,
            min: None,
            max: None,
            step: None,
            label: name,
            description: "",
            allow_null: false,
        }
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn label(mut self, label: &'static str, description: &'static str) -> Self {
        self.label = label;
        self.description = description;
        self
    }
}

/// Snapshot of a strategy for operator tooling
#[derive(Debug, Clone, Serialize)]
pub struct StrategyDescription {
    pub name: String,
    pub strategy_type: String,
    pub active: bool,
    pub parameters: Vec<ParameterDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_definition_serialization() {
        let definition = ParameterDefinition::new("ofi_threshold", ParameterKind::Float, json!(6.0))
            .range(0.0, 500.0)
            .label("Order Flow Threshold", "Absolute order flow imbalance required");

        let value = serde_json::to_value(&definition).unwrap();
        assert_eq!(value["type"], json!("float"));
        assert_eq!(value["max"], json!(500.0));
        assert!(value.get("step").is_none());
        assert_eq!(value["allow_null"], json!(false));
    }
}
