//! # External Threshold Model Adapter
//!
//! ## Purpose
//!
//! Optional bridge to a predictive-threshold source. Calls are rate limited
//! by `threshold_model_refresh_seconds`, bounded by
//! `threshold_model_timeout_seconds`, and run on a separate tokio task so a
//! hanging model never stalls snapshot ingestion.
//!
//! ## State Machine
//!
//! ```text
//! IDLE ──(refresh due)──► REQUESTING ──ok──► APPLIED (cache replaced)
//!                              │
//!                              ├──timeout / error / bad payload──► FAILED (cache cleared)
//!                              │
//!                              └──strategy stopped meanwhile──► ABANDONED (nothing touched)
//! ```
//!
//! A refresh is due when the cache is empty or the refresh interval has
//! elapsed since the last attempt. While the cache is empty the engine
//! uses adaptive thresholds only.

use crate::adaptive::Regime;
use crate::analytics::DomMetrics;
use crate::conditions::{ModelThresholds, ThresholdDetail};
use crate::lifecycle::LifecycleGuard;
use crate::structure::Zone;
use anyhow::Result;
use async_trait::async_trait;
use dom_types::coerce_f64;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strategy_shared::{FeatureVector, ThresholdModel};
use tracing::{debug, warn};

/// Why a model refresh produced no thresholds
#[derive(Debug, Clone, PartialEq)]
pub enum ModelFailure {
    Timeout { timeout_seconds: f64 },
    Error { message: String },
    InvalidPayload { kind: &'static str },
}

impl ModelFailure {
    pub fn telemetry_message(&self) -> &'static str {
        match self {
            ModelFailure::Timeout { .. } => "Threshold model timeout; reverting to adaptive thresholds",
            ModelFailure::Error { .. } => "Threshold model error; using adaptive thresholds",
            ModelFailure::InvalidPayload { .. } => "Threshold model returned invalid payload",
        }
    }

    pub fn details(&self) -> Map<String, Value> {
        let mut details = Map::new();
        match self {
            ModelFailure::Timeout { timeout_seconds } => {
                details.insert("timeout_seconds".into(), json!(timeout_seconds));
            }
            ModelFailure::Error { message } => {
                details.insert("error".into(), json!(message));
            }
            ModelFailure::InvalidPayload { kind } => {
                details.insert("type".into(), json!(kind));
            }
        }
        details
    }
}

impl std::fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFailure::Timeout { timeout_seconds } => {
                write!(f, "prediction timed out after {:.3}s", timeout_seconds)
            }
            ModelFailure::Error { message } => write!(f, "prediction failed: {}", message),
            ModelFailure::InvalidPayload { kind } => write!(f, "non-mapping payload of type {}", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Refresh not due; cached thresholds (possibly none) stand
    NotDue,
    /// New thresholds cached
    Applied { count: usize },
    /// Cache cleared
    Failed(ModelFailure),
    /// Strategy stopped while the call was in flight; nothing was applied
    Abandoned,
}

/// Timing knobs for one refresh attempt
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    pub now: f64,
    pub refresh_seconds: f64,
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdModelAdapter {
    latest: ModelThresholds,
    last_refresh: Option<f64>,
}

impl ThresholdModelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_due(&self, now: f64, refresh_seconds: f64) -> bool {
        if self.latest.is_empty() {
            return true;
        }
        match self.last_refresh {
            Some(last) => now - last >= refresh_seconds,
            None => true,
        }
    }

    /// Refresh the cached thresholds when due.
    ///
    /// The lifecycle epoch is captured before the call; if the guard moved
    /// on by the time the call completes the result is dropped.
    pub async fn maybe_refresh(
        &mut self,
        model: &Arc<dyn ThresholdModel>,
        features: FeatureVector,
        policy: RefreshPolicy,
        guard: &LifecycleGuard,
    ) -> RefreshOutcome {
        if !self.is_due(policy.now, policy.refresh_seconds) {
            return RefreshOutcome::NotDue;
        }
        let epoch = guard.epoch();
        let result = invoke(model, features, policy.timeout_seconds).await;
        if !guard.is_current(epoch) {
            debug!("Discarding threshold model result after strategy stop");
            return RefreshOutcome::Abandoned;
        }

        self.last_refresh = Some(policy.now);
        match result {
            Ok(thresholds) => {
                let count = thresholds.len();
                self.latest = thresholds;
                RefreshOutcome::Applied { count }
            }
            Err(failure) => {
                warn!("Threshold model {}", failure);
                self.latest.clear();
                RefreshOutcome::Failed(failure)
            }
        }
    }

    /// Cached thresholds, `None` when empty
    pub fn latest(&self) -> Option<&ModelThresholds> {
        (!self.latest.is_empty()).then_some(&self.latest)
    }

    pub fn clear(&mut self) {
        self.latest.clear();
        self.last_refresh = None;
    }
}

async fn invoke(
    model: &Arc<dyn ThresholdModel>,
    features: FeatureVector,
    timeout_seconds: f64,
) -> Result<ModelThresholds, ModelFailure> {
    let model = Arc::clone(model);
    let mut handle = tokio::spawn(async move { model.predict_thresholds(features).await });

    let limit = if timeout_seconds > 0.0 {
        Duration::try_from_secs_f64(timeout_seconds).ok()
    } else {
        None
    };
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(ModelFailure::Timeout { timeout_seconds });
            }
        },
        None => handle.await,
    };

    let payload = match joined {
        Ok(Ok(payload)) => payload,
        Ok(Err(err)) => {
            return Err(ModelFailure::Error {
                message: err.to_string(),
            })
        }
        Err(join_error) => {
            return Err(ModelFailure::Error {
                message: join_error.to_string(),
            })
        }
    };
    sanitize(payload)
}

/// Keep finite numeric entries of an object payload
pub fn sanitize(payload: Value) -> Result<ModelThresholds, ModelFailure> {
    match payload {
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(_, value)| !value.is_boolean())
            .filter_map(|(key, value)| coerce_f64(value).map(|numeric| (key.clone(), numeric)))
            .collect()),
        other => Err(ModelFailure::InvalidPayload {
            kind: value_kind(&other),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Adapter for synchronous model clients; each call runs on the blocking
/// thread pool.
pub struct BlockingThresholdModel<F> {
    predict: Arc<F>,
}

impl<F> BlockingThresholdModel<F>
where
    F: Fn(FeatureVector) -> Result<Value> + Send + Sync + 'static,
{
    pub fn new(predict: F) -> Self {
        Self {
            predict: Arc::new(predict),
        }
    }
}

#[async_trait]
impl<F> ThresholdModel for BlockingThresholdModel<F>
where
    F: Fn(FeatureVector) -> Result<Value> + Send + Sync + 'static,
{
    async fn predict_thresholds(&self, features: FeatureVector) -> Result<Value> {
        let predict = Arc::clone(&self.predict);
        tokio::task::spawn_blocking(move || (*predict)(features)).await?
    }
}

/// Snapshot state summarised for the model
#[derive(Debug, Clone, Copy)]
pub struct FeatureInputs<'a> {
    pub zone: Zone,
    pub regime: Regime,
    pub volatility_scale: f64,
    pub realised_volatility: f64,
    pub trend_score: f64,
    pub momentum: f64,
    pub imbalance: f64,
    pub normalized_imbalance: f64,
    pub total_depth: f64,
    pub spread: Option<f64>,
    pub last_volatility_scale: f64,
    pub metrics: &'a DomMetrics,
    pub adaptive: &'a BTreeMap<String, ThresholdDetail>,
}

/// Numeric feature vector; non-finite values are omitted.
pub fn build_features(inputs: &FeatureInputs<'_>) -> FeatureVector {
    let mut features = FeatureVector::new();
    let mut add = |name: String, value: Option<f64>| {
        if let Some(value) = value.filter(|v| v.is_finite()) {
            features.insert(name, value);
        }
    };

    add("volatility_scale".into(), Some(inputs.volatility_scale));
    add("realised_volatility".into(), Some(inputs.realised_volatility));
    add("trend_score".into(), Some(inputs.trend_score));
    add("momentum".into(), Some(inputs.momentum));
    add("imbalance".into(), Some(inputs.imbalance));
    add("normalized_imbalance".into(), Some(inputs.normalized_imbalance));
    add("total_depth".into(), Some(inputs.total_depth));
    add("spread".into(), inputs.spread);
    add("volatility_scale_last".into(), Some(inputs.last_volatility_scale));

    let one_hot = |flag: bool| Some(if flag { 1.0 } else { 0.0 });
    add("zone_support".into(), one_hot(inputs.zone == Zone::Support));
    add("zone_resistance".into(), one_hot(inputs.zone == Zone::Resistance));
    add("zone_unknown".into(), one_hot(false));
    for regime in Regime::ALL {
        add(format!("regime_{}", regime), one_hot(inputs.regime == regime));
    }
    add("regime_other".into(), one_hot(false));

    for key in [
        "obi",
        "ofi",
        "imbalance_ratio",
        "stacking_intensity_buy",
        "stacking_intensity_sell",
        "fake_breakout_prob",
    ] {
        add(format!("metric_{}", key), inputs.metrics.get(key));
    }
    for (key, detail) in inputs.adaptive {
        add(format!("adaptive_{}_smoothed", key), Some(detail.smoothed));
        add(format!("adaptive_{}_raw", key), Some(detail.raw));
        add(format!("adaptive_{}_quantile", key), detail.quantile);
    }
    features
}
