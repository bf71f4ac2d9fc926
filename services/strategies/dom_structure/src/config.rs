//! Strategy configuration
//!
//! Every tunable of the engine lives in [`DomStructureConfig`]. Values are
//! normalised rather than rejected: inverted bounds are swapped, negative
//! durations clamp to zero, non-finite numbers fall back to defaults.
//! Runtime changes go through [`DomStructureConfig::apply_updates`], which
//! reports only the fields whose value actually changed.

use crate::adaptive::{AdaptiveSettings, Regime};
use dom_types::coerce_f64;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use strategy_shared::{ParameterDefinition, ParameterKind};
use tracing::{debug, warn};

/// Environment prefix for overrides, e.g. `DOM_STRUCTURE__COOLDOWN_SECONDS=30`
pub const ENV_PREFIX: &str = "DOM_STRUCTURE";

/// Environment variable consulted for the configuration file path
pub const CONFIG_PATH_ENV: &str = "DOM_STRUCTURE_CONFIG_PATH";

const DEFAULT_VOLATILITY_BOUNDS: (f64, f64) = (0.75, 1.5);
const DEFAULT_SCALE_BOUNDS: (f64, f64) = (0.5, 2.0);
const DEFAULT_VOLATILITY_BREAKPOINTS: (f64, f64) = (0.9, 1.2);
const DEFAULT_TREND_BREAKPOINTS: (f64, f64) = (0.1, 0.25);

/// Per-regime replacement of the engine-level gating settings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegimeOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_hits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_quantity: Option<f64>,
}

impl RegimeOverride {
    pub fn new(required_hits: u32, cooldown_seconds: f64, default_quantity: f64) -> Self {
        Self {
            required_hits: Some(required_hits),
            cooldown_seconds: Some(cooldown_seconds),
            default_quantity: Some(default_quantity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.required_hits.is_none() && self.cooldown_seconds.is_none() && self.default_quantity.is_none()
    }
}

/// Regime overrides keyed by `calm` / `normal` / `volatile`
pub type RegimeOverrides = BTreeMap<String, RegimeOverride>;

pub fn default_regime_overrides() -> RegimeOverrides {
    BTreeMap::from([
        (Regime::Calm.as_str().to_string(), RegimeOverride::new(2, 30.0, 0.5)),
        (Regime::Normal.as_str().to_string(), RegimeOverride::new(3, 15.0, 1.0)),
        (Regime::Volatile.as_str().to_string(), RegimeOverride::new(4, 45.0, 0.75)),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomStructureConfig {
    pub name: String,
    pub symbol: String,
    pub subscription_id: Option<String>,
    /// Telemetry session identifiers tried in order; empty means `[name]`
    pub telemetry_identifiers: Vec<String>,

    // Gating
    pub cooldown_seconds: f64,
    pub max_loss_streak: u32,
    pub signal_frequency_seconds: f64,
    pub default_quantity: f64,
    pub min_processing_interval: f64,
    pub min_signal_conditions: u32,

    // Structure
    pub structure_window_seconds: f64,
    pub structure_tolerance_ticks: f64,
    pub depth_levels: usize,

    // Condition thresholds
    pub trend_threshold: Option<f64>,
    pub stacking_intensity_threshold: f64,
    pub ofi_threshold: f64,
    pub obi_long_threshold: f64,
    pub obi_short_threshold: f64,
    pub fake_breakout_max: Option<f64>,
    pub momentum_tick_threshold: f64,

    // Adaptive thresholds
    pub volatility_window_seconds: f64,
    pub volatility_scale_bounds: (f64, f64),
    pub adaptive_threshold_smoothing: f64,
    pub adaptive_threshold_hysteresis_ticks: f64,
    pub target_ofi_quantile: Option<f64>,
    pub target_stacking_quantile: Option<f64>,
    pub target_obi_long_quantile: Option<f64>,
    pub target_obi_short_quantile: Option<f64>,
    pub recent_metrics_maxlen: usize,

    // Volatility scaling of size and cooldown
    pub quantity_scale_exponent: f64,
    pub quantity_scale_bounds: (f64, f64),
    pub cooldown_scale_exponent: f64,
    pub cooldown_scale_bounds: (f64, f64),

    // Regimes
    pub regime_volatility_breakpoints: (f64, f64),
    pub regime_trend_breakpoints: (f64, f64),
    #[serde(deserialize_with = "deserialize_regime_overrides")]
    pub regime_condition_overrides: RegimeOverrides,

    // External threshold model
    pub threshold_model_enabled: bool,
    pub threshold_model_refresh_seconds: f64,
    pub threshold_model_timeout_seconds: f64,
}

impl Default for DomStructureConfig {
    fn default() -> Self {
        Self {
            name: "DOM Structure Strategy".to_string(),
            symbol: "ES".to_string(),
            subscription_id: None,
            telemetry_identifiers: Vec::new(),
            cooldown_seconds: 15.0,
            max_loss_streak: 3,
            signal_frequency_seconds: 60.0,
            default_quantity: 1.0,
            min_processing_interval: 0.05,
            min_signal_conditions: 3,
            structure_window_seconds: 10.0,
            structure_tolerance_ticks: 2.0,
            depth_levels: 10,
            trend_threshold: Some(0.5),
            stacking_intensity_threshold: 15.0,
            ofi_threshold: 6.0,
            obi_long_threshold: 0.58,
            obi_short_threshold: 0.42,
            fake_breakout_max: Some(0.6),
            momentum_tick_threshold: 0.25,
            volatility_window_seconds: 30.0,
            volatility_scale_bounds: DEFAULT_VOLATILITY_BOUNDS,
            adaptive_threshold_smoothing: 0.5,
            adaptive_threshold_hysteresis_ticks: 0.25,
            target_ofi_quantile: Some(0.75),
            target_stacking_quantile: Some(0.75),
            target_obi_long_quantile: Some(0.7),
            target_obi_short_quantile: Some(0.3),
            recent_metrics_maxlen: 128,
            quantity_scale_exponent: 1.0,
            quantity_scale_bounds: DEFAULT_SCALE_BOUNDS,
            cooldown_scale_exponent: 1.0,
            cooldown_scale_bounds: DEFAULT_SCALE_BOUNDS,
            regime_volatility_breakpoints: DEFAULT_VOLATILITY_BREAKPOINTS,
            regime_trend_breakpoints: DEFAULT_TREND_BREAKPOINTS,
            regime_condition_overrides: default_regime_overrides(),
            threshold_model_enabled: false,
            threshold_model_refresh_seconds: 1.0,
            threshold_model_timeout_seconds: 0.25,
        }
    }
}

/// Result of a runtime parameter update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedUpdates {
    /// Fields whose normalised value changed, with the new value
    pub changed: Map<String, Value>,
    /// Keys skipped as unknown or ill-typed
    pub rejected: Vec<String>,
}

impl AppliedUpdates {
    pub fn contains(&self, key: &str) -> bool {
        self.changed.contains_key(key)
    }

    pub fn contains_any(&self, keys: &[&str]) -> bool {
        keys.iter().any(|key| self.changed.contains_key(*key))
    }
}

impl DomStructureConfig {
    /// Load from an optional file plus `DOM_STRUCTURE__*` environment
    /// overrides, then normalise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config: Self = dom_config::load_layered(path, ENV_PREFIX)?;
        config.normalize();
        Ok(config)
    }

    /// Tick size of the configured symbol
    pub fn tick_size(&self) -> f64 {
        dom_config::tick_size(&self.symbol)
    }

    pub fn telemetry_candidates(&self) -> Vec<String> {
        let candidates: Vec<String> = self
            .telemetry_identifiers
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if candidates.is_empty() {
            vec![self.name.clone()]
        } else {
            candidates
        }
    }

    pub fn adaptive_settings(&self) -> AdaptiveSettings {
        AdaptiveSettings {
            window_seconds: self.volatility_window_seconds,
            scale_bounds: self.volatility_scale_bounds,
            volatility_breakpoints: self.regime_volatility_breakpoints,
            trend_breakpoints: self.regime_trend_breakpoints,
            smoothing: self.adaptive_threshold_smoothing,
            hysteresis_ticks: self.adaptive_threshold_hysteresis_ticks,
            recent_metrics_maxlen: self.recent_metrics_maxlen,
        }
    }

    /// Clamp, swap and default every field into its valid range.
    pub fn normalize(&mut self) {
        let defaults = Self::default();

        self.symbol = self.symbol.trim().to_uppercase();
        self.subscription_id = self
            .subscription_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if self.subscription_id.is_none() && !self.symbol.is_empty() {
            self.subscription_id = Some(self.symbol.clone());
        }

        self.cooldown_seconds = finite_or(self.cooldown_seconds, defaults.cooldown_seconds).max(0.0);
        self.max_loss_streak = self.max_loss_streak.max(1);
        self.signal_frequency_seconds =
            finite_or(self.signal_frequency_seconds, defaults.signal_frequency_seconds).max(0.0);
        self.default_quantity = finite_or(self.default_quantity, defaults.default_quantity)
            .trunc()
            .max(0.0);
        self.min_processing_interval =
            finite_or(self.min_processing_interval, defaults.min_processing_interval).max(0.0);
        self.min_signal_conditions = self.min_signal_conditions.max(1);

        self.structure_window_seconds =
            finite_or(self.structure_window_seconds, defaults.structure_window_seconds).max(1.0);
        self.structure_tolerance_ticks =
            finite_or(self.structure_tolerance_ticks, defaults.structure_tolerance_ticks).max(0.0);
        self.depth_levels = self.depth_levels.max(1);

        self.trend_threshold = self.trend_threshold.filter(|v| v.is_finite());
        self.stacking_intensity_threshold =
            finite_or(self.stacking_intensity_threshold, defaults.stacking_intensity_threshold).max(0.0);
        self.ofi_threshold = finite_or(self.ofi_threshold, defaults.ofi_threshold).max(0.0);
        self.obi_long_threshold =
            finite_or(self.obi_long_threshold, defaults.obi_long_threshold).clamp(0.0, 1.0);
        self.obi_short_threshold =
            finite_or(self.obi_short_threshold, defaults.obi_short_threshold).clamp(0.0, 1.0);
        self.fake_breakout_max = self
            .fake_breakout_max
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0));
        self.momentum_tick_threshold =
            finite_or(self.momentum_tick_threshold, defaults.momentum_tick_threshold).max(0.0);

        self.volatility_window_seconds =
            finite_or(self.volatility_window_seconds, defaults.volatility_window_seconds).max(1.0);
        self.volatility_scale_bounds = normalize_volatility_bounds(self.volatility_scale_bounds);
        self.adaptive_threshold_smoothing =
            finite_or(self.adaptive_threshold_smoothing, defaults.adaptive_threshold_smoothing).clamp(0.0, 1.0);
        self.adaptive_threshold_hysteresis_ticks = finite_or(
            self.adaptive_threshold_hysteresis_ticks,
            defaults.adaptive_threshold_hysteresis_ticks,
        )
        .max(0.0);
        for quantile in [
            &mut self.target_ofi_quantile,
            &mut self.target_stacking_quantile,
            &mut self.target_obi_long_quantile,
            &mut self.target_obi_short_quantile,
        ] {
            *quantile = quantile.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 1.0));
        }
        self.recent_metrics_maxlen = self.recent_metrics_maxlen.max(1);

        self.quantity_scale_exponent =
            finite_or(self.quantity_scale_exponent, defaults.quantity_scale_exponent).max(0.0);
        self.cooldown_scale_exponent =
            finite_or(self.cooldown_scale_exponent, defaults.cooldown_scale_exponent).max(0.0);
        self.quantity_scale_bounds = normalize_scale_bounds(self.quantity_scale_bounds, DEFAULT_SCALE_BOUNDS);
        self.cooldown_scale_bounds = normalize_scale_bounds(self.cooldown_scale_bounds, DEFAULT_SCALE_BOUNDS);

        self.regime_volatility_breakpoints = normalize_regime_breakpoints(
            self.regime_volatility_breakpoints,
            DEFAULT_VOLATILITY_BREAKPOINTS,
            false,
        );
        self.regime_trend_breakpoints =
            normalize_regime_breakpoints(self.regime_trend_breakpoints, DEFAULT_TREND_BREAKPOINTS, true);
        let overrides = serde_json::to_value(&self.regime_condition_overrides).unwrap_or(Value::Null);
        self.regime_condition_overrides = normalize_regime_overrides(&overrides);

        self.threshold_model_refresh_seconds =
            finite_or(self.threshold_model_refresh_seconds, defaults.threshold_model_refresh_seconds).max(0.0);
        self.threshold_model_timeout_seconds =
            finite_or(self.threshold_model_timeout_seconds, defaults.threshold_model_timeout_seconds).max(0.0);
    }

    /// Overlay `updates` one key at a time, re-normalising after each.
    ///
    /// Unknown keys and values that do not fit the field's type are skipped
    /// with a warning. Integers given as floats are truncated and numeric
    /// strings are accepted for numeric fields.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>) -> AppliedUpdates {
        let mut applied = AppliedUpdates::default();
        let Some(before) = self.to_map() else {
            return applied;
        };

        for (key, value) in updates {
            let Some(mut current) = self.to_map() else {
                break;
            };
            let Some(template) = current.get(key) else {
                warn!("Ignoring unknown parameter '{}'", key);
                applied.rejected.push(key.clone());
                continue;
            };
            let coerced = coerce_like(template, value);
            current.insert(key.clone(), coerced);

            match serde_json::from_value::<Self>(Value::Object(current)) {
                Ok(mut candidate) => {
                    candidate.normalize();
                    *self = candidate;
                }
                Err(err) => {
                    warn!("Ignoring invalid value for parameter '{}': {}", key, err);
                    applied.rejected.push(key.clone());
                }
            }
        }

        if let Some(after) = self.to_map() {
            for (key, value) in after {
                if before.get(&key) != Some(&value) {
                    debug!("Parameter '{}' updated to {}", key, value);
                    applied.changed.insert(key, value);
                }
            }
        }
        applied
    }

    fn to_map(&self) -> Option<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// Operator-facing schema of every tunable
    pub fn parameter_definitions() -> Vec<ParameterDefinition> {
        use ParameterKind::*;
        vec![
            ParameterDefinition::new("symbol", Str, json!("ES"))
                .nullable()
                .label("Primary Symbol", "Ticker routed through the DOM service."),
            ParameterDefinition::new("subscription_id", Str, Value::Null)
                .nullable()
                .label("Subscription ID", "Explicit DOM subscription identifier used when filtering events."),
            ParameterDefinition::new("cooldown_seconds", Float, json!(15.0))
                .range(0.0, 900.0)
                .label("Signal Cooldown (s)", "Seconds to wait after signalling before evaluating again."),
            ParameterDefinition::new("max_loss_streak", Int, json!(3))
                .range(1.0, 10.0)
                .label("Breaker (Max Loss Streak)", "Number of consecutive losing trades allowed before pausing signals."),
            ParameterDefinition::new("signal_frequency_seconds", Float, json!(60.0))
                .range(0.0, 1800.0)
                .label("Execution Frequency (s)", "Minimum spacing in seconds between emitted signals."),
            ParameterDefinition::new("default_quantity", Int, json!(1))
                .range(0.0, 100.0)
                .label("Fallback Quantity (contracts)", "Contract count used when risk controls do not override position sizing."),
            ParameterDefinition::new("quantity_scale_exponent", Float, json!(1.0))
                .range(0.0, 4.0)
                .label("Quantity Scale Exponent", "Exponent applied to the volatility scale before inverting for quantity sizing."),
            ParameterDefinition::new("quantity_scale_bounds", Tuple, json!([0.5, 2.0]))
                .label("Quantity Scale Bounds", "Lower and upper limits for the computed quantity multiplier."),
            ParameterDefinition::new("min_processing_interval", Float, json!(0.05))
                .range(0.0, 1.0)
                .label("Metrics Sampling Interval (s)", "Throttle interval for processing incoming DOM snapshots."),
            ParameterDefinition::new("cooldown_scale_exponent", Float, json!(1.0))
                .range(0.0, 4.0)
                .label("Cooldown Scale Exponent", "Exponent applied to the volatility scale when stretching cooldown periods."),
            ParameterDefinition::new("cooldown_scale_bounds", Tuple, json!([0.5, 2.0]))
                .label("Cooldown Scale Bounds", "Lower and upper limits for the computed cooldown multiplier."),
            ParameterDefinition::new("trend_threshold", Float, json!(0.5))
                .range(0.0, 5.0)
                .nullable()
                .label("Trend Score Threshold", "Minimum DOM trend score required; set null to disable."),
            ParameterDefinition::new("structure_window_seconds", Float, json!(10.0))
                .range(1.0, 120.0)
                .label("Structure Window (s)", "Lookback window used to derive support/resistance zones."),
            ParameterDefinition::new("structure_tolerance_ticks", Float, json!(2.0))
                .range(0.0, 10.0)
                .label("Zone Tolerance (ticks)", "Tick offset accepted when matching mid price to structure levels."),
            ParameterDefinition::new("min_signal_conditions", Int, json!(3))
                .range(1.0, 6.0)
                .label("Confirmation Count", "Number of confirmation conditions that must hold before signalling."),
            ParameterDefinition::new("depth_levels", Int, json!(10))
                .range(1.0, 40.0)
                .label("Depth Levels", "Number of DOM levels used for order-book analytics."),
            ParameterDefinition::new("stacking_intensity_threshold", Float, json!(15.0))
                .range(0.0, 500.0)
                .label("Stacking Threshold (contracts)", "Minimum increase in resting depth on the signal side within the structure window."),
            ParameterDefinition::new("ofi_threshold", Float, json!(6.0))
                .range(0.0, 500.0)
                .label("Order Flow Threshold", "Absolute order flow imbalance required in favour of the trade direction."),
            ParameterDefinition::new("obi_long_threshold", Float, json!(0.58))
                .range(0.0, 1.0)
                .step(0.01)
                .label("Long OBI Threshold", "Minimum order book imbalance ratio (0-1) favouring bids before going long."),
            ParameterDefinition::new("obi_short_threshold", Float, json!(0.42))
                .range(0.0, 1.0)
                .step(0.01)
                .label("Short OBI Threshold", "Maximum order book imbalance ratio permitted when entering short positions."),
            ParameterDefinition::new("volatility_window_seconds", Float, json!(30.0))
                .range(1.0, 600.0)
                .step(1.0)
                .label("Volatility Window (s)", "Lookback window for measuring mid-price volatility in seconds."),
            ParameterDefinition::new("volatility_scale_bounds", Tuple, json!([0.75, 1.5]))
                .label("Volatility Scale Bounds", "Minimum and maximum multipliers applied to adaptive thresholds."),
            ParameterDefinition::new("fake_breakout_max", Float, json!(0.6))
                .range(0.0, 1.0)
                .step(0.01)
                .nullable()
                .label("Fake Breakout Limit", "Upper bound for the fake breakout probability metric; null disables the filter."),
            ParameterDefinition::new("momentum_tick_threshold", Float, json!(0.25))
                .range(0.0, 5.0)
                .label("Momentum Threshold (ticks)", "Required mid-price change (in ticks) since the previous snapshot."),
            ParameterDefinition::new("threshold_model_enabled", Bool, json!(false))
                .label("Enable Threshold Model", "Toggle the external threshold model client for hybrid adaptive tuning."),
            ParameterDefinition::new("threshold_model_refresh_seconds", Float, json!(1.0))
                .range(0.0, 60.0)
                .label("Threshold Model Refresh (s)", "Minimum number of seconds between external threshold model refreshes."),
            ParameterDefinition::new("threshold_model_timeout_seconds", Float, json!(0.25))
                .range(0.0, 10.0)
                .label("Threshold Model Timeout (s)", "Upper bound on a single model call; zero waits indefinitely."),
            ParameterDefinition::new("target_ofi_quantile", Float, json!(0.75))
                .range(0.0, 1.0)
                .step(0.01)
                .nullable()
                .label("Target OFI Quantile", "Desired rolling quantile for the order flow imbalance magnitude."),
            ParameterDefinition::new("target_stacking_quantile", Float, json!(0.75))
                .range(0.0, 1.0)
                .step(0.01)
                .nullable()
                .label("Target Stacking Quantile", "Desired rolling quantile for stacking intensity on the active side."),
            ParameterDefinition::new("target_obi_long_quantile", Float, json!(0.7))
                .range(0.0, 1.0)
                .step(0.01)
                .nullable()
                .label("Target Long OBI Quantile", "Rolling quantile target for order book imbalance when going long."),
            ParameterDefinition::new("target_obi_short_quantile", Float, json!(0.3))
                .range(0.0, 1.0)
                .step(0.01)
                .nullable()
                .label("Target Short OBI Quantile", "Rolling quantile target for order book imbalance when going short."),
            ParameterDefinition::new("recent_metrics_maxlen", Int, json!(128))
                .range(1.0, 4096.0)
                .label("Recent Metrics Window", "Number of metric snapshots retained for quantile blending."),
            ParameterDefinition::new("regime_volatility_breakpoints", Tuple, json!([0.9, 1.2]))
                .label("Regime Volatility Breakpoints", "Volatility scale thresholds separating calm/normal and normal/volatile regimes."),
            ParameterDefinition::new("regime_trend_breakpoints", Tuple, json!([0.1, 0.25]))
                .label("Regime Trend Breakpoints", "Absolute trend score thresholds distinguishing calm and volatile regimes."),
            ParameterDefinition::new("adaptive_threshold_smoothing", Float, json!(0.5))
                .label("Adaptive Threshold Smoothing", "Exponential smoothing factor applied to adaptive threshold updates."),
            ParameterDefinition::new("adaptive_threshold_hysteresis_ticks", Float, json!(0.25))
                .label("Adaptive Threshold Hysteresis", "Minimum absolute change required before thresholds update from raw values."),
            ParameterDefinition::new(
                "regime_condition_overrides",
                Dict,
                serde_json::to_value(default_regime_overrides()).unwrap_or(Value::Null),
            )
            .nullable()
            .label(
                "Regime Condition Overrides",
                "Mapping of regime names to overrides for required_hits, cooldown_seconds, and default_quantity.",
            ),
        ]
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Reshape `value` to match the JSON type of `template` where a lossless
/// or conventional conversion exists.
/// Negative input for an unsigned field clamps to zero so `normalize`
/// can lift it to the field minimum.
fn coerce_like(template: &Value, value: &Value) -> Value {
    match (template, value) {
        (Value::Number(current), Value::Number(new)) if current.is_u64() || current.is_i64() => {
            match new.as_f64() {
                Some(float) if float.is_finite() && (float < 0.0 || !(new.is_u64() || new.is_i64())) => {
                    integer_like(current, float)
                }
                _ => value.clone(),
            }
        }
        (Value::Number(current), Value::String(text)) => match text.trim().parse::<f64>() {
            Ok(parsed) if parsed.is_finite() && (current.is_u64() || current.is_i64()) => {
                integer_like(current, parsed)
            }
            Ok(parsed) => json!(parsed),
            Err(_) => value.clone(),
        },
        (Value::Bool(_), Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Value::Bool(true),
            "0" | "false" | "no" | "off" | "" => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn integer_like(template: &serde_json::Number, value: f64) -> Value {
    let truncated = value.trunc() as i64;
    if template.is_u64() {
        json!(truncated.max(0))
    } else {
        json!(truncated)
    }
}

fn pair_or(values: (f64, f64), fallback: (f64, f64)) -> (f64, f64) {
    if values.0.is_finite() && values.1.is_finite() {
        values
    } else {
        fallback
    }
}

/// Breakpoints become non-negative, ordered and strictly increasing.
pub fn normalize_regime_breakpoints(values: (f64, f64), fallback: (f64, f64), absolute: bool) -> (f64, f64) {
    let (mut low, mut high) = pair_or(values, fallback);
    if absolute {
        low = low.abs();
        high = high.abs();
    }
    low = low.max(0.0);
    high = high.max(0.0);
    if high < low {
        std::mem::swap(&mut low, &mut high);
    }
    if high == low {
        let increment = if low == 0.0 { 1.0 } else { (low * 0.1).max(0.01) };
        high = low + increment;
    }
    (low, high)
}

/// Volatility scale bounds: non-negative low, ordered, positive high.
pub fn normalize_volatility_bounds(bounds: (f64, f64)) -> (f64, f64) {
    let (low, high) = pair_or(bounds, DEFAULT_VOLATILITY_BOUNDS);
    let mut low = low.max(0.0);
    let mut high = high;
    if high < low {
        std::mem::swap(&mut low, &mut high);
    }
    if high <= 0.0 {
        high = 1.0;
    }
    if low == high && low <= 0.0 {
        high = 1.0;
    }
    (low, high.max(low))
}

/// Quantity/cooldown multiplier bounds: non-negative and ordered; a
/// degenerate zero range widens to the default upper bound.
pub fn normalize_scale_bounds(bounds: (f64, f64), default: (f64, f64)) -> (f64, f64) {
    let (low, high) = pair_or(bounds, default);
    let mut low = low.max(0.0);
    let mut high = high.max(0.0);
    if high < low {
        std::mem::swap(&mut low, &mut high);
    }
    if low == 0.0 && high == 0.0 {
        high = 1.0;
    }
    if low == high && low <= 0.0 {
        high = default.1;
    }
    (low, high.max(low))
}

/// Validate a regime override payload given as a map or a JSON string.
///
/// Unknown regimes are dropped, as are non-positive `required_hits` and
/// negative `cooldown_seconds` / `default_quantity`. Per-regime settings
/// may themselves be JSON strings.
pub fn normalize_regime_overrides(raw: &Value) -> RegimeOverrides {
    let mut normalized = RegimeOverrides::new();
    let parsed;
    let entries = match raw {
        Value::Object(map) => map,
        Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(map)) => {
                parsed = map;
                &parsed
            }
            _ => return normalized,
        },
        _ => return normalized,
    };

    for (regime, settings) in entries {
        let settings = match settings {
            Value::String(text) => serde_json::from_str::<Value>(text.trim()).ok(),
            other => Some(other.clone()),
        };
        let Some(Value::Object(settings)) = settings else {
            continue;
        };
        let Ok(regime) = regime.parse::<Regime>() else {
            continue;
        };

        let mut entry = RegimeOverride::default();
        if let Some(hits) = settings.get("required_hits").and_then(coerce_f64) {
            let hits = hits.round();
            if hits > 0.0 {
                entry.required_hits = Some(hits as u32);
            }
        }
        if let Some(cooldown) = settings.get("cooldown_seconds").and_then(coerce_f64) {
            if cooldown >= 0.0 {
                entry.cooldown_seconds = Some(cooldown);
            }
        }
        if let Some(quantity) = settings.get("default_quantity").and_then(coerce_f64) {
            if quantity >= 0.0 {
                entry.default_quantity = Some(quantity);
            }
        }
        if !entry.is_empty() {
            normalized.insert(regime.as_str().to_string(), entry);
        }
    }
    normalized
}

fn deserialize_regime_overrides<'de, D>(deserializer: D) -> Result<RegimeOverrides, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(normalize_regime_overrides(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn updates(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = DomStructureConfig::default();
        assert_eq!(config.cooldown_seconds, 15.0);
        assert_eq!(config.max_loss_streak, 3);
        assert_eq!(config.volatility_scale_bounds, (0.75, 1.5));
        assert_eq!(config.regime_condition_overrides["volatile"], RegimeOverride::new(4, 45.0, 0.75));
        assert_eq!(config.tick_size(), 0.25);
        assert_eq!(config.telemetry_candidates(), vec!["DOM Structure Strategy".to_string()]);
    }

    #[test]
    fn test_normalize_swaps_and_clamps() {
        let mut config = DomStructureConfig {
            symbol: " mes ".to_string(),
            cooldown_seconds: -5.0,
            default_quantity: 2.9,
            obi_long_threshold: 1.7,
            volatility_scale_bounds: (1.5, 0.75),
            quantity_scale_bounds: (0.0, 0.0),
            regime_volatility_breakpoints: (1.2, 1.2),
            regime_trend_breakpoints: (-0.3, 0.1),
            target_ofi_quantile: Some(1.4),
            fake_breakout_max: Some(f64::NAN),
            adaptive_threshold_smoothing: f64::INFINITY,
            ..DomStructureConfig::default()
        };
        config.normalize();

        assert_eq!(config.symbol, "MES");
        assert_eq!(config.subscription_id.as_deref(), Some("MES"));
        assert_eq!(config.cooldown_seconds, 0.0);
        assert_eq!(config.default_quantity, 2.0);
        assert_eq!(config.obi_long_threshold, 1.0);
        assert_eq!(config.volatility_scale_bounds, (0.75, 1.5));
        assert_eq!(config.quantity_scale_bounds, (0.0, 1.0));
        let (low, high) = config.regime_volatility_breakpoints;
        assert_eq!(low, 1.2);
        assert!((high - 1.32).abs() < 1e-12);
        assert_eq!(config.regime_trend_breakpoints, (0.1, 0.3));
        assert_eq!(config.target_ofi_quantile, Some(1.0));
        assert_eq!(config.fake_breakout_max, None);
        assert_eq!(config.adaptive_threshold_smoothing, 0.5);
    }

    #[test]
    fn test_regime_overrides_validation() {
        let raw = json!({
            "Calm": {"required_hits": 1.6, "cooldown_seconds": -1, "default_quantity": "0.25"},
            "volatile": "{\"required_hits\": 0, \"cooldown_seconds\": 60}",
            "chaotic": {"required_hits": 5},
            "normal": {"required_hits": -2}
        });
        let normalized = normalize_regime_overrides(&raw);

        assert_eq!(normalized.len(), 2);
        assert_eq!(
            normalized["calm"],
            RegimeOverride {
                required_hits: Some(2),
                cooldown_seconds: None,
                default_quantity: Some(0.25),
            }
        );
        assert_eq!(normalized["volatile"].cooldown_seconds, Some(60.0));
        assert_eq!(normalized["volatile"].required_hits, None);

        let from_string = normalize_regime_overrides(&json!("{\"normal\": {\"required_hits\": 4}}"));
        assert_eq!(from_string["normal"].required_hits, Some(4));
        assert!(normalize_regime_overrides(&json!("not json")).is_empty());
    }

    #[test]
    fn test_apply_updates_reports_only_changed_fields() {
        let mut config = DomStructureConfig::default();
        let applied = config.apply_updates(&updates(json!({
            "cooldown_seconds": 15.0,
            "ofi_threshold": 8,
            "depth_levels": 12.7,
            "volatility_scale_bounds": [2.0, 1.0],
            "trend_threshold": null,
            "unknown_knob": 1,
            "max_loss_streak": "three"
        })));

        assert!(!applied.contains("cooldown_seconds"));
        assert_eq!(applied.changed["ofi_threshold"], json!(8.0));
        assert_eq!(config.depth_levels, 12);
        assert_eq!(config.volatility_scale_bounds, (1.0, 2.0));
        assert_eq!(config.trend_threshold, None);
        assert!(applied.contains("trend_threshold"));
        assert_eq!(applied.rejected, vec!["unknown_knob".to_string(), "max_loss_streak".to_string()]);
        assert_eq!(config.max_loss_streak, 3);
    }

    #[test]
    fn test_apply_updates_clamps_negative_counts() {
        let mut config = DomStructureConfig::default();
        let applied = config.apply_updates(&updates(json!({
            "depth_levels": -5,
            "max_loss_streak": "-2",
            "min_signal_conditions": -1.5
        })));

        assert!(applied.rejected.is_empty());
        assert_eq!(config.depth_levels, 1);
        assert_eq!(config.max_loss_streak, 1);
        assert_eq!(config.min_signal_conditions, 1);
        assert_eq!(applied.changed["depth_levels"], json!(1));
    }

    #[test]
    fn test_apply_updates_accepts_string_overrides() {
        let mut config = DomStructureConfig::default();
        let applied = config.apply_updates(&updates(json!({
            "regime_condition_overrides": "{\"calm\": {\"required_hits\": 1}}",
            "threshold_model_enabled": "yes"
        })));

        assert!(applied.contains_any(&["regime_condition_overrides"]));
        assert_eq!(config.regime_condition_overrides.len(), 1);
        assert_eq!(config.regime_condition_overrides["calm"].required_hits, Some(1));
        assert!(config.threshold_model_enabled);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dom_structure.toml");
        fs::write(
            &path,
            r#"
symbol = "nq"
cooldown_seconds = 20.0
volatility_scale_bounds = [0.5, 2.5]
depth_levels = 5

[regime_condition_overrides.calm]
required_hits = 2
cooldown_seconds = 10.0
"#,
        )
        .unwrap();

        let config = DomStructureConfig::load(Some(&path)).unwrap();
        assert_eq!(config.symbol, "NQ");
        assert_eq!(config.cooldown_seconds, 20.0);
        assert_eq!(config.volatility_scale_bounds, (0.5, 2.5));
        assert_eq!(config.depth_levels, 5);
        assert_eq!(config.ofi_threshold, 6.0);
        assert_eq!(config.regime_condition_overrides.len(), 1);
        assert_eq!(config.regime_condition_overrides["calm"].cooldown_seconds, Some(10.0));
    }

    #[test]
    fn test_parameter_definitions_cover_tunables() {
        let definitions = DomStructureConfig::parameter_definitions();
        let names: Vec<&str> = definitions.iter().map(|d| d.name).collect();
        assert!(names.contains(&"regime_condition_overrides"));
        assert!(names.contains(&"threshold_model_timeout_seconds"));
        assert!(definitions.iter().find(|d| d.name == "trend_threshold").unwrap().allow_null);
    }
}
