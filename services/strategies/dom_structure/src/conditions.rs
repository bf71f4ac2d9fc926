//! # Condition Evaluator
//!
//! ## Purpose
//!
//! Turns one zone-matched snapshot into eight independent confirmation
//! flags. The flow thresholds (stacking, OBI long/short, OFI) are resolved
//! through the adaptive state on every call:
//!
//! ```text
//! base ──► quantile blend ──► scale_threshold ──► raw
//!                                                  │  manual override replaces raw
//!                                                  │  else model value replaces raw
//!                                                  ▼
//!                                               smooth ──► threshold
//! ```
//!
//! Override and model values are clamped to the metric's valid range but
//! are not volatility-scaled. Every resolved threshold is reported as a
//! [`ThresholdDetail`] for signal metadata and telemetry.

use crate::adaptive::{clamp_optional, AdaptiveThresholdState, SmoothingRecord};
use crate::analytics::DomMetrics;
use crate::config::DomStructureConfig;
use crate::structure::Zone;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Sanitised thresholds returned by the external model
pub type ModelThresholds = BTreeMap<String, f64>;

/// Confirmation flags for one snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConditionFlags {
    pub zone_match: bool,
    pub stacking_condition: bool,
    pub obi_condition: bool,
    pub ofi_condition: bool,
    pub spread_condition: bool,
    pub trend_condition: bool,
    pub fake_breakout_filter: bool,
    pub momentum_condition: bool,
}

impl ConditionFlags {
    pub fn as_pairs(&self) -> [(&'static str, bool); 8] {
        [
            ("zone_match", self.zone_match),
            ("stacking_condition", self.stacking_condition),
            ("obi_condition", self.obi_condition),
            ("ofi_condition", self.ofi_condition),
            ("spread_condition", self.spread_condition),
            ("trend_condition", self.trend_condition),
            ("fake_breakout_filter", self.fake_breakout_filter),
            ("momentum_condition", self.momentum_condition),
        ]
    }

    pub fn hits(&self) -> usize {
        self.as_pairs().iter().filter(|(_, passed)| *passed).count()
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.as_pairs()
            .iter()
            .map(|(name, passed)| (name.to_string(), Value::Bool(*passed)))
            .collect()
    }
}

/// Provenance of one resolved threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdDetail {
    pub raw: f64,
    pub smoothed: f64,
    pub hysteresis_applied: bool,
    pub quantile: Option<f64>,
    pub override_applied: bool,
    pub model_applied: bool,
    /// Model value after clamping
    pub model_value: Option<f64>,
    /// Model value as returned, present only when clamping changed it
    pub model_raw: Option<f64>,
}

impl ThresholdDetail {
    pub fn from_record(record: &SmoothingRecord, quantile: Option<f64>) -> Self {
        Self {
            raw: record.raw,
            smoothed: record.smoothed,
            hysteresis_applied: record.hysteresis_applied,
            quantile,
            override_applied: false,
            model_applied: false,
            model_value: None,
            model_raw: None,
        }
    }

    /// Detail of a value forced by an operator override
    pub fn forced(value: f64) -> Self {
        Self {
            raw: value,
            smoothed: value,
            hysteresis_applied: false,
            quantile: None,
            override_applied: true,
            model_applied: false,
            model_value: None,
            model_raw: None,
        }
    }

    /// Mark the detail as model-supplied. `bounded` is the clamped value.
    pub fn with_model(mut self, bounded: f64, returned: f64) -> Self {
        self.model_applied = true;
        self.model_value = Some(bounded);
        self.model_raw = (returned != bounded).then_some(returned);
        self
    }

    /// Operator view: `{raw, smoothed, quantile}` plus the hysteresis flag
    /// and override marker when `include_flags` is set.
    pub fn format(&self, include_flags: bool) -> Value {
        let mut formatted = Map::new();
        formatted.insert("raw".into(), json!(self.raw));
        formatted.insert("smoothed".into(), json!(self.smoothed));
        formatted.insert("quantile".into(), json!(self.quantile));
        if include_flags {
            formatted.insert("hysteresis_applied".into(), json!(self.hysteresis_applied));
            if self.override_applied {
                formatted.insert("override_applied".into(), json!(true));
            }
        }
        Value::Object(formatted)
    }
}

/// Render a detail map for signal metadata
pub fn format_details(details: &BTreeMap<String, ThresholdDetail>, include_flags: bool) -> Value {
    Value::Object(
        details
            .iter()
            .map(|(key, detail)| (key.clone(), detail.format(include_flags)))
            .collect(),
    )
}

/// Snapshot-derived inputs to the evaluator
#[derive(Debug, Clone, Copy)]
pub struct ConditionInputs<'a> {
    pub zone: Zone,
    pub spread: Option<f64>,
    pub trend_score: f64,
    pub momentum: f64,
    pub momentum_ready: bool,
    pub tick_size: f64,
    pub metrics: &'a DomMetrics,
    pub model_thresholds: Option<&'a ModelThresholds>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionEvaluation {
    pub flags: ConditionFlags,
    pub details: BTreeMap<String, ThresholdDetail>,
}

impl ConditionEvaluation {
    pub fn hits(&self) -> usize {
        self.flags.hits()
    }
}

struct Resolved {
    raw: f64,
    override_applied: bool,
    model: Option<(f64, f64)>,
}

/// Apply override then model precedence to a scaled raw threshold
fn resolve_raw(
    adaptive: &AdaptiveThresholdState,
    key: &str,
    scaled: f64,
    minimum: Option<f64>,
    maximum: Option<f64>,
    model: Option<&ModelThresholds>,
) -> Resolved {
    if let Some(forced) = adaptive.override_value(key) {
        return Resolved {
            raw: clamp_optional(forced, minimum, maximum),
            override_applied: true,
            model: None,
        };
    }
    if let Some(&returned) = model.and_then(|m| m.get(key)).filter(|v| v.is_finite()) {
        let bounded = clamp_optional(returned, minimum, maximum);
        return Resolved {
            raw: bounded,
            override_applied: false,
            model: Some((bounded, returned)),
        };
    }
    Resolved {
        raw: scaled,
        override_applied: false,
        model: None,
    }
}

/// Smooth a resolved raw value and describe how it was produced
fn finish(
    adaptive: &mut AdaptiveThresholdState,
    key: &str,
    resolved: Resolved,
    quantile: Option<f64>,
    smoothing: f64,
    hysteresis: f64,
) -> ThresholdDetail {
    let smoothed = adaptive.smooth(&[(key, resolved.raw)], smoothing, hysteresis);
    let record = smoothed.get(key).copied().unwrap_or(SmoothingRecord {
        raw: resolved.raw,
        smoothed: resolved.raw,
        hysteresis_applied: false,
    });
    let mut detail = ThresholdDetail::from_record(&record, quantile);
    detail.override_applied = resolved.override_applied;
    if let Some((bounded, returned)) = resolved.model {
        detail = detail.with_model(bounded, returned);
    }
    detail
}

/// Evaluate every confirmation for a zone-matched snapshot.
///
/// Smoothing records of the four flow thresholds advance as a side effect.
pub fn evaluate_conditions(
    config: &DomStructureConfig,
    adaptive: &mut AdaptiveThresholdState,
    inputs: &ConditionInputs<'_>,
) -> ConditionEvaluation {
    let smoothing = config.adaptive_threshold_smoothing;
    let hysteresis = config.adaptive_threshold_hysteresis_ticks;
    let tick = inputs.tick_size;
    let metrics = inputs.metrics;
    let model = inputs.model_thresholds.filter(|m| !m.is_empty());
    let mut flags = ConditionFlags {
        zone_match: true,
        ..ConditionFlags::default()
    };
    let mut details = BTreeMap::new();

    // Stacking on the side the zone would trade
    let stacking_key = inputs.zone.stacking_key();
    let mut stacking_base = config.stacking_intensity_threshold;
    let stacking_quantile = config
        .target_stacking_quantile
        .and_then(|q| adaptive.quantile_adjust(stacking_key, q));
    if let Some(q) = stacking_quantile {
        stacking_base = (stacking_base + q.max(0.0)) / 2.0;
    }
    let scaled = adaptive.scale_threshold(stacking_base, Some(0.0), None);
    let resolved = resolve_raw(adaptive, stacking_key, scaled, Some(0.0), None, model);
    let stacking = finish(adaptive, stacking_key, resolved, stacking_quantile, smoothing, hysteresis);
    flags.stacking_condition = if stacking.smoothed > 0.0 {
        metrics.get(stacking_key).unwrap_or(0.0) >= stacking.smoothed
    } else {
        true
    };
    details.insert(stacking_key.to_string(), stacking);

    // Order book imbalance, long and short
    let mut obi_details = Vec::with_capacity(2);
    for (key, base, target) in [
        ("obi_long_threshold", config.obi_long_threshold, config.target_obi_long_quantile),
        ("obi_short_threshold", config.obi_short_threshold, config.target_obi_short_quantile),
    ] {
        let quantile = target
            .and_then(|q| adaptive.quantile_adjust("obi", q))
            .map(|q| q.clamp(0.0, 1.0));
        let blended = match quantile {
            Some(q) => (base + q) / 2.0,
            None => base,
        };
        let scaled = adaptive.scale_threshold(blended.clamp(0.0, 1.0), Some(0.0), Some(1.0));
        let resolved = resolve_raw(adaptive, key, scaled, Some(0.0), Some(1.0), model);
        obi_details.push((key, finish(adaptive, key, resolved, quantile, smoothing, hysteresis)));
    }
    let obi_long = obi_details[0].1.smoothed;
    let obi_short = obi_details[1].1.smoothed;
    // An empty bid side reads as OBI 0.0, which confirms a short
    flags.obi_condition = match inputs.zone {
        Zone::Support => metrics.obi >= obi_long,
        Zone::Resistance => metrics.obi <= obi_short,
    };
    for (key, detail) in obi_details {
        details.insert(key.to_string(), detail);
    }

    // Order flow imbalance; quantile blending only refines a positive base
    let mut ofi_base = config.ofi_threshold;
    let mut ofi_quantile = None;
    if ofi_base > 0.0 {
        ofi_quantile = config
            .target_ofi_quantile
            .and_then(|q| adaptive.quantile_adjust("ofi", q))
            .map(f64::abs);
        if let Some(q) = ofi_quantile {
            ofi_base = (ofi_base + q) / 2.0;
        }
    }
    let scaled = adaptive.scale_threshold(ofi_base, Some(0.0), None);
    let resolved = resolve_raw(adaptive, "ofi_threshold", scaled, Some(0.0), None, model);
    let ofi = finish(adaptive, "ofi_threshold", resolved, ofi_quantile, smoothing, hysteresis);
    flags.ofi_condition = if ofi.smoothed > 0.0 {
        match inputs.zone {
            Zone::Support => metrics.ofi >= ofi.smoothed,
            Zone::Resistance => metrics.ofi <= -ofi.smoothed,
        }
    } else {
        true
    };
    details.insert("ofi_threshold".to_string(), ofi);

    flags.spread_condition = match inputs.spread {
        Some(spread) => spread <= tick.max(config.structure_tolerance_ticks * tick),
        None => false,
    };

    flags.trend_condition = match config.trend_threshold {
        Some(threshold) => inputs.trend_score.abs() >= threshold,
        None => true,
    };

    flags.fake_breakout_filter = match config.fake_breakout_max {
        Some(max) => metrics.fake_breakout_prob <= max,
        None => true,
    };

    // Holds on the first sample too: no momentum history counts as a pass
    flags.momentum_condition = if config.momentum_tick_threshold > 0.0 && tick > 0.0 {
        !inputs.momentum_ready || inputs.momentum.abs() >= tick * config.momentum_tick_threshold
    } else {
        true
    };

    ConditionEvaluation { flags, details }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::AdaptiveSettings;
    use serde_json::json;

    fn state(config: &DomStructureConfig) -> AdaptiveThresholdState {
        AdaptiveThresholdState::new(config.adaptive_settings())
    }

    fn strong_buy_metrics() -> DomMetrics {
        DomMetrics {
            obi: 0.7,
            imbalance_ratio: 0.4,
            ofi: 12.0,
            stacking_intensity_buy: 40.0,
            stacking_intensity_sell: 0.0,
            fake_breakout_prob: 0.1,
        }
    }

    fn inputs<'a>(metrics: &'a DomMetrics, model: Option<&'a ModelThresholds>) -> ConditionInputs<'a> {
        ConditionInputs {
            zone: Zone::Support,
            spread: Some(0.25),
            trend_score: 0.6,
            momentum: 0.5,
            momentum_ready: true,
            tick_size: 0.25,
            metrics,
            model_thresholds: model,
        }
    }

    #[test]
    fn test_all_conditions_pass_for_strong_support() {
        let config = DomStructureConfig::default();
        let mut adaptive = state(&config);
        let metrics = strong_buy_metrics();
        let evaluation = evaluate_conditions(&config, &mut adaptive, &inputs(&metrics, None));

        assert_eq!(evaluation.hits(), 8);
        assert_eq!(evaluation.details["stacking_intensity_buy"].smoothed, 15.0);
        assert_eq!(evaluation.details["obi_long_threshold"].smoothed, 0.58);
        assert_eq!(evaluation.details["ofi_threshold"].smoothed, 6.0);
        assert_eq!(evaluation.details["ofi_threshold"].quantile, None);
    }

    #[test]
    fn test_resistance_requires_negative_flow() {
        let config = DomStructureConfig::default();
        let mut adaptive = state(&config);
        let metrics = DomMetrics {
            obi: 0.3,
            ofi: -7.0,
            stacking_intensity_sell: 20.0,
            ..strong_buy_metrics()
        };
        let mut input = inputs(&metrics, None);
        input.zone = Zone::Resistance;
        let evaluation = evaluate_conditions(&config, &mut adaptive, &input);

        assert!(evaluation.flags.obi_condition);
        assert!(evaluation.flags.ofi_condition);
        assert!(evaluation.flags.stacking_condition);
        assert!(evaluation.details.contains_key("stacking_intensity_sell"));
    }

    #[test]
    fn test_empty_bid_side_confirms_short_obi() {
        let config = DomStructureConfig::default();
        let mut adaptive = state(&config);
        let metrics = DomMetrics {
            obi: 0.0,
            ..strong_buy_metrics()
        };
        let mut input = inputs(&metrics, None);
        input.zone = Zone::Resistance;
        assert!(evaluate_conditions(&config, &mut adaptive, &input).flags.obi_condition);

        input.zone = Zone::Support;
        assert!(!evaluate_conditions(&config, &mut adaptive, &input).flags.obi_condition);
    }

    #[test]
    fn test_quantile_blends_with_base() {
        let config = DomStructureConfig::default();
        let mut adaptive = state(&config);
        for ofi in [2.0, 2.0, 2.0, 2.0, 2.0] {
            adaptive.record_metrics(BTreeMap::from([("ofi".to_string(), ofi)]));
        }
        let metrics = strong_buy_metrics();
        let evaluation = evaluate_conditions(&config, &mut adaptive, &inputs(&metrics, None));
        let ofi = evaluation.details["ofi_threshold"];
        assert_eq!(ofi.quantile, Some(2.0));
        assert_eq!(ofi.raw, 4.0);
    }

    #[test]
    fn test_override_beats_model_and_skips_scaling() {
        let config = DomStructureConfig::default();
        let mut adaptive = AdaptiveThresholdState::new(AdaptiveSettings {
            scale_bounds: (1.5, 2.0),
            ..config.adaptive_settings()
        });
        adaptive.apply_overrides(json!({"ofi_threshold": 20.0}).as_object().unwrap());
        let model: ModelThresholds = BTreeMap::from([
            ("ofi_threshold".to_string(), 1.0),
            ("obi_long_threshold".to_string(), 1.4),
        ]);
        let metrics = strong_buy_metrics();
        let evaluation = evaluate_conditions(&config, &mut adaptive, &inputs(&metrics, Some(&model)));

        let ofi = evaluation.details["ofi_threshold"];
        assert!(ofi.override_applied);
        assert!(!ofi.model_applied);
        assert_eq!(ofi.smoothed, 20.0);
        assert!(!evaluation.flags.ofi_condition);

        let obi_long = evaluation.details["obi_long_threshold"];
        assert!(obi_long.model_applied);
        assert_eq!(obi_long.model_value, Some(1.0));
        assert_eq!(obi_long.model_raw, Some(1.4));
        assert!(!evaluation.flags.obi_condition);

        // Stacking falls through to the scaled base: 15 * 1.5
        assert_eq!(evaluation.details["stacking_intensity_buy"].raw, 22.5);
    }

    #[test]
    fn test_missing_spread_and_disabled_filters() {
        let config = DomStructureConfig {
            trend_threshold: None,
            fake_breakout_max: None,
            momentum_tick_threshold: 0.0,
            ..DomStructureConfig::default()
        };
        let mut adaptive = state(&config);
        let metrics = DomMetrics {
            fake_breakout_prob: 0.99,
            ..strong_buy_metrics()
        };
        let mut input = inputs(&metrics, None);
        input.spread = None;
        input.trend_score = 0.0;
        input.momentum = 0.0;
        let evaluation = evaluate_conditions(&config, &mut adaptive, &input);

        assert!(!evaluation.flags.spread_condition);
        assert!(evaluation.flags.trend_condition);
        assert!(evaluation.flags.fake_breakout_filter);
        assert!(evaluation.flags.momentum_condition);
    }

    #[test]
    fn test_momentum_passes_before_warm_up() {
        let config = DomStructureConfig::default();
        let mut adaptive = state(&config);
        let metrics = strong_buy_metrics();
        let mut input = inputs(&metrics, None);
        input.momentum = 0.0;
        input.momentum_ready = false;
        assert!(evaluate_conditions(&config, &mut adaptive, &input).flags.momentum_condition);

        input.momentum_ready = true;
        assert!(!evaluate_conditions(&config, &mut adaptive, &input).flags.momentum_condition);
    }

    #[test]
    fn test_zero_thresholds_pass() {
        let config = DomStructureConfig {
            stacking_intensity_threshold: 0.0,
            ofi_threshold: 0.0,
            ..DomStructureConfig::default()
        };
        let mut adaptive = state(&config);
        let metrics = DomMetrics::default();
        let evaluation = evaluate_conditions(&config, &mut adaptive, &inputs(&metrics, None));
        assert!(evaluation.flags.stacking_condition);
        assert!(evaluation.flags.ofi_condition);
    }

    #[test]
    fn test_detail_formatting() {
        let detail = ThresholdDetail::forced(4.0);
        assert_eq!(
            detail.format(true),
            json!({"raw": 4.0, "smoothed": 4.0, "quantile": null, "hysteresis_applied": false, "override_applied": true})
        );
        assert_eq!(detail.format(false), json!({"raw": 4.0, "smoothed": 4.0, "quantile": null}));
    }
}
