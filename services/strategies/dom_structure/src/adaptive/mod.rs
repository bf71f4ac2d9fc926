//! # Adaptive Threshold State
//!
//! ## Purpose
//!
//! Keeps the condition thresholds in step with the market. Realised
//! volatility drives a bounded `volatility_scale` that multiplies every
//! base threshold; a recent-metrics ring supplies empirical quantiles for
//! blending; exponential smoothing with a hysteresis gate stops thresholds
//! from flapping on per-snapshot noise. Manual overrides sit on top of all
//! of it.
//!
//! ## Integration Points
//!
//! - **Input**: Mid-price samples from every accepted snapshot, tracked
//!   analytics metrics after zone detection
//! - **Output**: Volatility scale, regime classification, smoothed
//!   thresholds for the condition evaluator
//! - **Control**: Operator overrides and reset via parameter updates
//!
//! ## Architecture Role
//!
//! ```text
//! mid price ──► [VolatilityEstimator] ──► raw scale ──► clamp ──► smooth ──► volatility_scale
//!                                                                                 │
//! base threshold ──► quantile blend ──► scale_threshold ◄─────────────────────────┘
//!                                            │
//!                         override / model ──┤
//!                                            ▼
//!                                  [ThresholdSmoother] ──► condition evaluator
//! ```
//!
//! Precedence for an individual threshold: manual override, then an
//! external model value, then the quantile-blended adaptive value, then the
//! configured base.

pub mod quantile;
pub mod regime;
pub mod smoothing;
pub mod volatility;

pub use quantile::{empirical_quantile, RecentMetrics};
pub use regime::{classify_regime, Regime};
pub use smoothing::{smooth_step, SmoothingRecord, ThresholdSmoother};
pub use volatility::VolatilityEstimator;

use dom_types::coerce_f64;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Smoothing record key of the volatility scale itself
pub const VOLATILITY_SCALE_KEY: &str = "volatility_scale";

/// Tunables of the adaptive state, lifted from the strategy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveSettings {
    pub window_seconds: f64,
    pub scale_bounds: (f64, f64),
    pub volatility_breakpoints: (f64, f64),
    pub trend_breakpoints: (f64, f64),
    pub smoothing: f64,
    pub hysteresis_ticks: f64,
    pub recent_metrics_maxlen: usize,
}

/// Result of feeding one mid-price sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityUpdate {
    pub volatility: f64,
    pub volatility_scale: f64,
    pub record: SmoothingRecord,
    pub override_applied: bool,
}

#[derive(Debug, Clone)]
pub struct AdaptiveThresholdState {
    settings: AdaptiveSettings,
    estimator: VolatilityEstimator,
    volatility_scale: f64,
    smoother: ThresholdSmoother,
    recent: RecentMetrics,
    overrides: BTreeMap<String, f64>,
}

impl AdaptiveThresholdState {
    pub fn new(settings: AdaptiveSettings) -> Self {
        let estimator = VolatilityEstimator::new(settings.window_seconds);
        let recent = RecentMetrics::new(settings.recent_metrics_maxlen);
        let mut state = Self {
            settings,
            estimator,
            volatility_scale: 1.0,
            smoother: ThresholdSmoother::new(),
            recent,
            overrides: BTreeMap::new(),
        };
        state.volatility_scale = state.clamp_scale(1.0);
        state
    }

    /// Replace the tunables, keeping accumulated history
    pub fn configure(&mut self, settings: AdaptiveSettings) {
        self.estimator.set_window_seconds(settings.window_seconds);
        self.recent.set_capacity(settings.recent_metrics_maxlen);
        self.settings = settings;
        self.volatility_scale = self.clamp_scale(self.volatility_scale);
    }

    pub fn settings(&self) -> &AdaptiveSettings {
        &self.settings
    }

    /// Feed a mid-price sample and refresh the volatility scale.
    ///
    /// A manual `volatility_scale` override replaces the computed value
    /// after smoothing.
    pub fn update(&mut self, price: f64, timestamp: f64) -> VolatilityUpdate {
        let volatility = self.estimator.update(price, timestamp);
        let raw = self.clamp_scale(self.estimator.raw_scale());
        let smoothed = self.smoother.smooth(
            &[(VOLATILITY_SCALE_KEY, raw)],
            self.settings.smoothing,
            self.settings.hysteresis_ticks,
        );
        let record = smoothed
            .get(VOLATILITY_SCALE_KEY)
            .copied()
            .unwrap_or(SmoothingRecord {
                raw,
                smoothed: raw,
                hysteresis_applied: false,
            });
        self.volatility_scale = self.clamp_scale(record.smoothed);

        let override_applied = match self.overrides.get(VOLATILITY_SCALE_KEY) {
            Some(&forced) => {
                self.volatility_scale = self.clamp_scale(forced);
                true
            }
            None => false,
        };

        VolatilityUpdate {
            volatility,
            volatility_scale: self.volatility_scale,
            record,
            override_applied,
        }
    }

    pub fn volatility(&self) -> f64 {
        self.estimator.volatility()
    }

    pub fn volatility_scale(&self) -> f64 {
        self.volatility_scale
    }

    pub fn scale_bounds(&self) -> (f64, f64) {
        self.settings.scale_bounds
    }

    pub fn clamp_scale(&self, value: f64) -> f64 {
        let (low, high) = self.settings.scale_bounds;
        value.max(low).min(high)
    }

    pub fn classify_regime(&self, volatility_scale: f64, trend_score: f64) -> Regime {
        classify_regime(
            volatility_scale,
            trend_score,
            self.settings.volatility_breakpoints,
            self.settings.trend_breakpoints,
        )
    }

    /// `base * volatility_scale`, optionally clamped
    pub fn scale_threshold(&self, base: f64, minimum: Option<f64>, maximum: Option<f64>) -> f64 {
        clamp_optional(base * self.volatility_scale, minimum, maximum)
    }

    /// Empirical quantile of `metric_key` over the recent-metrics ring
    pub fn quantile_adjust(&self, metric_key: &str, target_quantile: f64) -> Option<f64> {
        self.recent.quantile(metric_key, target_quantile)
    }

    pub fn smooth(
        &mut self,
        raws: &[(&str, f64)],
        smoothing_factor: f64,
        hysteresis_ticks: f64,
    ) -> BTreeMap<String, SmoothingRecord> {
        self.smoother.smooth(raws, smoothing_factor, hysteresis_ticks)
    }

    pub fn record_metrics(&mut self, entry: BTreeMap<String, f64>) {
        self.recent.push(entry);
    }

    pub fn recent_metrics(&self) -> &RecentMetrics {
        &self.recent
    }

    /// Store manual threshold values; returns the accepted ones.
    ///
    /// Values must coerce to finite numbers. A `volatility_scale` override
    /// takes effect immediately, clamped to the scale bounds.
    pub fn apply_overrides(&mut self, values: &Map<String, Value>) -> BTreeMap<String, f64> {
        let accepted: BTreeMap<String, f64> = values
            .iter()
            .filter_map(|(key, value)| coerce_f64(value).map(|numeric| (key.clone(), numeric)))
            .collect();
        for (key, value) in &accepted {
            self.overrides.insert(key.clone(), *value);
            self.smoother.seed(key, *value);
        }
        if let Some(&forced) = accepted.get(VOLATILITY_SCALE_KEY) {
            self.volatility_scale = self.clamp_scale(forced);
        }
        accepted
    }

    pub fn override_value(&self, key: &str) -> Option<f64> {
        self.overrides.get(key).copied()
    }

    pub fn overrides(&self) -> &BTreeMap<String, f64> {
        &self.overrides
    }

    /// Drop every override; returns whether any existed
    pub fn clear_overrides(&mut self) -> bool {
        let had_overrides = !self.overrides.is_empty();
        self.overrides.clear();
        had_overrides
    }

    /// Forget volatility history, smoothing records, recent metrics and
    /// overrides.
    pub fn reset(&mut self) {
        self.estimator.reset();
        self.smoother.clear();
        self.recent.clear();
        self.overrides.clear();
        self.volatility_scale = self.clamp_scale(1.0);
    }
}

pub(crate) fn clamp_optional(value: f64, minimum: Option<f64>, maximum: Option<f64>) -> f64 {
    let value = minimum.map_or(value, |min| value.max(min));
    maximum.map_or(value, |max| value.min(max))
}
