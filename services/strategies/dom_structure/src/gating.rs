//! Gating state: throttle, cooldown, frequency guard, loss breaker,
//! regime-resolved settings and volatility-scaled sizing.

use crate::adaptive::Regime;
use crate::config::DomStructureConfig;
use crate::structure::Zone;
use dom_types::Side;
use serde::Serialize;
use strategy_shared::Tone;

/// Process-local gating timestamps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatingClock {
    /// Monotonic time of the last accepted snapshot
    pub last_process: Option<f64>,
    /// Monotonic time before which no signal may be emitted
    pub cooldown_until: f64,
    /// `cooldown_until` value the cooldown notice was last sent for
    pub cooldown_notice_until: f64,
    /// Wall-clock time of the last emitted signal
    pub last_signal_wall: Option<f64>,
    pub last_signal_monotonic: Option<f64>,
}

impl GatingClock {
    pub fn should_throttle(&self, now: f64, min_interval: f64) -> bool {
        min_interval > 0.0 && self.last_process.is_some_and(|last| now - last < min_interval)
    }

    pub fn mark_processed(&mut self, now: f64) {
        self.last_process = Some(now);
    }

    pub fn cooling_down(&self, now: f64) -> bool {
        now < self.cooldown_until
    }

    /// True the first time it is asked during a given cooldown period
    pub fn take_cooldown_notice(&mut self) -> bool {
        if self.cooldown_notice_until == self.cooldown_until {
            return false;
        }
        self.cooldown_notice_until = self.cooldown_until;
        true
    }

    pub fn clear_cooldown_notice(&mut self) {
        self.cooldown_notice_until = 0.0;
    }

    pub fn frequency_blocked(&self, now_wall: f64, signal_frequency_seconds: f64) -> bool {
        signal_frequency_seconds > 0.0
            && self
                .last_signal_wall
                .is_some_and(|last| now_wall - last < signal_frequency_seconds)
    }

    pub fn record_emission(&mut self, now: f64, now_wall: f64, scaled_cooldown: f64) {
        self.last_signal_monotonic = Some(now);
        self.last_signal_wall = Some(now_wall);
        self.cooldown_until = now + scaled_cooldown;
        self.cooldown_notice_until = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// Loss recorded, streak still below the limit
    Counting,
    /// Streak reached the limit; breaker is (still) tripped
    Tripped,
    /// Non-negative result cleared the streak
    Reset,
}

/// Consecutive-loss circuit breaker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LossBreaker {
    pub loss_streak: u32,
    pub tripped: bool,
}

impl LossBreaker {
    pub fn record(&mut self, pnl: f64, max_loss_streak: u32) -> BreakerTransition {
        if pnl < 0.0 {
            self.loss_streak = self.loss_streak.saturating_add(1);
            if self.loss_streak >= max_loss_streak.max(1) {
                self.tripped = true;
                return BreakerTransition::Tripped;
            }
            BreakerTransition::Counting
        } else {
            self.loss_streak = 0;
            self.tripped = false;
            BreakerTransition::Reset
        }
    }
}

/// Gating settings in effect for a regime
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeSettings {
    pub required_hits: u32,
    pub cooldown_seconds: f64,
    pub default_quantity: f64,
}

/// Engine-level settings overlaid by the regime's override, falling back
/// to the `normal` override for a regime without one.
pub fn resolve_regime_settings(config: &DomStructureConfig, regime: Regime) -> RegimeSettings {
    let mut settings = RegimeSettings {
        required_hits: config.min_signal_conditions.max(1),
        cooldown_seconds: config.cooldown_seconds.max(0.0),
        default_quantity: config.default_quantity.max(0.0),
    };
    let overrides = &config.regime_condition_overrides;
    let entry = overrides.get(regime.as_str()).or_else(|| {
        (regime != Regime::Normal)
            .then(|| overrides.get(Regime::Normal.as_str()))
            .flatten()
    });
    if let Some(entry) = entry {
        if let Some(hits) = entry.required_hits {
            settings.required_hits = hits.max(1);
        }
        if let Some(cooldown) = entry.cooldown_seconds {
            settings.cooldown_seconds = cooldown.max(0.0);
        }
        if let Some(quantity) = entry.default_quantity {
            settings.default_quantity = quantity.max(0.0);
        }
    }
    settings
}

pub fn clamp_scale(value: f64, bounds: (f64, f64)) -> f64 {
    let (low, high) = if bounds.1 < bounds.0 {
        (bounds.1, bounds.0)
    } else {
        bounds
    };
    value.max(low).min(high)
}

fn raw_scale(volatility_scale: f64, exponent: f64) -> f64 {
    let exponent = exponent.max(0.0);
    if exponent == 0.0 {
        1.0
    } else {
        volatility_scale.max(1e-9).powf(exponent)
    }
}

/// Size shrinks as volatility rises: `clamp(1 / scale^exponent)`
pub fn quantity_scale(volatility_scale: f64, exponent: f64, bounds: (f64, f64)) -> f64 {
    clamp_scale(1.0 / raw_scale(volatility_scale, exponent).max(1e-9), bounds)
}

/// Cooldown stretches as volatility rises: `clamp(scale^exponent)`
pub fn cooldown_scale(volatility_scale: f64, exponent: f64, bounds: (f64, f64)) -> f64 {
    clamp_scale(raw_scale(volatility_scale, exponent), bounds)
}

/// Buy out of support on non-negative imbalance, sell out of resistance on
/// non-positive imbalance.
pub fn resolve_side(zone: Zone, imbalance: f64) -> Option<Side> {
    match zone {
        Zone::Support if imbalance >= 0.0 => Some(Side::Buy),
        Zone::Resistance if imbalance <= 0.0 => Some(Side::Sell),
        _ => None,
    }
}

/// Why a zone that met its required hits did not emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    CoolingDown,
    BreakerTripped,
    FrequencyGuard,
    NoSide,
    ZeroQuantity,
    RiskDenied { reason: String },
}

impl Suppression {
    pub fn message(&self) -> String {
        match self {
            Suppression::CoolingDown => "Cooling down before next signal".to_string(),
            Suppression::BreakerTripped => "Breaker tripped due to loss streak".to_string(),
            Suppression::FrequencyGuard => "Signal suppressed by frequency guard".to_string(),
            Suppression::NoSide => "No valid signal side resolved".to_string(),
            Suppression::ZeroQuantity => "Scaled quantity is zero".to_string(),
            Suppression::RiskDenied { reason } => format!("Signal blocked by risk controls: {}", reason),
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            Suppression::NoSide => Tone::Neutral,
            _ => Tone::Warning,
        }
    }
}
