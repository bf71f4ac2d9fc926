//! # DOM Structure Strategy Engine
//!
//! ## Purpose
//!
//! Turns a stream of order-book snapshots for one symbol into discrete
//! BUY/SELL signals. Price structure decides where a trade may happen
//! (support or resistance zone), order-flow confirmations decide whether
//! it should, and a stack of gates (cooldown, loss breaker, frequency
//! guard, side resolution, size, risk) decides whether it may be emitted
//! right now.
//!
//! ## Integration Points
//!
//! - **Input**: [`DomSnapshot`] via [`DomStructureStrategy::on_snapshot`]
//!   or raw JSON market events via [`Strategy::on_market_event`]
//! - **Output**: Pending signals drained by `generate_orders()`, one
//!   dispatched `dom_structure_signal` event per signal
//! - **Collaborators**: Risk authority, position provider, telemetry sink,
//!   event dispatcher, optional threshold model
//!
//! ## Architecture Role
//!
//! ```text
//! snapshot ──► [throttle] ──► [StructureWindow] ──► zone? ──► [DomAnalytics]
//!                   │                │                              │
//!                   │        [AdaptiveThresholdState] ◄── metrics ──┘
//!                   │                │
//!                   │         [ThresholdModelAdapter] (optional, bounded)
//!                   │                │
//!                   │        [evaluate_conditions] ──► hits ≥ required?
//!                   │                                        │
//!                   │    cooldown ► breaker ► frequency ► side ► size ► risk
//!                   │                                        │
//!                   └──────── telemetry ◄──────── [SignalQueue] + dispatch
//! ```
//!
//! Every snapshot is processed to completion before the next one; the
//! only suspension point is the external model call.

use crate::adaptive::{
    AdaptiveThresholdState, Regime, SmoothingRecord, VOLATILITY_SCALE_KEY,
};
use crate::analytics::{DomAnalytics, DomMetrics};
use crate::conditions::{
    evaluate_conditions, format_details, ConditionFlags, ConditionInputs, ModelThresholds, ThresholdDetail,
};
use crate::config::DomStructureConfig;
use crate::error::StrategyError;
use crate::gating::{
    cooldown_scale, quantity_scale, resolve_regime_settings, resolve_side, BreakerTransition, GatingClock,
    LossBreaker, RegimeSettings, Suppression,
};
use crate::lifecycle::LifecycleGuard;
use crate::model::{build_features, FeatureInputs, RefreshOutcome, RefreshPolicy, ThresholdModelAdapter};
use crate::signals::{build_signal_event, Signal, SignalQueue, SIGNAL_REASON};
use crate::structure::{detect_zone, StructureWindow, Zone};
use crate::telemetry::{compact, TelemetryReporter};
use crate::{log_error, log_metrics, log_model, log_signal, log_success, log_suppressed, log_warning};
use anyhow::Result;
use async_trait::async_trait;
use dom_types::{extract_contract_metadata, is_truthy, DomSnapshot, Side, SnapshotError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use strategy_shared::{
    MetricsCollector, MonotonicClock, OrderEvaluationContext, ParameterDefinition, SnapshotRecord, Strategy,
    StrategyDependencies, StrategyMetrics, SystemClock, TelemetryLevel, Tone,
};
use tracing::{debug, info, warn};

pub const STRATEGY_TYPE: &str = "dom_structure";

const ADAPTIVE_KEYS: [&str; 7] = [
    "volatility_window_seconds",
    "volatility_scale_bounds",
    "regime_volatility_breakpoints",
    "regime_trend_breakpoints",
    "adaptive_threshold_smoothing",
    "adaptive_threshold_hysteresis_ticks",
    "recent_metrics_maxlen",
];

const REGIME_KEYS: [&str; 4] = [
    "regime_condition_overrides",
    "min_signal_conditions",
    "cooldown_seconds",
    "default_quantity",
];

const TELEMETRY_KEYS: [&str; 4] = ["name", "telemetry_identifiers", "subscription_id", "symbol"];

/// Why a snapshot was not evaluated at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Inactive,
    SymbolMismatch,
    Throttled,
    UnsupportedEvent,
}

/// What happened to one snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Ignored(IgnoreReason),
    Dropped(SnapshotError),
    NoZone,
    BelowThreshold { hits: usize, required: usize },
    Suppressed(Suppression),
    Emitted { side: Side, quantity: u64 },
}

/// Regime settings after volatility scaling
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaledSettings {
    pub default_quantity: u64,
    pub default_quantity_raw: f64,
    pub cooldown_seconds: f64,
}

/// Regime state of the last snapshot that reached condition evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeContext {
    pub regime: Regime,
    pub settings: RegimeSettings,
    pub volatility: f64,
    pub volatility_scale: f64,
    pub trend_score: f64,
    pub quantity_scale: f64,
    pub cooldown_scale: f64,
    pub scaled_settings: ScaledSettings,
}

/// Everything computed for one zone-matched snapshot
struct Reading {
    mid_price: f64,
    support: f64,
    resistance: f64,
    zone: Zone,
    imbalance: f64,
    normalized_imbalance: f64,
    total_depth: f64,
    trend_score: f64,
    momentum: f64,
    spread: Option<f64>,
    metrics: DomMetrics,
    flags: ConditionFlags,
    hits: usize,
    model_thresholds: Option<ModelThresholds>,
}

pub struct DomStructureStrategy {
    config: DomStructureConfig,
    clock: Arc<dyn MonotonicClock>,
    guard: LifecycleGuard,
    dependencies: StrategyDependencies,
    telemetry: TelemetryReporter,
    metrics: MetricsCollector,

    window: StructureWindow,
    analytics: DomAnalytics,
    adaptive: AdaptiveThresholdState,
    model: ThresholdModelAdapter,
    latest_thresholds: BTreeMap<String, ThresholdDetail>,
    last_volatility_scale: f64,

    last_mid_price: Option<f64>,
    momentum_ready: bool,

    current_regime: Regime,
    regime_settings: RegimeSettings,
    regime_context: Option<RegimeContext>,

    gating: GatingClock,
    breaker: LossBreaker,
    signals: SignalQueue,
}

impl DomStructureStrategy {
    pub fn new(config: DomStructureConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Build with an explicit monotonic clock (replay, tests)
    pub fn with_clock(mut config: DomStructureConfig, clock: Arc<dyn MonotonicClock>) -> Self {
        config.normalize();
        let adaptive = AdaptiveThresholdState::new(config.adaptive_settings());
        let last_volatility_scale = adaptive.volatility_scale();
        let regime_settings = resolve_regime_settings(&config, Regime::Normal);
        Self {
            telemetry: TelemetryReporter::new(config.name.clone(), config.telemetry_candidates()),
            window: StructureWindow::new(config.structure_window_seconds),
            analytics: DomAnalytics::new(config.depth_levels, config.structure_window_seconds),
            adaptive,
            model: ThresholdModelAdapter::new(),
            latest_thresholds: BTreeMap::new(),
            last_volatility_scale,
            last_mid_price: None,
            momentum_ready: false,
            current_regime: Regime::Normal,
            regime_settings,
            regime_context: None,
            gating: GatingClock::default(),
            breaker: LossBreaker::default(),
            signals: SignalQueue::new(),
            clock,
            guard: LifecycleGuard::new(),
            dependencies: StrategyDependencies::new(),
            metrics: MetricsCollector::new(),
            config,
        }
    }

    pub fn config(&self) -> &DomStructureConfig {
        &self.config
    }

    /// Shared handle that can stop the strategy from another task
    pub fn stop_handle(&self) -> LifecycleGuard {
        self.guard.clone()
    }

    pub fn current_regime(&self) -> Regime {
        self.current_regime
    }

    pub fn regime_settings(&self) -> RegimeSettings {
        self.regime_settings
    }

    pub fn regime_context(&self) -> Option<&RegimeContext> {
        self.regime_context.as_ref()
    }

    pub fn volatility_scale(&self) -> f64 {
        self.last_volatility_scale
    }

    pub fn adaptive(&self) -> &AdaptiveThresholdState {
        &self.adaptive
    }

    pub fn latest_thresholds(&self) -> &BTreeMap<String, ThresholdDetail> {
        &self.latest_thresholds
    }

    pub fn model_thresholds(&self) -> Option<&ModelThresholds> {
        self.model.latest()
    }

    pub fn pending_signals(&self) -> usize {
        self.signals.len()
    }

    pub fn cooldown_until(&self) -> f64 {
        self.gating.cooldown_until
    }

    pub fn gating(&self) -> &GatingClock {
        &self.gating
    }

    pub fn breaker(&self) -> &LossBreaker {
        &self.breaker
    }

    pub fn momentum_ready(&self) -> bool {
        self.momentum_ready
    }

    fn drop_snapshot(&mut self, snapshot: &DomSnapshot, err: SnapshotError) -> SnapshotOutcome {
        debug!("Dropping {} snapshot: {}", snapshot.symbol, err);
        self.metrics.increment_dropped();
        if matches!(err, SnapshotError::Overflow { .. }) {
            let _ = self.telemetry.log(
                "Dropped snapshot with out-of-range book values",
                TelemetryLevel::Warn,
                Tone::Warning,
                None,
                true,
            );
        }
        SnapshotOutcome::Dropped(err)
    }

    /// Process one snapshot to completion
    pub async fn on_snapshot(&mut self, snapshot: &DomSnapshot) -> SnapshotOutcome {
        if !self.guard.is_active() {
            return SnapshotOutcome::Ignored(IgnoreReason::Inactive);
        }
        if !snapshot.symbol.trim().eq_ignore_ascii_case(&self.config.symbol) {
            return SnapshotOutcome::Ignored(IgnoreReason::SymbolMismatch);
        }
        self.record_snapshot_telemetry(snapshot);

        let now = self.clock.now();
        if self.gating.should_throttle(now, self.config.min_processing_interval) {
            return SnapshotOutcome::Ignored(IgnoreReason::Throttled);
        }
        let book = snapshot
            .mid_price()
            .and_then(|mid| snapshot.depth_totals().map(|totals| (mid, totals)));
        let (mid_price, (total_bid, total_ask)) = match book {
            Ok(book) => book,
            Err(err) => return self.drop_snapshot(snapshot, err),
        };
        self.gating.mark_processed(now);
        self.metrics.increment_processed();

        let imbalance = total_bid - total_ask;
        let total_depth = (total_bid + total_ask).max(0.0);
        let normalized_imbalance = if total_depth > 0.0 {
            imbalance / total_depth.max(1e-9)
        } else {
            0.0
        };
        let spread = snapshot.spread();
        let now_wall = snapshot.timestamp_seconds();

        self.update_structure(now_wall, mid_price);
        let Some((support, resistance)) = self.window.extremes() else {
            return SnapshotOutcome::NoZone;
        };
        let Some(zone) = detect_zone(
            mid_price,
            support,
            resistance,
            self.config.structure_tolerance_ticks,
            self.config.tick_size(),
        ) else {
            return SnapshotOutcome::NoZone;
        };

        let total = total_bid + total_ask;
        let trend_score = if total > 0.0 { imbalance / total } else { 0.0 };
        let mut volatility_scale = self.adaptive.volatility_scale();
        let volatility = self.adaptive.volatility();
        let regime = self.adaptive.classify_regime(volatility_scale, trend_score);
        self.current_regime = regime;

        let momentum = self.compute_momentum(mid_price);
        let metrics = self.update_metrics(snapshot, mid_price);

        let mut model_thresholds = None;
        if self.config.threshold_model_enabled {
            if let Some(client) = self.dependencies.threshold_model.clone() {
                let features = build_features(&FeatureInputs {
                    zone,
                    regime,
                    volatility_scale,
                    realised_volatility: volatility,
                    trend_score,
                    momentum,
                    imbalance,
                    normalized_imbalance,
                    total_depth,
                    spread,
                    last_volatility_scale: self.last_volatility_scale,
                    metrics: &metrics,
                    adaptive: &self.latest_thresholds,
                });
                let policy = RefreshPolicy {
                    now,
                    refresh_seconds: self.config.threshold_model_refresh_seconds,
                    timeout_seconds: self.config.threshold_model_timeout_seconds,
                };
                match self.model.maybe_refresh(&client, features, policy, &self.guard).await {
                    RefreshOutcome::Abandoned => return SnapshotOutcome::Ignored(IgnoreReason::Inactive),
                    RefreshOutcome::Failed(failure) => {
                        self.metrics.increment_model_failures();
                        log_model!("Threshold model unavailable for {}: {}", self.config.symbol, failure);
                        let _ = self.telemetry.log(
                            failure.telemetry_message(),
                            TelemetryLevel::Warn,
                            Tone::Warning,
                            Some(failure.details()),
                            true,
                        );
                    }
                    RefreshOutcome::Applied { count } => {
                        debug!("Threshold model supplied {} threshold(s)", count);
                    }
                    RefreshOutcome::NotDue => {}
                }
                model_thresholds = self.model.latest().cloned();
            }
        }

        if let Some(&returned) = model_thresholds
            .as_ref()
            .and_then(|thresholds| thresholds.get(VOLATILITY_SCALE_KEY))
        {
            let bounded = self.adaptive.clamp_scale(returned);
            volatility_scale = bounded;
            self.last_volatility_scale = bounded;
            let base = self
                .latest_thresholds
                .get(VOLATILITY_SCALE_KEY)
                .copied()
                .unwrap_or_else(|| {
                    ThresholdDetail::from_record(
                        &SmoothingRecord {
                            raw: bounded,
                            smoothed: bounded,
                            hysteresis_applied: false,
                        },
                        None,
                    )
                });
            let mut detail = base.with_model(bounded, returned);
            detail.smoothed = bounded;
            self.latest_thresholds.insert(VOLATILITY_SCALE_KEY.to_string(), detail);
        }

        let evaluation = evaluate_conditions(
            &self.config,
            &mut self.adaptive,
            &ConditionInputs {
                zone,
                spread,
                trend_score,
                momentum,
                momentum_ready: self.momentum_ready,
                tick_size: self.config.tick_size(),
                metrics: &metrics,
                model_thresholds: model_thresholds.as_ref(),
            },
        );
        let hits = evaluation.hits();
        self.latest_thresholds.extend(evaluation.details);

        let settings = resolve_regime_settings(&self.config, regime);
        self.regime_settings = settings;
        let qscale = quantity_scale(
            volatility_scale,
            self.config.quantity_scale_exponent,
            self.config.quantity_scale_bounds,
        );
        let cscale = cooldown_scale(
            volatility_scale,
            self.config.cooldown_scale_exponent,
            self.config.cooldown_scale_bounds,
        );
        let scaled_quantity = (settings.default_quantity * qscale).max(0.0);
        let contract_quantity = scaled_quantity.floor() as u64;
        let scaled_cooldown = (settings.cooldown_seconds * cscale).max(0.0);
        self.regime_context = Some(RegimeContext {
            regime,
            settings,
            volatility,
            volatility_scale,
            trend_score,
            quantity_scale: qscale,
            cooldown_scale: cscale,
            scaled_settings: ScaledSettings {
                default_quantity: contract_quantity,
                default_quantity_raw: scaled_quantity,
                cooldown_seconds: scaled_cooldown,
            },
        });

        let required = settings.required_hits as usize;
        if hits < required {
            let mut details = Map::new();
            details.insert("hits".into(), json!(hits));
            details.insert("required".into(), json!(required));
            details.insert("conditions".into(), Value::Object(evaluation.flags.to_map()));
            let _ = self.telemetry.log(
                "DOM confirmations below threshold",
                TelemetryLevel::Info,
                Tone::Neutral,
                Some(details),
                true,
            );
            log_suppressed!("{} {} confirmations {}/{}", self.config.symbol, zone, hits, required);
            return SnapshotOutcome::BelowThreshold { hits, required };
        }
        let _ = self.telemetry.record_threshold_hit(self.compose_detail_payload());

        let reading = Reading {
            mid_price,
            support,
            resistance,
            zone,
            imbalance,
            normalized_imbalance,
            total_depth,
            trend_score,
            momentum,
            spread,
            metrics,
            flags: evaluation.flags,
            hits,
            model_thresholds,
        };
        self.gate_and_emit(snapshot, reading, now_wall).await
    }

    async fn gate_and_emit(&mut self, snapshot: &DomSnapshot, reading: Reading, now_wall: f64) -> SnapshotOutcome {
        let now = self.clock.now();
        if self.gating.cooling_down(now) {
            if self.gating.take_cooldown_notice() {
                let _ = self.telemetry.status(&Suppression::CoolingDown.message(), Tone::Warning, None);
            }
            self.metrics.increment_suppressed();
            log_suppressed!("{} cooling down until {:.3}", self.config.symbol, self.gating.cooldown_until);
            return SnapshotOutcome::Suppressed(Suppression::CoolingDown);
        }
        self.gating.clear_cooldown_notice();

        if self.breaker.tripped {
            return self.suppress(Suppression::BreakerTripped, None);
        }
        if self
            .gating
            .frequency_blocked(now_wall, self.config.signal_frequency_seconds)
        {
            return self.suppress(Suppression::FrequencyGuard, None);
        }
        let Some(side) = resolve_side(reading.zone, reading.imbalance) else {
            return self.suppress(Suppression::NoSide, None);
        };
        let Some(context) = self.regime_context.clone() else {
            return self.suppress(Suppression::ZeroQuantity, None);
        };
        let quantity = context.scaled_settings.default_quantity;
        if quantity == 0 {
            return self.suppress(Suppression::ZeroQuantity, None);
        }
        if let Err(reason) = self.check_risk(side, quantity) {
            let mut details = Map::new();
            details.insert("risk_reason".into(), json!(reason));
            return self.suppress(Suppression::RiskDenied { reason }, Some(details));
        }

        let metadata = self.build_metadata(snapshot, &reading, &context, quantity);
        let signal = Signal::new(
            side,
            context.scaled_settings.default_quantity_raw,
            SIGNAL_REASON,
            metadata,
        )
        .at(snapshot.received_at);
        let emitted_quantity = signal.quantity;
        let event = build_signal_event(&signal);
        let details = signal.metadata.clone();
        if self.signals.push(signal).is_some() {
            debug!("Signal queue full; evicted oldest pending signal");
        }

        if let Some(dispatcher) = self.dependencies.event_dispatcher.clone() {
            if let Err(err) = dispatcher.dispatch(&self.config.name, event).await {
                self.metrics.increment_errors();
                log_error!(
                    "{}",
                    StrategyError::Dispatch {
                        message: err.to_string()
                    }
                );
            }
        }

        self.gating
            .record_emission(now, now_wall, context.scaled_settings.cooldown_seconds);
        let _ = self.telemetry.record_signal(side);
        let _ = self
            .telemetry
            .log("Signal generated", TelemetryLevel::Info, Tone::Positive, Some(details), false);
        self.metrics.increment_signals();
        log_signal!(
            "{} {} x{} at {:.2} ({} zone, {} hits, regime {})",
            self.config.symbol,
            side,
            emitted_quantity,
            reading.mid_price,
            reading.zone,
            reading.hits,
            context.regime
        );
        SnapshotOutcome::Emitted {
            side,
            quantity: emitted_quantity,
        }
    }

    fn suppress(&mut self, suppression: Suppression, details: Option<Map<String, Value>>) -> SnapshotOutcome {
        let message = suppression.message();
        let _ = self.telemetry.status(&message, suppression.tone(), details);
        self.metrics.increment_suppressed();
        log_suppressed!("{} {}", self.config.symbol, message);
        SnapshotOutcome::Suppressed(suppression)
    }

    fn check_risk(&self, side: Side, quantity: u64) -> std::result::Result<(), String> {
        let Some(authority) = self.dependencies.risk_authority.as_ref() else {
            return Ok(());
        };
        let context = OrderEvaluationContext {
            symbol: self.config.symbol.clone(),
            side,
            quantity,
            current_position: self.current_position(),
        };
        match authority.evaluate_order(&context) {
            Ok(decision) if decision.permitted => Ok(()),
            Ok(decision) => {
                let reason = decision
                    .reason
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| "Risk engine denied order".to_string());
                info!("Risk engine blocked DOM order: {}", reason);
                Err(reason)
            }
            Err(err) => {
                warn!("Risk engine evaluation failed: {}", err);
                Err(format!("Risk engine error: {}", err))
            }
        }
    }

    fn current_position(&self) -> f64 {
        let Some(provider) = self.dependencies.position_provider.as_ref() else {
            return 0.0;
        };
        match provider.position(&self.config.symbol) {
            Ok(position) if position.is_finite() => position,
            Ok(_) => 0.0,
            Err(err) => {
                debug!("Position lookup failed for {}: {}", self.config.symbol, err);
                0.0
            }
        }
    }

    fn record_snapshot_telemetry(&self, snapshot: &DomSnapshot) {
        if !self.telemetry.has_sink() {
            return;
        }
        let subscription_id = snapshot
            .metadata
            .get("subscription_id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.config.subscription_id.clone())
            .or_else(|| (!self.config.symbol.is_empty()).then(|| self.config.symbol.clone()));
        let record = SnapshotRecord {
            timestamp: snapshot.received_at,
            subscription_id,
            symbol: snapshot.symbol.clone(),
        };
        let _ = self.telemetry.record_snapshot(&record);
    }

    fn update_structure(&mut self, timestamp: f64, mid_price: f64) {
        self.window.record(timestamp, mid_price);
        let update = self.adaptive.update(mid_price, timestamp);
        self.last_volatility_scale = update.volatility_scale;

        let mut detail = ThresholdDetail::from_record(&update.record, None);
        detail.override_applied = update.override_applied;
        self.latest_thresholds
            .insert(VOLATILITY_SCALE_KEY.to_string(), detail);

        self.adaptive.record_metrics(BTreeMap::from([
            ("timestamp".to_string(), timestamp),
            ("mid_price".to_string(), mid_price),
            (VOLATILITY_SCALE_KEY.to_string(), update.volatility_scale),
        ]));
    }

    fn compute_momentum(&mut self, mid_price: f64) -> f64 {
        match self.last_mid_price.replace(mid_price) {
            Some(previous) => {
                self.momentum_ready = true;
                mid_price - previous
            }
            None => {
                self.momentum_ready = false;
                0.0
            }
        }
    }

    fn reset_momentum(&mut self) {
        self.last_mid_price = None;
        self.momentum_ready = false;
    }

    fn update_metrics(&mut self, snapshot: &DomSnapshot, mid_price: f64) -> DomMetrics {
        let metrics = self.analytics.update(snapshot, mid_price);
        let tracked: BTreeMap<String, f64> = metrics
            .tracked()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        if !tracked.is_empty() {
            self.adaptive.record_metrics(tracked);
        }
        metrics
    }

    /// Regime context and adaptive thresholds for threshold-hit telemetry
    fn compose_detail_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        match &self.regime_context {
            Some(context) => {
                payload.insert("regime".into(), json!(context.regime));
                payload.insert("regime_settings".into(), json!(context.settings));
                payload.insert("volatility".into(), json!(context.volatility));
                payload.insert("volatility_scale".into(), json!(context.volatility_scale));
                payload.insert("trend_score".into(), json!(context.trend_score));
            }
            None => {
                payload.insert("regime".into(), json!(self.current_regime));
                payload.insert("volatility_scale".into(), json!(self.adaptive.volatility_scale()));
            }
        }
        if !self.latest_thresholds.is_empty() {
            payload.insert(
                "adaptive_thresholds".into(),
                format_details(&self.latest_thresholds, true),
            );
            payload.insert(
                "adaptive_debug".into(),
                format_details(&self.latest_thresholds, false),
            );
        }
        compact(payload)
    }

    fn build_metadata(
        &self,
        snapshot: &DomSnapshot,
        reading: &Reading,
        context: &RegimeContext,
        order_quantity: u64,
    ) -> Map<String, Value> {
        let tick_size = self.config.tick_size();
        let metrics = &reading.metrics;
        let stacking = metrics.get(reading.zone.stacking_key());
        let momentum_ticks = if tick_size != 0.0 {
            reading.momentum / tick_size
        } else {
            reading.momentum
        };

        let mut metadata = Map::new();
        metadata.insert("zone".into(), json!(reading.zone.as_str()));
        metadata.insert("mid_price".into(), json!(reading.mid_price));
        metadata.insert("support".into(), json!(reading.support));
        metadata.insert("resistance".into(), json!(reading.resistance));
        metadata.insert("imbalance".into(), json!(reading.imbalance));
        metadata.insert("normalized_imbalance".into(), json!(reading.normalized_imbalance));
        metadata.insert("total_depth".into(), json!(reading.total_depth));
        metadata.insert("trend_score".into(), json!(reading.trend_score));
        metadata.insert("momentum".into(), json!(reading.momentum));
        metadata.insert("spread".into(), json!(reading.spread));
        metadata.insert("condition_hits".into(), json!(reading.hits));
        metadata.insert("volatility".into(), json!(context.volatility));
        metadata.insert("volatility_scale".into(), json!(context.volatility_scale));
        metadata.insert("quantity_scale".into(), json!(context.quantity_scale));
        metadata.insert("cooldown_scale".into(), json!(context.cooldown_scale));
        metadata.insert(
            "scaled_quantity".into(),
            json!(context.scaled_settings.default_quantity_raw),
        );
        metadata.insert("order_quantity".into(), json!(order_quantity));
        metadata.insert(
            "scaled_cooldown".into(),
            json!(context.scaled_settings.cooldown_seconds),
        );
        metadata.insert("regime".into(), json!(context.regime));
        metadata.insert("volatility_regime".into(), json!(context.regime));
        metadata.insert("regime_settings".into(), json!(context.settings));
        metadata.insert("obi".into(), json!(metrics.obi));
        metadata.insert("ofi".into(), json!(metrics.ofi));
        metadata.insert("stacking_intensity".into(), json!(stacking));
        metadata.insert("fake_breakout_prob".into(), json!(metrics.fake_breakout_prob));
        metadata.insert("momentum_ticks".into(), json!(momentum_ticks));
        metadata.insert(
            "metrics_snapshot".into(),
            json!({
                "obi": metrics.obi,
                "ofi": metrics.ofi,
                "stacking": stacking,
                "imbalance_ratio": metrics.imbalance_ratio,
                "fake_breakout_prob": metrics.fake_breakout_prob,
            }),
        );
        metadata.insert("conditions".into(), Value::Object(reading.flags.to_map()));
        metadata.insert("entry_price_hint".into(), json!(reading.mid_price));
        if let Some(thresholds) = reading.model_thresholds.as_ref().filter(|t| !t.is_empty()) {
            metadata.insert("model_thresholds".into(), json!(thresholds));
        }
        if !self.latest_thresholds.is_empty() {
            metadata.insert(
                "adaptive_thresholds".into(),
                format_details(&self.latest_thresholds, true),
            );
            metadata.insert(
                "adaptive_debug".into(),
                format_details(&self.latest_thresholds, false),
            );
        }

        metadata.extend(extract_contract_metadata(&[&snapshot.metadata]));
        if !metadata.contains_key("subscription_id") {
            let subscription = non_empty_str(snapshot.metadata.get("subscription_id"))
                .or_else(|| self.config.subscription_id.clone())
                .or_else(|| (!self.config.symbol.is_empty()).then(|| self.config.symbol.clone()))
                .unwrap_or_else(|| snapshot.symbol.clone());
            metadata.insert("subscription_id".into(), json!(subscription));
        }
        if !metadata.get("symbol").is_some_and(is_truthy) {
            let symbol = non_empty_str(snapshot.metadata.get("symbol")).unwrap_or_else(|| snapshot.symbol.clone());
            metadata.insert("symbol".into(), json!(symbol));
        }
        metadata
    }

    fn apply_special_updates(
        &mut self,
        override_update: Option<Value>,
        reset_update: Option<Value>,
        result: &mut Map<String, Value>,
    ) {
        if reset_update.as_ref().is_some_and(reset_requested) {
            self.adaptive.reset();
            self.latest_thresholds.clear();
            self.last_volatility_scale = self.adaptive.volatility_scale();
            info!("Adaptive threshold state reset for {}", self.config.name);
            result.insert("reset_adaptive_state".into(), json!(true));
        }

        match override_update {
            Some(Value::Object(overrides)) if !overrides.is_empty() => {
                let accepted = self.adaptive.apply_overrides(&overrides);
                for (key, value) in &accepted {
                    self.latest_thresholds
                        .insert(key.clone(), ThresholdDetail::forced(*value));
                }
                if accepted.contains_key(VOLATILITY_SCALE_KEY) {
                    self.last_volatility_scale = self.adaptive.volatility_scale();
                }
                result.insert("adaptive_threshold_override".into(), json!(accepted));
            }
            Some(_) => {
                if self.adaptive.clear_overrides() {
                    info!("Cleared adaptive threshold overrides for {}", self.config.name);
                }
                result.insert("adaptive_threshold_override".into(), json!({}));
            }
            None => {}
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn reset_requested(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        other => is_truthy(other),
    }
}

#[async_trait]
impl Strategy for DomStructureStrategy {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn strategy_type(&self) -> &'static str {
        STRATEGY_TYPE
    }

    fn set_dependencies(&mut self, dependencies: StrategyDependencies) {
        let StrategyDependencies {
            risk_authority,
            position_provider,
            telemetry,
            event_dispatcher,
            threshold_model,
        } = dependencies;
        if risk_authority.is_some() {
            self.dependencies.risk_authority = risk_authority;
        }
        if position_provider.is_some() {
            self.dependencies.position_provider = position_provider;
        }
        if let Some(sink) = telemetry {
            self.telemetry.set_sink(Arc::clone(&sink));
            self.dependencies.telemetry = Some(sink);
        }
        if event_dispatcher.is_some() {
            self.dependencies.event_dispatcher = event_dispatcher;
        }
        if threshold_model.is_some() {
            self.dependencies.threshold_model = threshold_model;
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.config.symbol.is_empty() {
            log_warning!("DOM structure strategy {} requires a symbol", self.config.name);
            return Err(StrategyError::configuration("symbol is required").into());
        }
        if self.dependencies.event_dispatcher.is_none() {
            log_warning!("DOM structure strategy {} missing event dispatcher", self.config.name);
            return Err(StrategyError::lifecycle("event dispatcher dependency is required").into());
        }
        if self.guard.is_active() {
            return Ok(());
        }
        self.guard.activate();
        let _ = self
            .telemetry
            .start_session(self.config.subscription_id.as_deref(), Some(self.config.symbol.as_str()));
        log_success!(
            "DOM structure strategy {} started on {}",
            self.config.name,
            self.config.symbol
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.guard.is_active() {
            return Ok(());
        }
        self.guard.deactivate();
        let _ = self.telemetry.stop_session();
        let metrics = self.metrics.get_metrics();
        log_metrics!(
            "DOM structure strategy {} stopped: processed={} dropped={} signals={} suppressed={} model_failures={}",
            self.config.name,
            metrics.snapshots_processed,
            metrics.snapshots_dropped,
            metrics.signals_generated,
            metrics.signals_suppressed,
            metrics.model_failures
        );
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.guard.is_active()
    }

    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        DomStructureConfig::parameter_definitions()
    }

    fn apply_parameter_updates(&mut self, updates: &Map<String, Value>) -> Map<String, Value> {
        if updates.is_empty() {
            return Map::new();
        }
        let mut remaining = updates.clone();
        let override_update = remaining.remove("adaptive_threshold_override");
        let reset_update = remaining.remove("reset_adaptive_state");

        let applied = self.config.apply_updates(&remaining);
        let mut result = applied.changed.clone();
        self.apply_special_updates(override_update, reset_update, &mut result);

        if applied.contains("depth_levels") {
            self.analytics = DomAnalytics::new(self.config.depth_levels, self.config.structure_window_seconds);
            self.reset_momentum();
        }
        if applied.contains_any(&ADAPTIVE_KEYS) {
            self.adaptive.configure(self.config.adaptive_settings());
            self.last_volatility_scale = self.adaptive.volatility_scale();
        }
        if applied.contains_any(&REGIME_KEYS) {
            self.regime_settings = resolve_regime_settings(&self.config, self.current_regime);
        }
        if applied.contains("momentum_tick_threshold") {
            self.reset_momentum();
        }
        if applied.contains("structure_window_seconds") {
            self.window
                .set_window_seconds(self.config.structure_window_seconds);
            self.analytics
                .set_window_seconds(self.config.structure_window_seconds);
        }
        if applied.contains_any(&TELEMETRY_KEYS) {
            self.telemetry
                .set_candidates(self.config.telemetry_candidates());
        }
        if !result.is_empty() {
            info!("Applied parameter updates to {}: {:?}", self.config.name, result.keys().collect::<Vec<_>>());
        }
        result
    }

    async fn on_market_event(&mut self, event: &Value) -> Result<()> {
        if !self.guard.is_active() {
            return Ok(());
        }
        let snapshot = match DomSnapshot::from_market_event(event, &self.config.symbol) {
            Ok(snapshot) => snapshot,
            Err(SnapshotError::UnsupportedEventType { event_type }) => {
                debug!("Ignoring market event of type {}", event_type);
                return Ok(());
            }
            Err(err) => {
                self.metrics.increment_dropped();
                debug!("Dropping malformed market event: {}", err);
                return Ok(());
            }
        };
        self.on_snapshot(&snapshot).await;
        Ok(())
    }

    fn generate_orders(&mut self) -> Vec<Map<String, Value>> {
        let orders: Vec<Map<String, Value>> = self.signals.drain().iter().map(Signal::to_order).collect();
        if orders.is_empty() {
            debug!("No pending DOM signals to convert into orders");
        } else {
            info!("Generated {} order(s) from DOM signals", orders.len());
        }
        orders
    }

    fn record_trade_result(&mut self, pnl: f64) {
        match self.breaker.record(pnl, self.config.max_loss_streak) {
            BreakerTransition::Tripped => {
                let _ = self.telemetry.log(
                    "Loss breaker tripped",
                    TelemetryLevel::Warn,
                    Tone::Warning,
                    None,
                    true,
                );
            }
            BreakerTransition::Counting => {
                debug!("Loss streak {} for {}", self.breaker.loss_streak, self.config.name);
            }
            BreakerTransition::Reset => {
                let _ = self.telemetry.clear_status();
                let _ = self.telemetry.status("Loss breaker reset", Tone::Neutral, None);
            }
        }
    }

    fn metrics(&self) -> StrategyMetrics {
        self.metrics.get_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dom_types::DomLevel;
    use rust_decimal_macros::dec;
    use strategy_shared::testing::{MockRiskAuthority, RecordingDispatcher, RecordingTelemetry};
    use strategy_shared::ManualClock;

    fn config() -> DomStructureConfig {
        DomStructureConfig {
            name: "dom-es".to_string(),
            symbol: "ES".to_string(),
            min_signal_conditions: 1,
            regime_condition_overrides: BTreeMap::new(),
            min_processing_interval: 0.0,
            signal_frequency_seconds: 0.0,
            ..DomStructureConfig::default()
        }
    }

    fn snapshot(seconds: i64, bid_size: i64, ask_size: i64) -> DomSnapshot {
        DomSnapshot::new(
            "ES",
            vec![DomLevel::new(dec!(5000.00), bid_size.into())],
            vec![DomLevel::new(dec!(5000.25), ask_size.into())],
            Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap(),
        )
    }

    async fn started(config: DomStructureConfig) -> (DomStructureStrategy, Arc<ManualClock>, Arc<RecordingDispatcher>) {
        let clock = Arc::new(ManualClock::new(100.0));
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let mut strategy = DomStructureStrategy::with_clock(config, clock.clone());
        strategy.set_dependencies(
            StrategyDependencies::new()
                .with_event_dispatcher(dispatcher.clone())
                .with_telemetry(Arc::new(RecordingTelemetry::new()))
                .with_risk_authority(Arc::new(MockRiskAuthority::permit_all())),
        );
        strategy.start().await.unwrap();
        (strategy, clock, dispatcher)
    }

    #[tokio::test]
    async fn test_start_requires_dispatcher_and_symbol() {
        let mut strategy = DomStructureStrategy::new(config());
        assert!(strategy.start().await.is_err());
        assert!(!strategy.is_active());

        let mut unnamed = DomStructureStrategy::new(DomStructureConfig {
            symbol: String::new(),
            ..config()
        });
        unnamed.set_dependencies(StrategyDependencies::new().with_event_dispatcher(Arc::new(RecordingDispatcher::new())));
        let err = unnamed.start().await.unwrap_err();
        assert!(err.to_string().contains("symbol"));
    }

    #[tokio::test]
    async fn test_inactive_and_foreign_snapshots_are_ignored() {
        let mut strategy = DomStructureStrategy::new(config());
        assert_eq!(
            strategy.on_snapshot(&snapshot(0, 10, 5)).await,
            SnapshotOutcome::Ignored(IgnoreReason::Inactive)
        );

        let (mut strategy, _, _) = started(config()).await;
        let mut foreign = snapshot(0, 10, 5);
        foreign.symbol = "NQ".to_string();
        assert_eq!(
            strategy.on_snapshot(&foreign).await,
            SnapshotOutcome::Ignored(IgnoreReason::SymbolMismatch)
        );
    }

    #[tokio::test]
    async fn test_first_snapshot_emits_buy_from_support() {
        let (mut strategy, _, dispatcher) = started(config()).await;
        let outcome = strategy.on_snapshot(&snapshot(0, 30, 10)).await;
        assert_eq!(
            outcome,
            SnapshotOutcome::Emitted {
                side: Side::Buy,
                quantity: 1
            }
        );
        assert_eq!(dispatcher.event_count(), 1);
        assert_eq!(strategy.pending_signals(), 1);
        assert_eq!(strategy.cooldown_until(), 115.0);
        assert_eq!(strategy.metrics().signals_generated, 1);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_without_emitting() {
        let (mut strategy, clock, dispatcher) = started(config()).await;
        strategy.on_snapshot(&snapshot(0, 30, 10)).await;
        clock.advance(1.0);
        let outcome = strategy.on_snapshot(&snapshot(1, 30, 10)).await;
        assert_eq!(outcome, SnapshotOutcome::Suppressed(Suppression::CoolingDown));
        assert_eq!(dispatcher.event_count(), 1);
        assert_eq!(strategy.cooldown_until(), 115.0);
    }

    #[tokio::test]
    async fn test_throttle_and_invalid_mid() {
        let (mut strategy, _, _) = started(DomStructureConfig {
            min_processing_interval: 0.5,
            ..config()
        })
        .await;
        let empty = DomSnapshot::new("ES", vec![], vec![], Utc::now());
        assert!(matches!(strategy.on_snapshot(&empty).await, SnapshotOutcome::Dropped(_)));
        assert_eq!(strategy.gating().last_process, None);

        strategy.on_snapshot(&snapshot(0, 30, 10)).await;
        assert_eq!(
            strategy.on_snapshot(&snapshot(0, 30, 10)).await,
            SnapshotOutcome::Ignored(IgnoreReason::Throttled)
        );
    }

    #[tokio::test]
    async fn test_breaker_blocks_until_win() {
        let (mut strategy, clock, _) = started(DomStructureConfig {
            cooldown_seconds: 0.0,
            ..config()
        })
        .await;
        for _ in 0..3 {
            strategy.record_trade_result(-10.0);
        }
        assert!(strategy.breaker().tripped);
        assert_eq!(
            strategy.on_snapshot(&snapshot(0, 30, 10)).await,
            SnapshotOutcome::Suppressed(Suppression::BreakerTripped)
        );
        strategy.record_trade_result(5.0);
        clock.advance(1.0);
        assert!(matches!(
            strategy.on_snapshot(&snapshot(1, 30, 10)).await,
            SnapshotOutcome::Emitted { .. }
        ));
    }

    #[tokio::test]
    async fn test_risk_denial_reason_is_reported() {
        let (mut strategy, _, dispatcher) = started(config()).await;
        strategy.set_dependencies(
            StrategyDependencies::new().with_risk_authority(Arc::new(MockRiskAuthority::deny_all("max position"))),
        );
        assert_eq!(
            strategy.on_snapshot(&snapshot(0, 30, 10)).await,
            SnapshotOutcome::Suppressed(Suppression::RiskDenied {
                reason: "max position".to_string()
            })
        );
        assert_eq!(dispatcher.event_count(), 0);
        assert_eq!(strategy.cooldown_until(), 0.0);
    }

    #[tokio::test]
    async fn test_resistance_with_bid_pressure_has_no_side() {
        let (mut strategy, clock, _) = started(DomStructureConfig {
            structure_tolerance_ticks: 0.0,
            ..config()
        })
        .await;
        let low = DomSnapshot::new(
            "ES",
            vec![DomLevel::new(dec!(4999.00), dec!(5))],
            vec![DomLevel::new(dec!(4999.25), dec!(30))],
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );
        strategy.on_snapshot(&low).await;
        clock.advance(100.0);
        let outcome = strategy.on_snapshot(&snapshot(1, 30, 10)).await;
        assert_eq!(outcome, SnapshotOutcome::Suppressed(Suppression::NoSide));
    }

    #[test]
    fn test_parameter_updates_reconfigure() {
        let mut strategy = DomStructureStrategy::new(config());
        let updates = json!({
            "depth_levels": 5,
            "structure_window_seconds": 20.0,
            "adaptive_threshold_override": {"ofi_threshold": 3.5},
            "unknown": 1,
        });
        let applied = strategy.apply_parameter_updates(updates.as_object().unwrap());
        assert_eq!(applied["depth_levels"], json!(5));
        assert_eq!(applied["adaptive_threshold_override"], json!({"ofi_threshold": 3.5}));
        assert!(!applied.contains_key("unknown"));
        assert!(strategy.latest_thresholds()["ofi_threshold"].override_applied);

        let cleared = strategy.apply_parameter_updates(json!({"adaptive_threshold_override": null}).as_object().unwrap());
        assert_eq!(cleared["adaptive_threshold_override"], json!({}));
        assert!(strategy.adaptive().overrides().is_empty());

        let reset = strategy.apply_parameter_updates(json!({"reset_adaptive_state": "yes"}).as_object().unwrap());
        assert_eq!(reset["reset_adaptive_state"], json!(true));
        assert!(strategy.latest_thresholds().is_empty());
    }

    #[test]
    fn test_reset_flag_parsing() {
        assert!(reset_requested(&json!(true)));
        assert!(reset_requested(&json!("On")));
        assert!(!reset_requested(&json!("no")));
        assert!(!reset_requested(&json!(false)));
        assert!(reset_requested(&json!(1)));
    }
}
