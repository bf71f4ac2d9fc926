//! # DOM Structure Strategy
//!
//! Adaptive depth-of-market signal engine for a single futures symbol.
//!
//! ## Overview
//!
//! Each order-book snapshot is placed against the recent price structure.
//! A mid price near the window low is a support zone, near the high a
//! resistance zone. Inside a zone, up to eight order-flow confirmations
//! are evaluated against thresholds that scale with realised volatility,
//! blend toward recent empirical quantiles, and are smoothed with a
//! hysteresis gate. Enough confirmations for the current market regime
//! produce a signal, subject to cooldown, loss breaker, frequency guard
//! and risk approval.
//!
//! ## Module Map
//!
//! - [`structure`]: time-bounded mid-price window, support/resistance zones
//! - [`analytics`]: OBI, OFI, depth stacking, fake-breakout probability
//! - [`adaptive`]: volatility scale, regimes, quantiles, smoothing, overrides
//! - [`conditions`]: the eight confirmations and threshold provenance
//! - [`model`]: optional external threshold model with timeout
//! - [`gating`]: throttle, cooldown, breaker, regime settings, sizing
//! - [`signals`]: signal type, bounded queue, dispatched event shape
//! - [`telemetry`]: candidate-fallback telemetry reporter
//! - [`strategy`]: the engine tying the pipeline together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dom_structure_strategy::{DomStructureConfig, DomStructureStrategy};
//! use strategy_shared::{Strategy, StrategyDependencies};
//! # use std::sync::Arc;
//! # async fn run(dispatcher: Arc<dyn strategy_shared::EventDispatcher>) -> anyhow::Result<()> {
//! let config = DomStructureConfig::load(None)?;
//! let mut strategy = DomStructureStrategy::new(config);
//! strategy.set_dependencies(StrategyDependencies::new().with_event_dispatcher(dispatcher));
//! strategy.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod adaptive;
pub mod analytics;
pub mod conditions;
pub mod config;
pub mod error;
pub mod gating;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod signals;
pub mod strategy;
pub mod structure;
pub mod telemetry;

pub use adaptive::{AdaptiveSettings, AdaptiveThresholdState, Regime};
pub use analytics::{DomAnalytics, DomMetrics};
pub use conditions::{ConditionFlags, ModelThresholds, ThresholdDetail};
pub use config::{DomStructureConfig, RegimeOverride, CONFIG_PATH_ENV};
pub use error::{Result, StrategyError};
pub use gating::{RegimeSettings, Suppression};
pub use lifecycle::LifecycleGuard;
pub use model::{BlockingThresholdModel, ModelFailure, ThresholdModelAdapter};
pub use signals::{Signal, SignalQueue};
pub use strategy::{DomStructureStrategy, IgnoreReason, RegimeContext, SnapshotOutcome, STRATEGY_TYPE};
pub use structure::{StructureWindow, Zone};
pub use telemetry::TelemetryReporter;
