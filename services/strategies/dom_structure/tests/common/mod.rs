//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use dom_structure_strategy::{DomStructureConfig, DomStructureStrategy};
use dom_types::{DomLevel, DomSnapshot};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use strategy_shared::testing::{MockRiskAuthority, RecordingDispatcher, RecordingTelemetry};
use strategy_shared::{ManualClock, Strategy, StrategyDependencies, ThresholdModel};

pub const BASE_EPOCH: i64 = 1_700_000_000;

/// One confirmation suffices and the engine-level settings apply in every
/// regime, so a single support snapshot can emit.
pub fn permissive_config() -> DomStructureConfig {
    DomStructureConfig {
        name: "dom-es".to_string(),
        symbol: "ES".to_string(),
        min_signal_conditions: 1,
        min_processing_interval: 0.0,
        signal_frequency_seconds: 0.0,
        regime_condition_overrides: BTreeMap::new(),
        ..DomStructureConfig::default()
    }
}

/// One-level book around `bid_price`, quarter-point spread
pub fn book(seconds: i64, bid_price: Decimal, bid_size: i64, ask_size: i64) -> DomSnapshot {
    DomSnapshot::new(
        "ES",
        vec![DomLevel::new(bid_price, Decimal::from(bid_size))],
        vec![DomLevel::new(bid_price + Decimal::new(25, 2), Decimal::from(ask_size))],
        Utc.timestamp_opt(BASE_EPOCH + seconds, 0).unwrap(),
    )
}

pub struct Harness {
    pub strategy: DomStructureStrategy,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub risk: Arc<MockRiskAuthority>,
}

impl Harness {
    pub async fn start(config: DomStructureConfig) -> Self {
        Self::start_with(config, RecordingTelemetry::new(), None).await
    }

    pub async fn start_with(
        config: DomStructureConfig,
        telemetry: RecordingTelemetry,
        model: Option<Arc<dyn ThresholdModel>>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let telemetry = Arc::new(telemetry);
        let risk = Arc::new(MockRiskAuthority::permit_all());

        let mut dependencies = StrategyDependencies::new()
            .with_event_dispatcher(dispatcher.clone())
            .with_telemetry(telemetry.clone())
            .with_risk_authority(risk.clone());
        if let Some(model) = model {
            dependencies = dependencies.with_threshold_model(model);
        }

        let mut strategy = DomStructureStrategy::with_clock(config, clock.clone());
        strategy.set_dependencies(dependencies);
        strategy.start().await.expect("strategy should start");

        Self {
            strategy,
            clock,
            dispatcher,
            telemetry,
            risk,
        }
    }
}
