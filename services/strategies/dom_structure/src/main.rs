//! DOM Structure Strategy replay runner
//!
//! Reads JSON-lines market events from a file or stdin, feeds them through
//! the engine and prints every generated order as a JSON line on stdout.
//! Logs go to stderr.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use dom_config::resolve_config_path;
use dom_structure_strategy::{DomStructureConfig, DomStructureStrategy, CONFIG_PATH_ENV};
use dom_types::DomSnapshot;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use strategy_shared::{
    EventDispatcher, ManualClock, OrderEvaluationContext, RiskAuthority, RiskDecision, Strategy,
    StrategyDependencies,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dom_structure")]
#[command(about = "Replay DOM market events through the structure strategy")]
struct Args {
    /// Configuration file (falls back to DOM_STRUCTURE_CONFIG_PATH)
    #[arg(short, long)]
    config: Option<String>,

    /// JSON-lines event file; stdin when omitted or "-"
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

/// Permits every order
struct PermitAll;

impl RiskAuthority for PermitAll {
    fn evaluate_order(&self, _context: &OrderEvaluationContext) -> Result<RiskDecision> {
        Ok(RiskDecision::permit())
    }
}

/// Logs dispatched signal events
struct LoggingDispatcher;

#[async_trait]
impl EventDispatcher for LoggingDispatcher {
    async fn dispatch(&self, strategy: &str, event: Value) -> Result<()> {
        info!(strategy, "Signal event: {}", event);
        Ok(())
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_input(input: Option<PathBuf>) -> Result<Box<dyn BufRead>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open event file {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_PATH_ENV)?;
    let config = DomStructureConfig::load(config_path.as_deref())
        .context("Failed to load DOM structure configuration")?;

    if args.dump_config {
        let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        println!("{}", rendered);
        return Ok(());
    }

    info!(
        "Replaying DOM events for {} ({})",
        config.symbol, config.name
    );
    let symbol = config.symbol.clone();
    let clock = Arc::new(ManualClock::new(0.0));
    let mut strategy = DomStructureStrategy::with_clock(config, clock.clone());
    strategy.set_dependencies(
        StrategyDependencies::new()
            .with_risk_authority(Arc::new(PermitAll))
            .with_event_dispatcher(Arc::new(LoggingDispatcher)),
    );
    strategy.start().await?;

    let reader = open_input(args.input)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut orders_written = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read event line")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Value = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!("Skipping line {}: {}", index + 1, err);
                continue;
            }
        };

        // Replay time follows the event timestamps
        if let Ok(snapshot) = DomSnapshot::from_market_event(&event, &symbol) {
            clock.set(snapshot.timestamp_seconds());
        }
        strategy.on_market_event(&event).await?;

        for order in strategy.generate_orders() {
            writeln!(out, "{}", Value::Object(order))?;
            orders_written += 1;
        }
    }
    out.flush()?;

    strategy.stop().await?;
    info!("Replay finished: {} order(s) written", orders_written);
    Ok(())
}
