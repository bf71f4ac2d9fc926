//! # DOM Strategy Configuration
//!
//! Centralised configuration loading and market constants for DOM
//! strategies, so every service resolves config files, environment
//! overrides and tick sizes the same way.
//!
//! ## Features
//!
//! - **Layered Loading**: Optional TOML/JSON file overlaid by prefixed
//!   environment variables (`PREFIX__FIELD=value`)
//! - **Path Resolution**: CLI argument or environment variable, with `~` and
//!   `$VAR` expansion
//! - **Market Constants**: Per-symbol futures tick sizes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dom_config::{load_layered, markets, resolve_config_path};
//!
//! # #[derive(serde::Deserialize, Default)]
//! # struct MyConfig { cooldown_seconds: Option<f64> }
//! let path = resolve_config_path(None, "DOM_STRUCTURE_CONFIG_PATH")?;
//! let config: MyConfig = load_layered(path.as_deref(), "DOM_STRUCTURE")?;
//! let tick = markets::tick_size("MES");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod loader;
pub mod markets;

pub use loader::{load_layered, resolve_config_path, ENV_SEPARATOR};
pub use markets::{tick_size, DEFAULT_TICK_SIZE};
