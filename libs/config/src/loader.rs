//! Layered Configuration Loader
//!
//! Loads a configuration struct from an optional file with environment
//! variable overrides. Missing fields fall back to the target type's serde
//! defaults, so callers should mark their structs `#[serde(default)]`.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Separator between the prefix and field names in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Load configuration from `path` (if any) overlaid with `{env_prefix}__*`
/// environment variables.
///
/// The file format is inferred from its extension (TOML, JSON, YAML, ...).
/// Environment values are parsed as numbers/booleans where possible.
pub fn load_layered<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        info!("Loading configuration file: {:?}", path);
        builder = builder.add_source(File::from(path).required(true));
    } else {
        debug!("No configuration file supplied, using defaults and environment");
    }

    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Resolve a configuration path from an explicit argument or, failing that,
/// the `env_var` environment variable. `~` and `$VAR` references are
/// expanded. Empty values count as absent.
pub fn resolve_config_path(explicit: Option<&str>, env_var: &str) -> Result<Option<PathBuf>> {
    let from_env = std::env::var(env_var).ok();
    let raw = explicit
        .map(str::to_string)
        .or(from_env)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let Some(raw) = raw else {
        return Ok(None);
    };

    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand configuration path '{}'", raw))?;
    Ok(Some(PathBuf::from(expanded.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize)]
    #[serde(default)]
    struct SampleConfig {
        cooldown_seconds: f64,
        depth_levels: u32,
        symbol: String,
    }

    impl Default for SampleConfig {
        fn default() -> Self {
            Self {
                cooldown_seconds: 15.0,
                depth_levels: 10,
                symbol: "ES".to_string(),
            }
        }
    }

    #[test]
    fn test_load_file_over_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("strategy.toml");
        fs::write(&config_path, "cooldown_seconds = 30.0\nsymbol = \"NQ\"\n").unwrap();

        let config: SampleConfig =
            load_layered(Some(&config_path), "DOMCFG_TEST_FILE").unwrap();

        assert_eq!(config.cooldown_seconds, 30.0);
        assert_eq!(config.depth_levels, 10);
        assert_eq!(config.symbol, "NQ");
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("DOMCFG_TEST_ENV__DEPTH_LEVELS", "25");

        let config: SampleConfig = load_layered(None, "DOMCFG_TEST_ENV").unwrap();

        assert_eq!(config.depth_levels, 25);
        assert_eq!(config.cooldown_seconds, 15.0);
        std::env::remove_var("DOMCFG_TEST_ENV__DEPTH_LEVELS");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result: Result<SampleConfig> =
            load_layered(Some(Path::new("/nonexistent/dom.toml")), "DOMCFG_TEST_MISSING");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(
            resolve_config_path(Some("/etc/dom.toml"), "DOMCFG_TEST_UNSET_PATH").unwrap(),
            Some(PathBuf::from("/etc/dom.toml"))
        );
        assert_eq!(resolve_config_path(Some("  "), "DOMCFG_TEST_UNSET_PATH").unwrap(), None);

        std::env::set_var("DOMCFG_TEST_DIR", "/opt/dom");
        std::env::set_var("DOMCFG_TEST_PATH", "$DOMCFG_TEST_DIR/config.toml");
        assert_eq!(
            resolve_config_path(None, "DOMCFG_TEST_PATH").unwrap(),
            Some(PathBuf::from("/opt/dom/config.toml"))
        );
    }
}
