//! Command handlers -- one module per subcommand

pub mod config;
pub mod index;
pub mod report;
pub mod scanners;

use std::path::{Path, PathBuf};

use tracing::debug;

use layerdex_core::config::LayerdexConfig;

use crate::cli::DEFAULT_CONFIG_PATH;
use crate::error::CliError;

/// Loads the effective configuration.
///
/// An explicit path must exist. Without one, `./layerdex.toml` is used when present;
/// otherwise defaults plus environment overrides apply.
pub async fn load_config(path: Option<&Path>) -> Result<LayerdexConfig, CliError> {
    if let Some(path) = path {
        return Ok(LayerdexConfig::load(path).await?);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if tokio::fs::try_exists(default_path).await.unwrap_or(false) {
        return Ok(LayerdexConfig::load(default_path).await?);
    }

    debug!("no configuration file, using defaults");
    let mut config = LayerdexConfig::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Human-readable name of the configuration source.
pub fn config_source(path: Option<&Path>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => DEFAULT_CONFIG_PATH.to_owned(),
        None => "(defaults)".to_owned(),
    }
}

/// `--data-dir` override or `[general].data_dir`.
pub fn data_dir(config: &LayerdexConfig, overridden: Option<PathBuf>) -> PathBuf {
    overridden.unwrap_or_else(|| PathBuf::from(&config.general.data_dir))
}
