//! Engine configuration loader.
//!
//! Reads `conductor.toml` from a configuration directory and deserializes it
//! into [`EngineConfig`]. The lenient loader falls back to defaults when the
//! file is missing or malformed; the strict loader reports why.

use std::path::{Path, PathBuf};

use conductor_types::config::EngineConfig;
use thiserror::Error;

/// File name looked up by [`load_engine_config`].
pub const CONFIG_FILE: &str = "conductor.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load engine configuration from `{config_dir}/conductor.toml`.
///
/// - Missing file: returns [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(config_dir: &Path) -> EngineConfig {
    let config_path = config_dir.join(CONFIG_FILE);

    match load_engine_config_strict(&config_path).await {
        Ok(config) => config,
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            EngineConfig::default()
        }
    }
}

/// Load engine configuration from an explicit file path, failing on any
/// read or parse error.
pub async fn load_engine_config_strict(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    toml::from_str::<EngineConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
