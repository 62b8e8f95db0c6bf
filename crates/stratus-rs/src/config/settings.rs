//! Configuration loading from disk.

use crate::models::settings::GatewaySettings;
use log::info;
use thiserror::Error;

/// Environment variable overriding the configuration path.
pub const CONFIG_PATH_ENV: &str = "STRATUS_CONFIG_PATH";

/// Default configuration path relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Loads settings from `STRATUS_CONFIG_PATH` or `./config.json`.
pub fn load_settings() -> Result<GatewaySettings, ConfigError> {
    let path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_settings_from_path(&path)
}

/// Loads and deserializes a settings snapshot from `path`.
pub fn load_settings_from_path(path: &str) -> Result<GatewaySettings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let settings: GatewaySettings =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
    info!(
        "loaded configuration from {} ({} routes, {} services)",
        path,
        settings.router.routes.len(),
        settings.proxy.services.len()
    );
    Ok(settings)
}
