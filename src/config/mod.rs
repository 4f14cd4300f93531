//! Configuration module for the Replay engine
//!
//! Loads config from `$XDG_CONFIG_HOME/replay/config.toml` or `~/.config/replay/config.toml`.
//! Falls back to embedded defaults if the file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! Two environment variables override the file: `REPLAY_PORT` (server port) and
//! `GITHUB_SHA` (build id used for pinned manifests, when none is configured).
//!
//! # Example
//!
//! ```no_run
//! use replay_engine::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Server port: {}", config.server.port);
//! println!("Asset host: {}", config.remote.asset_host);
//! ```

pub mod schema;

pub use schema::{Config, RuntimeMode};

use crate::error::{Result, ReplayError};
use std::fs;
use std::path::{Path, PathBuf};

impl Config {
    /// Load config from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load config from an explicit file, using defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| {
                ReplayError::Config(format!("Failed to parse {}: {e}", path.display()))
            })?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("REPLAY_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ReplayError::Config(format!("REPLAY_PORT is not a port: {port}")))?;
        }

        if self.manifest.build_id.is_none() {
            self.manifest.build_id = std::env::var("GITHUB_SHA")
                .ok()
                .filter(|sha| !sha.trim().is_empty());
        }

        Ok(())
    }
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        dirs::config_dir()
            .ok_or_else(|| ReplayError::Config("Cannot determine config directory".to_string()))?
    };

    Ok(config_dir.join("replay").join("config.toml"))
}
