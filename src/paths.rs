use crate::config::Config;
use crate::error::{Result, ReplayError};
use std::fs;
use std::path::{Path, PathBuf};

/// Application data layout
///
/// ```text
/// <root>/
///   models/<id>/        extracted voice models
///   weights/<file>      baseline + stem weights
///   server/             inference server install, config*.json, version.txt
///   logs/               server log directory
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the data directory from config (override) or the platform default
    pub fn from_config(config: &Config) -> Result<Self> {
        if let Some(dir) = &config.paths.data_dir {
            return Ok(Self::new(dir));
        }

        let data_dir = if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg_data)
        } else {
            dirs::data_dir()
                .ok_or_else(|| ReplayError::Config("Cannot determine data directory".to_string()))?
        };

        Ok(Self::new(data_dir.join("replay")))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    #[must_use]
    pub fn weights_dir(&self) -> PathBuf {
        self.root.join("weights")
    }

    #[must_use]
    pub fn server_dir(&self) -> PathBuf {
        self.root.join("server")
    }

    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create every directory the engine writes into
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.models_dir(),
            self.weights_dir(),
            self.server_dir(),
            self.log_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
