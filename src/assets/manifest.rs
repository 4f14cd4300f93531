//! Server install manifest and build identity.

use crate::error::{Result, ReplayError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Manifest key whose freshness is tracked by `version.txt` instead of a hashed path
pub const VERSION_MARKER_ENTRY: &str = "other.zip";

/// Sidecar file (inside the install root) holding the installed manifest version
pub const VERSION_FILE: &str = "version.txt";

/// One remote file of the server install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Logical path relative to the install root
    pub path: String,
    pub sha1: String,
    /// Archive to download; it extracts into the install root
    pub asset_name: String,
    pub zip_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symlink {
    pub from: String,
    pub to: String,
}

/// Versioned description of the server install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub version: String,
    pub manifest: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    pub symlinks: Vec<Symlink>,
}

impl RemoteConfig {
    /// Entries in manifest key order, paired with their key
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.manifest.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Load a cached manifest from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            ReplayError::Config(format!("Cached manifest {} is corrupt: {e}", path.display()))
        })
    }

    /// Write atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }
}

/// Which manifest channel to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningPolicy {
    /// Only the rolling "latest" manifest
    Latest,
    /// Prefer the manifest built for this exact build id, then this app version, then latest
    Pinned,
}

/// Facts that select the manifest file names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    pub platform: String,
    pub arch: String,
    pub version: String,
    pub build_id: Option<String>,
    pub dev: bool,
}

impl BuildIdentity {
    /// Identity of the running binary
    #[must_use]
    pub fn current(build_id: Option<String>, dev_channel: bool) -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let mac_arm = cfg!(target_os = "macos") && cfg!(target_arch = "aarch64");

        let platform = if cfg!(target_os = "windows") {
            "windows"
        } else if cfg!(target_os = "macos") {
            if mac_arm {
                "mac"
            } else {
                "mac_x64"
            }
        } else {
            "linux"
        };

        Self {
            platform: platform.to_string(),
            arch: if mac_arm { "arm64" } else { "x64" }.to_string(),
            dev: dev_channel || version.contains("0.0.0-dev"),
            version,
            build_id,
        }
    }

    /// The effective policy: pinning needs a build id
    #[must_use]
    pub fn effective_policy(&self, requested: PinningPolicy) -> PinningPolicy {
        match (requested, &self.build_id) {
            (PinningPolicy::Pinned, Some(_)) => PinningPolicy::Pinned,
            _ => PinningPolicy::Latest,
        }
    }

    /// Candidate manifest file names, highest priority first
    #[must_use]
    pub fn candidates(&self, policy: PinningPolicy) -> Vec<String> {
        let suffix = format!("{}-{}.json", self.platform, self.arch);
        let dev = if self.dev { "-dev" } else { "" };
        let latest = format!("latest{dev}-{suffix}");

        match (self.effective_policy(policy), &self.build_id) {
            (PinningPolicy::Pinned, Some(build_id)) => vec![
                format!("{build_id}-{suffix}"),
                format!("{}-{suffix}", self.version),
                latest,
            ],
            _ => vec![latest],
        }
    }

    /// Local cache file name for the channel
    #[must_use]
    pub fn cache_file_name(&self, policy: PinningPolicy) -> String {
        match (self.effective_policy(policy), &self.build_id) {
            (PinningPolicy::Pinned, Some(build_id)) => format!("config-{build_id}.json"),
            _ => "config.json".to_string(),
        }
    }
}
