use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeMode,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct PathsConfig {
    /// Overrides the application data directory (downloads, models, server install)
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RemoteConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_asset_host")]
    pub asset_host: String,
    #[serde(default = "default_models_host")]
    pub models_host: String,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Enables listing the Hugging Face model repo alongside the catalog
    pub huggingface_token: Option<String>,
    #[serde(default = "default_huggingface_host")]
    pub huggingface_host: String,
    #[serde(default = "default_huggingface_repo")]
    pub huggingface_repo: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ManifestConfig {
    #[serde(default)]
    pub use_pinned: bool,
    pub build_id: Option<String>,
    #[serde(default)]
    pub dev_channel: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_min_uptime_ms")]
    pub min_uptime_ms: u64,
    #[serde(default = "default_shutdown_deadline_ms")]
    pub shutdown_deadline_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_port_free_timeout_ms")]
    pub port_free_timeout_ms: u64,
    pub dev_script: Option<PathBuf>,
    pub interpreter: Option<PathBuf>,
    pub resources_bin_dir: Option<PathBuf>,
}

/// What the host environment lets us do
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeMode {
    #[serde(default = "default_true")]
    pub has_local_filesystem: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enable_errors: bool,
}

// Default value functions
fn default_server_host() -> String {
    "https://replay-servers.replay-music.xyz".to_string()
}
fn default_asset_host() -> String {
    "https://assets.replay-music.xyz".to_string()
}
fn default_models_host() -> String {
    "https://models.replay-music.xyz".to_string()
}
fn default_catalog_path() -> String {
    "models.json".to_string()
}
fn default_huggingface_host() -> String {
    "https://huggingface.co".to_string()
}
fn default_huggingface_repo() -> String {
    "juuxn/RVCModels".to_string()
}
const fn default_retries() -> u32 {
    2
}
const fn default_retry_delay_ms() -> u64 {
    500
}
const fn default_connect_timeout_secs() -> u64 {
    30
}
const fn default_port() -> u16 {
    62362
}
const fn default_retry_budget() -> u32 {
    2
}
const fn default_min_uptime_ms() -> u64 {
    5000
}
const fn default_shutdown_deadline_ms() -> u64 {
    3000
}
const fn default_poll_interval_ms() -> u64 {
    100
}
const fn default_port_free_timeout_ms() -> u64 {
    10_000
}
const fn default_true() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            asset_host: default_asset_host(),
            models_host: default_models_host(),
            catalog_path: default_catalog_path(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            huggingface_token: None,
            huggingface_host: default_huggingface_host(),
            huggingface_repo: default_huggingface_repo(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            retry_budget: default_retry_budget(),
            min_uptime_ms: default_min_uptime_ms(),
            shutdown_deadline_ms: default_shutdown_deadline_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            port_free_timeout_ms: default_port_free_timeout_ms(),
            dev_script: None,
            interpreter: None,
            resources_bin_dir: None,
        }
    }
}

impl Default for RuntimeMode {
    fn default() -> Self {
        Self {
            has_local_filesystem: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enable_errors: default_true(),
        }
    }
}

impl RemoteConfig {
    /// URL of the remote voice model catalog
    #[must_use]
    pub fn catalog_url(&self) -> String {
        format!(
            "{}/{}",
            self.models_host.trim_end_matches('/'),
            self.catalog_path.trim_start_matches('/')
        )
    }

    /// URL listing the top level of the Hugging Face model repo
    #[must_use]
    pub fn hub_tree_url(&self) -> String {
        format!(
            "{}/api/models/{}/tree/main",
            self.huggingface_host.trim_end_matches('/'),
            self.huggingface_repo.trim_matches('/')
        )
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl ServerConfig {
    #[must_use]
    pub const fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    #[must_use]
    pub const fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn port_free_timeout(&self) -> Duration {
        Duration::from_millis(self.port_free_timeout_ms)
    }

    /// Dev mode runs a server script from a checkout instead of the packaged binary
    #[must_use]
    pub const fn is_dev(&self) -> bool {
        self.dev_script.is_some()
    }
}
