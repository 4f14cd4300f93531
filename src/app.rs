//! Composition root: every long-lived service, built once from config.

use crate::assets::{AssetSynchronizer, BuildIdentity, ManifestFetcher, PinningPolicy, RemoteConfig};
use crate::config::Config;
use crate::error::Result;
use crate::http::HttpClient;
use crate::models::{RequiredAssetDownloader, WeightRegistry};
use crate::notifications::NotificationManager;
use crate::paths::AppPaths;
use crate::server::{
    packaged_binary_name, ProcessSupervisor, ReadinessGate, ServerApi, SupervisorEvent,
    SupervisorSettings,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Launch gate: the server install and every required weight must be present
struct InstallGate {
    dev: bool,
    policy: PinningPolicy,
    binary: PathBuf,
    fetcher: Arc<ManifestFetcher>,
    sync: Arc<AssetSynchronizer>,
    required: Arc<RequiredAssetDownloader>,
}

#[async_trait]
impl ReadinessGate for InstallGate {
    async fn is_ready(&self) -> bool {
        if self.dev {
            return true;
        }

        let manifest = match self.fetcher.fetch_latest(self.policy, false).await {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("No manifest to validate the install against: {e}");
                return false;
            }
        };

        let installed = self
            .sync
            .is_installed_fast(&manifest, &self.binary)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Install check failed: {e}");
                false
            });
        if !installed {
            return false;
        }

        self.required.has_downloaded_all().await.unwrap_or_else(|e| {
            tracing::warn!("Required weight check failed: {e}");
            false
        })
    }
}

/// Every service the engine runs, wired together
pub struct Services {
    pub config: Config,
    pub paths: AppPaths,
    pub http: HttpClient,
    pub fetcher: Arc<ManifestFetcher>,
    pub sync: Arc<AssetSynchronizer>,
    pub weights: Arc<WeightRegistry>,
    pub required: Arc<RequiredAssetDownloader>,
    pub api: ServerApi,
    pub supervisor: ProcessSupervisor,
    notifications: NotificationManager,
}

impl Services {
    /// Build services under the configured data directory
    pub fn new(config: Config) -> Result<Self> {
        let paths = AppPaths::from_config(&config)?;
        Self::with_paths(config, paths)
    }

    /// Build services under an explicit data directory.
    ///
    /// Spawns the supervisor task, so it must run inside a tokio runtime.
    pub fn with_paths(config: Config, paths: AppPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        let http = HttpClient::from_config(&config)?;
        let remote = &config.remote;
        let policy = policy_for(&config);

        let identity = BuildIdentity::current(
            config.manifest.build_id.clone(),
            config.manifest.dev_channel,
        );
        let fetcher = Arc::new(ManifestFetcher::new(
            http.clone(),
            &remote.server_host,
            identity,
            paths.server_dir(),
        ));
        let sync = Arc::new(AssetSynchronizer::new(
            http.clone(),
            &remote.server_host,
            paths.server_dir(),
            paths.root(),
        ));
        let mut weights = WeightRegistry::new(
            http.clone(),
            remote.catalog_url(),
            &remote.models_host,
            paths.models_dir(),
            config.runtime,
        );
        if let Some(token) = remote.huggingface_token.as_deref().filter(|t| !t.is_empty()) {
            weights = weights.with_hub(remote.hub_tree_url(), token);
        }
        let weights = Arc::new(weights);
        let required = Arc::new(RequiredAssetDownloader::new(
            http.clone(),
            &remote.asset_host,
            paths.weights_dir(),
            config.runtime,
        ));

        let api = ServerApi::new(http.clone(), config.server.port);
        let gate = InstallGate {
            dev: config.server.is_dev(),
            policy,
            binary: paths.server_dir().join(packaged_binary_name()),
            fetcher: Arc::clone(&fetcher),
            sync: Arc::clone(&sync),
            required: Arc::clone(&required),
        };
        let supervisor = ProcessSupervisor::spawn(
            SupervisorSettings {
                server: config.server.clone(),
                server_dir: paths.server_dir(),
                log_dir: paths.log_dir(),
            },
            api.clone(),
            Arc::new(gate),
        );
        let notifications = NotificationManager::new(config.notifications.clone());

        Ok(Self {
            config,
            paths,
            http,
            fetcher,
            sync,
            weights,
            required,
            api,
            supervisor,
            notifications,
        })
    }

    /// Manifest channel selected by config
    #[must_use]
    pub fn policy(&self) -> PinningPolicy {
        policy_for(&self.config)
    }

    pub async fn manifest(&self, force: bool) -> Result<Arc<RemoteConfig>> {
        self.fetcher.fetch_latest(self.policy(), force).await
    }

    /// Install or update the server, then start it.
    ///
    /// Returns `Ok(false)` if a download was already running.
    pub async fn download_latest_server(&self) -> Result<bool> {
        if !self.sync.download_latest(&self.fetcher, self.policy()).await? {
            return Ok(false);
        }
        if let Err(e) = self.supervisor.start().await {
            tracing::warn!("Server installed but not started: {e}");
        }
        Ok(true)
    }

    /// Hash-level validity of the server install. Starts the server when valid and idle.
    pub async fn server_is_valid(&self) -> Result<bool> {
        let valid = if self.config.server.is_dev() {
            true
        } else {
            let manifest = self.manifest(false).await?;
            self.sync.is_valid(&manifest).await?
        };

        if valid && self.supervisor.status().pid.is_none() {
            if let Err(e) = self.supervisor.start().await {
                tracing::warn!("Server is valid but did not start: {e}");
            }
        }
        Ok(valid)
    }

    /// Forward supervisor events to desktop notifications until the supervisor ends
    #[must_use]
    pub fn spawn_notifier(&self) -> JoinHandle<()> {
        let mut events = self.supervisor.subscribe();
        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SupervisorEvent::ReloadRequested) => {
                        tracing::info!("Server restarting, cached server state is stale");
                    }
                    Ok(event) => {
                        let notifications = notifications.clone();
                        // notification backends block
                        let shown = tokio::task::spawn_blocking(move || {
                            notifications.server_event(&event);
                        })
                        .await;
                        if let Err(e) = shown {
                            tracing::warn!("Notification task failed: {e}");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {missed} server events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop the server and wait for it to be gone
    pub async fn shutdown(&self) -> Result<()> {
        self.supervisor.shutdown().await
    }
}

fn policy_for(config: &Config) -> PinningPolicy {
    if config.manifest.use_pinned {
        PinningPolicy::Pinned
    } else {
        PinningPolicy::Latest
    }
}
