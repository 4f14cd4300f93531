use super::manifest::{BuildIdentity, PinningPolicy, RemoteConfig};
use crate::error::{Result, ReplayError};
use crate::http::{join_url, HttpClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Retrieves the server manifest with ordered fallback and an on-disk cache.
///
/// The first successful result is memoized for the process lifetime; pass `force` to
/// [`ManifestFetcher::fetch_latest`] to go back to the network.
pub struct ManifestFetcher {
    http: HttpClient,
    host: String,
    identity: BuildIdentity,
    cache_dir: PathBuf,
    cached: Mutex<Option<Arc<RemoteConfig>>>,
}

impl ManifestFetcher {
    #[must_use]
    pub fn new(
        http: HttpClient,
        host: impl Into<String>,
        identity: BuildIdentity,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            host: host.into(),
            identity,
            cache_dir: cache_dir.into(),
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn identity(&self) -> &BuildIdentity {
        &self.identity
    }

    /// Path of the cache file for a channel
    #[must_use]
    pub fn cache_path(&self, policy: PinningPolicy) -> PathBuf {
        self.cache_dir.join(self.identity.cache_file_name(policy))
    }

    /// Fetch the manifest for `policy`.
    ///
    /// Order of resolution:
    /// 1. the in-memory result of an earlier call (unless `force`)
    /// 2. a pinned cache file, which never changes for a given build (unless `force`)
    /// 3. each candidate URL in priority order, persisting the first success
    /// 4. the cache file for the channel
    pub async fn fetch_latest(&self, policy: PinningPolicy, force: bool) -> Result<Arc<RemoteConfig>> {
        // Held across the fetch so concurrent callers share one network round-trip
        let mut cached = self.cached.lock().await;
        if !force {
            if let Some(config) = cached.as_ref() {
                return Ok(Arc::clone(config));
            }
        }

        let policy = self.identity.effective_policy(policy);
        let cache_path = self.cache_path(policy);

        if policy == PinningPolicy::Pinned && !force && cache_path.exists() {
            match RemoteConfig::load(&cache_path) {
                Ok(config) => {
                    tracing::info!("Using pinned manifest {}", cache_path.display());
                    let config = Arc::new(config);
                    *cached = Some(Arc::clone(&config));
                    return Ok(config);
                }
                Err(e) => tracing::warn!("Ignoring pinned manifest cache: {e}"),
            }
        }

        let config = match self.fetch_remote(policy, &cache_path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("All manifest candidates failed: {e}");
                load_cache(&cache_path).ok_or(e)?
            }
        };

        let config = Arc::new(config);
        *cached = Some(Arc::clone(&config));
        Ok(config)
    }

    async fn fetch_remote(&self, policy: PinningPolicy, cache_path: &Path) -> Result<RemoteConfig> {
        let candidates = self.identity.candidates(policy);
        tracing::info!("Fetching manifest from {candidates:?}, in that priority order");

        let mut last_error = None;
        for filename in &candidates {
            let url = join_url(&self.host, filename);
            tracing::info!("Fetching manifest from {url}");
            match self.http.get_json::<RemoteConfig>(&url).await {
                Ok(config) => {
                    if let Err(e) = config.save(cache_path) {
                        tracing::warn!("Failed to cache manifest at {}: {e}", cache_path.display());
                    }
                    return Ok(config);
                }
                Err(e) => {
                    tracing::info!("Fetching manifest from {filename} failed, trying next: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(ReplayError::ManifestUnavailable(
            last_error.map_or_else(|| "no candidates".to_string(), |e| e.to_string()),
        ))
    }
}

fn load_cache(path: &Path) -> Option<RemoteConfig> {
    if !path.exists() {
        return None;
    }
    match RemoteConfig::load(path) {
        Ok(config) => {
            tracing::warn!("Using cached manifest {} (version {})", path.display(), config.version);
            Some(config)
        }
        Err(e) => {
            tracing::error!("{e}");
            None
        }
    }
}
