use super::fetcher::ManifestFetcher;
use super::manifest::{ManifestEntry, PinningPolicy, RemoteConfig, VERSION_FILE, VERSION_MARKER_ENTRY};
use crate::archive;
use crate::checksum::{ChecksumMode, ChecksumStore, FileState};
use crate::error::{Result, ReplayError};
use crate::http::{join_url, HttpClient};
use crate::progress::{TransferStatus, TransferTracker};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries found drifted before the pass
    pub drifted: usize,
    /// Archives actually transferred
    pub downloaded: usize,
    /// Drifted entries that turned out fine on a fresh hash
    pub skipped: usize,
}

/// Brings the server install root in line with a manifest.
///
/// Archives are staged next to the install root, extracted into it and deleted. Entries
/// are processed one at a time; the first failure aborts the pass and leaves whatever
/// was already synced in place, so a rerun only fetches what is still missing.
pub struct AssetSynchronizer {
    http: HttpClient,
    checksum: ChecksumStore,
    host: String,
    install_root: PathBuf,
    staging_dir: PathBuf,
    tracker: TransferTracker,
}

impl AssetSynchronizer {
    #[must_use]
    pub fn new(
        http: HttpClient,
        host: impl Into<String>,
        install_root: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            checksum: ChecksumStore::new(),
            host: host.into(),
            install_root: install_root.into(),
            staging_dir: staging_dir.into(),
            tracker: TransferTracker::new(),
        }
    }

    #[must_use]
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Snapshot for status polling
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.tracker.snapshot()
    }

    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.tracker.is_downloading()
    }

    /// Entries whose local state does not match the manifest.
    ///
    /// With `fast_bail` only existence and size are checked and the scan stops at the
    /// first drifted entry. Without it every file is hashed and the full list is returned.
    pub async fn compute_drift(
        &self,
        manifest: &RemoteConfig,
        fast_bail: bool,
    ) -> Result<Vec<ManifestEntry>> {
        let mode = if fast_bail {
            ChecksumMode::Fast
        } else {
            ChecksumMode::Full
        };
        self.drift(manifest, mode, fast_bail).await
    }

    async fn drift(
        &self,
        manifest: &RemoteConfig,
        mode: ChecksumMode,
        bail: bool,
    ) -> Result<Vec<ManifestEntry>> {
        let total = manifest.manifest.len();
        let mut drifted = Vec::new();

        for (index, (name, entry)) in manifest.entries().enumerate() {
            if !bail {
                self.tracker
                    .set_status(format!("Checking file {} of {total}", index + 1));
            }

            let ok = if name == VERSION_MARKER_ENTRY {
                self.version_marker_matches(&manifest.version).await
            } else {
                self.entry_matches(entry, mode).await?
            };

            if !ok {
                drifted.push(entry.clone());
                if bail {
                    break;
                }
            }
        }

        Ok(drifted)
    }

    async fn entry_matches(&self, entry: &ManifestEntry, mode: ChecksumMode) -> Result<bool> {
        let full_path = self.install_root.join(&entry.path);
        let state = self.checksum.inspect(&full_path, mode).await?;

        let FileState::Present { size, .. } = &state else {
            tracing::info!("File not found: {}", full_path.display());
            return Ok(false);
        };

        if let Some(expected) = entry.file_size {
            if *size != expected {
                tracing::info!(
                    "Size mismatch for {}: {size} != {expected}",
                    full_path.display()
                );
                return Ok(false);
            }
        }

        if mode == ChecksumMode::Full && !state.matches_sha1(&entry.sha1) {
            tracing::info!(
                "SHA1 mismatch for {}: {:?} != {}",
                full_path.display(),
                state.sha1(),
                entry.sha1
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Installed manifest version, if the marker exists
    pub async fn read_version_marker(&self) -> Option<String> {
        fs::read_to_string(self.install_root.join(VERSION_FILE))
            .await
            .ok()
    }

    async fn version_marker_matches(&self, version: &str) -> bool {
        match self.read_version_marker().await {
            Some(installed) if installed.trim() == version.trim() => true,
            Some(installed) => {
                tracing::info!("Version mismatch: {} != {version}", installed.trim());
                false
            }
            None => {
                tracing::info!("Version file not found in {}", self.install_root.display());
                false
            }
        }
    }

    pub async fn write_version_marker(&self, version: &str) -> Result<()> {
        fs::create_dir_all(&self.install_root).await?;
        fs::write(self.install_root.join(VERSION_FILE), version).await?;
        Ok(())
    }

    /// Sync the install root to `manifest`.
    ///
    /// Returns `None` without doing anything if another pass is running.
    pub async fn sync(&self, manifest: &RemoteConfig) -> Result<Option<SyncReport>> {
        let Some(_guard) = self.tracker.try_begin() else {
            tracing::info!("Server sync already in progress");
            return Ok(None);
        };

        match self.sync_pass(manifest).await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                self.tracker.set_error(&e);
                Err(e)
            }
        }
    }

    async fn sync_pass(&self, manifest: &RemoteConfig) -> Result<SyncReport> {
        self.tracker
            .set_status(format!("Fetching latest server - using {} version", manifest.version));

        let drifted = self.compute_drift(manifest, false).await?;
        let total_size = drifted.iter().map(|entry| entry.zip_size).sum();
        self.tracker.begin_pass(drifted.len(), total_size);

        let mut report = SyncReport {
            drifted: drifted.len(),
            ..SyncReport::default()
        };

        for entry in &drifted {
            let file_num = self.tracker.next_file();
            self.tracker
                .set_status(format!("Fetching file {file_num} of {}", drifted.len()));

            let is_marker = manifest
                .manifest
                .get(VERSION_MARKER_ENTRY)
                .is_some_and(|marker| marker == entry);
            let logical_path = self.install_root.join(&entry.path);

            if !is_marker && self.checksum.verify(&logical_path, &entry.sha1).await? {
                tracing::info!("Skipping {} - already downloaded", entry.path);
                self.tracker.add_downloaded(entry.zip_size);
                report.skipped += 1;
                continue;
            }

            let archive_path = self.staging_dir.join(&entry.asset_name);
            let url = join_url(&self.host, &entry.asset_name);
            tracing::info!("Downloading {}", entry.asset_name);
            self.http
                .download_to_file(&url, &archive_path, |loaded, total| {
                    self.tracker.set_progress(loaded, total);
                })
                .await?;

            self.tracker
                .set_status(format!("Decompressing file {file_num} of {}", drifted.len()));
            self.tracker.add_downloaded(entry.zip_size);

            if !is_marker {
                remove_path(&logical_path).await?;
            }
            archive::extract_zip(&archive_path, &self.install_root).await?;
            remove_path(&archive_path).await?;

            if !is_marker {
                self.verify_extracted(&logical_path, &entry.sha1).await?;
            }
            report.downloaded += 1;
        }

        if !self.ensure_symlinks(manifest).await? {
            tracing::warn!("Some symlink sources are missing after sync");
        }
        self.write_version_marker(&manifest.version).await?;

        Ok(report)
    }

    async fn verify_extracted(&self, path: &Path, expected: &str) -> Result<()> {
        let state = self.checksum.inspect(path, ChecksumMode::Full).await?;
        if state.matches_sha1(expected) {
            return Ok(());
        }

        remove_path(path).await?;
        Err(ReplayError::Integrity {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: state.sha1().unwrap_or("missing").to_string(),
        })
    }

    /// Create missing symlinks. Returns false if any link source is absent.
    pub async fn ensure_symlinks(&self, manifest: &RemoteConfig) -> Result<bool> {
        for link in &manifest.symlinks {
            let from = self.install_root.join(&link.from);
            if fs::metadata(&from).await.is_err() {
                tracing::info!("Symlink source {} does not exist", from.display());
                return Ok(false);
            }

            let to = self.install_root.join(&link.to);
            if fs::symlink_metadata(&to).await.is_ok() {
                continue;
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).await?;
            }
            create_symlink(&from, &to).await?;
            tracing::debug!("Linked {} -> {}", to.display(), from.display());
        }
        Ok(true)
    }

    /// Cheap readiness check: existence and size only, never while a pass is running
    pub async fn is_installed_fast(&self, manifest: &RemoteConfig, binary: &Path) -> Result<bool> {
        if self.is_downloading() {
            tracing::info!("Server is downloading, not counting install as valid");
            return Ok(false);
        }
        if fs::metadata(binary).await.is_err() {
            tracing::info!("Server binary does not exist: {}", binary.display());
            return Ok(false);
        }
        Ok(self.compute_drift(manifest, true).await?.is_empty())
    }

    /// Authoritative check: symlinks satisfiable and every file hashes correctly
    pub async fn is_valid(&self, manifest: &RemoteConfig) -> Result<bool> {
        if self.is_downloading() {
            return Ok(false);
        }
        if fs::metadata(&self.install_root).await.is_err() {
            return Ok(false);
        }
        if !self.ensure_symlinks(manifest).await? {
            return Ok(false);
        }
        Ok(self.drift(manifest, ChecksumMode::Full, true).await?.is_empty())
    }

    /// Fetch the manifest and sync to it, recording any failure in the polled status.
    ///
    /// Returns `Ok(false)` without doing anything if a pass is already running.
    pub async fn download_latest(
        &self,
        fetcher: &ManifestFetcher,
        policy: PinningPolicy,
    ) -> Result<bool> {
        let Some(_guard) = self.tracker.try_begin() else {
            return Ok(false);
        };

        self.tracker.begin_pass(0, 0);
        self.tracker.set_status("Downloading latest server");

        let result = async {
            let manifest = fetcher.fetch_latest(policy, false).await?;
            self.sync_pass(&manifest).await
        }
        .await;

        match result {
            Ok(report) => {
                self.tracker.set_status(format!(
                    "Download complete ({} downloaded, {} already present)",
                    report.downloaded, report.skipped
                ));
                Ok(true)
            }
            Err(e) => {
                self.tracker.set_error(&e);
                self.tracker.set_status(format!("Error: {e}"));
                tracing::error!("Server download failed: {e}");
                Err(e)
            }
        }
    }

    /// Delete the whole install root
    pub async fn remove_local_server(&self) -> Result<()> {
        tracing::info!("Removing server install at {}", self.install_root.display());
        remove_path(&self.install_root).await
    }
}

/// Remove a file, symlink or directory tree; absent paths are fine
async fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn create_symlink(from: &Path, to: &Path) -> Result<()> {
    fs::symlink(from, to).await?;
    Ok(())
}

#[cfg(windows)]
async fn create_symlink(from: &Path, to: &Path) -> Result<()> {
    if fs::metadata(from).await?.is_dir() {
        fs::symlink_dir(from, to).await?;
    } else {
        fs::symlink_file(from, to).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::manifest::Symlink;
    use crate::checksum::sha1_hex;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn synchronizer(root: &Path) -> AssetSynchronizer {
        let http = HttpClient::new(0, Duration::from_millis(1), Duration::from_secs(5)).unwrap();
        AssetSynchronizer::new(http, "http://127.0.0.1:9", root.join("server"), root)
    }

    fn entry(path: &str, data: &[u8]) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            sha1: sha1_hex(data),
            asset_name: format!("{path}.zip"),
            zip_size: data.len() as u64,
            file_size: Some(data.len() as u64),
        }
    }

    fn manifest(entries: Vec<(&str, ManifestEntry)>) -> RemoteConfig {
        RemoteConfig {
            version: "v1".to_string(),
            manifest: entries
                .into_iter()
                .map(|(name, entry)| (name.to_string(), entry))
                .collect::<BTreeMap<_, _>>(),
            symlinks: vec![],
        }
    }

    #[tokio::test]
    async fn test_size_mismatch_is_drift_in_fast_mode() {
        let temp_dir = TempDir::new().unwrap();
        let sync = synchronizer(temp_dir.path());
        std::fs::create_dir_all(sync.install_root()).unwrap();
        std::fs::write(sync.install_root().join("a.bin"), b"short").unwrap();

        let config = manifest(vec![("a", entry("a.bin", b"much longer contents"))]);
        let drift = sync.compute_drift(&config, true).await.unwrap();
        assert_eq!(drift.len(), 1);
    }

    #[tokio::test]
    async fn test_same_size_wrong_hash_needs_full_mode() {
        let temp_dir = TempDir::new().unwrap();
        let sync = synchronizer(temp_dir.path());
        std::fs::create_dir_all(sync.install_root()).unwrap();
        std::fs::write(sync.install_root().join("a.bin"), b"aaaa").unwrap();

        let config = manifest(vec![("a", entry("a.bin", b"bbbb"))]);
        assert!(sync.compute_drift(&config, true).await.unwrap().is_empty());
        assert_eq!(sync.compute_drift(&config, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fast_bail_stops_at_first_drift() {
        let temp_dir = TempDir::new().unwrap();
        let sync = synchronizer(temp_dir.path());

        let config = manifest(vec![
            ("a", entry("a.bin", b"a")),
            ("b", entry("b.bin", b"b")),
        ]);
        assert_eq!(sync.compute_drift(&config, true).await.unwrap().len(), 1);
        assert_eq!(sync.compute_drift(&config, false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_version_marker_compare_ignores_whitespace() {
        let temp_dir = TempDir::new().unwrap();
        let sync = synchronizer(temp_dir.path());
        let mut marker = entry("other", b"");
        marker.file_size = None;
        let config = manifest(vec![(VERSION_MARKER_ENTRY, marker)]);

        assert_eq!(sync.compute_drift(&config, false).await.unwrap().len(), 1);

        sync.write_version_marker("v1\n").await.unwrap();
        assert!(sync.compute_drift(&config, false).await.unwrap().is_empty());

        sync.write_version_marker("v0").await.unwrap();
        assert_eq!(sync.compute_drift(&config, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_symlinks_created_once_and_missing_source_reported() {
        let temp_dir = TempDir::new().unwrap();
        let sync = synchronizer(temp_dir.path());
        std::fs::create_dir_all(sync.install_root().join("lib")).unwrap();
        std::fs::write(sync.install_root().join("lib/libfoo.so.1"), b"elf").unwrap();

        let mut config = manifest(vec![]);
        config.symlinks.push(Symlink {
            from: "lib/libfoo.so.1".to_string(),
            to: "lib/libfoo.so".to_string(),
        });

        assert!(sync.ensure_symlinks(&config).await.unwrap());
        assert!(sync.ensure_symlinks(&config).await.unwrap());
        assert_eq!(
            std::fs::read(sync.install_root().join("lib/libfoo.so")).unwrap(),
            b"elf"
        );

        config.symlinks.push(Symlink {
            from: "lib/missing.so.2".to_string(),
            to: "lib/missing.so".to_string(),
        });
        assert!(!sync.ensure_symlinks(&config).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_local_server() {
        let temp_dir = TempDir::new().unwrap();
        let sync = synchronizer(temp_dir.path());
        sync.write_version_marker("v1").await.unwrap();
        assert!(sync.install_root().exists());

        sync.remove_local_server().await.unwrap();
        assert!(!sync.install_root().exists());
        // removing again is fine
        sync.remove_local_server().await.unwrap();
    }
}
