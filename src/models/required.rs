use super::download::check_disk_space;
use super::registry::{known_stem_sha1, required_weights, StemmingModel, Weight};
use crate::checksum::{ChecksumMode, ChecksumStore};
use crate::config::RuntimeMode;
use crate::error::{Result, ReplayError};
use crate::http::{join_url, HttpClient};
use crate::progress::{ItemStatus, ProgressBoard, ProgressHandle, TransferStatus, TransferTracker};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Files left of a stem model download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileCounts {
    pub remaining: usize,
    pub total: usize,
}

/// Polled status of one stem model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StemStatus {
    #[serde(flatten)]
    pub item: ItemStatus,
    pub files: Option<FileCounts>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Baseline engine weights and stem separation models in the flat `weights/` directory
pub struct RequiredAssetDownloader {
    http: HttpClient,
    checksum: ChecksumStore,
    asset_host: String,
    weights_dir: PathBuf,
    mode: RuntimeMode,
    weights: Vec<Weight>,
    tracker: TransferTracker,
    stems: ProgressBoard,
    file_counts: Mutex<HashMap<String, FileCounts>>,
    in_flight_files: Mutex<HashSet<String>>,
}

impl RequiredAssetDownloader {
    #[must_use]
    pub fn new(
        http: HttpClient,
        asset_host: impl Into<String>,
        weights_dir: impl Into<PathBuf>,
        mode: RuntimeMode,
    ) -> Self {
        Self {
            http,
            checksum: ChecksumStore::new(),
            asset_host: asset_host.into(),
            weights_dir: weights_dir.into(),
            mode,
            weights: required_weights(),
            tracker: TransferTracker::new(),
            stems: ProgressBoard::new(),
            file_counts: Mutex::new(HashMap::new()),
            in_flight_files: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the required table
    #[must_use]
    pub fn with_weights(mut self, weights: Vec<Weight>) -> Self {
        self.weights = weights;
        self
    }

    #[must_use]
    pub fn weights(&self) -> &[Weight] {
        &self.weights
    }

    #[must_use]
    pub fn weights_dir(&self) -> &Path {
        &self.weights_dir
    }

    fn local_path(&self, name: &str) -> PathBuf {
        self.weights_dir.join(name)
    }

    /// Snapshot of the required-weights pass for polling
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.tracker.snapshot()
    }

    /// Cheap gate: every required file present with the exact expected size
    pub async fn has_downloaded_all(&self) -> Result<bool> {
        if !self.mode.has_local_filesystem {
            return Ok(true);
        }
        for weight in &self.weights {
            let state = self
                .checksum
                .inspect(&self.local_path(weight.name), ChecksumMode::Fast)
                .await?;
            if state.size() != Some(weight.size) {
                tracing::debug!("Required file {} missing or wrong size", weight.name);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Full SHA-1 verification of every required file
    pub async fn verify_all(&self) -> Result<bool> {
        for weight in &self.weights {
            if !self
                .checksum
                .verify(&self.local_path(weight.name), weight.sha1)
                .await?
            {
                tracing::info!("Required file {} failed verification", weight.name);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Download every required file whose hash does not match, one at a time.
    ///
    /// Returns `Ok(false)` without doing anything if a pass is already running.
    pub async fn download_all(&self) -> Result<bool> {
        if !self.mode.has_local_filesystem {
            return Ok(false);
        }
        let Some(_guard) = self.tracker.try_begin() else {
            tracing::info!("Required files are already downloading");
            return Ok(false);
        };

        let total_size = self.weights.iter().map(|w| w.size).sum();
        self.tracker.begin_pass(self.weights.len(), total_size);

        match self.download_all_pass().await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!("Required file download failed: {e}");
                self.tracker.set_error(&e);
                Err(e)
            }
        }
    }

    async fn download_all_pass(&self) -> Result<()> {
        fs::create_dir_all(&self.weights_dir)?;

        for weight in &self.weights {
            let file_num = self.tracker.next_file();
            let path = self.local_path(weight.name);

            if self.checksum.verify(&path, weight.sha1).await? {
                tracing::debug!("{} already present", weight.name);
                self.tracker.add_downloaded(weight.size);
                continue;
            }

            self.tracker.set_status(format!(
                "Downloading {} ({file_num} of {})",
                weight.name,
                self.weights.len()
            ));
            check_disk_space(&self.weights_dir, weight.size)?;

            let url = join_url(&self.asset_host, weight.name);
            self.http
                .download_to_file(&url, &path, |loaded, total| {
                    self.tracker.set_progress(loaded, total);
                })
                .await?;
            self.verify_or_delete(&path, weight.sha1).await?;
            self.tracker.add_downloaded(weight.size);
        }

        Ok(())
    }

    async fn verify_or_delete(&self, path: &Path, expected: &str) -> Result<()> {
        let state = self.checksum.inspect(path, ChecksumMode::Full).await?;
        if state.matches_sha1(expected) {
            return Ok(());
        }

        let actual = state.sha1().unwrap_or("missing").to_string();
        tracing::error!("SHA1 mismatch for {}: {actual} != {expected}", path.display());
        if state.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Err(ReplayError::Integrity {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }

    /// Delete every required file that is present
    pub fn remove_all(&self) -> Result<usize> {
        let mut removed = 0;
        for weight in &self.weights {
            let path = self.local_path(weight.name);
            if path.exists() {
                fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Download every file of a stem model.
    ///
    /// Returns `Ok(false)` if this model is already in flight. The first failing file aborts
    /// the model and the error is recorded against the model name.
    pub async fn download_stem_model(&self, model: &StemmingModel) -> Result<bool> {
        let Some(handle) = self.stems.try_begin(&model.name) else {
            tracing::info!("Stem model {} is already downloading", model.name);
            return Ok(false);
        };

        let total = model.files.len();
        lock(&self.file_counts).insert(
            model.name.clone(),
            FileCounts {
                remaining: total,
                total,
            },
        );

        for file in &model.files {
            lock(&self.in_flight_files).insert(file.clone());
            let result = self.download_stem_file(file, &handle).await;
            lock(&self.in_flight_files).remove(file);

            if let Err(e) = result {
                tracing::error!("Stem model {} failed on {file}: {e}", model.name);
                handle.record_error(&e);
                return Err(e);
            }

            if let Some(counts) = lock(&self.file_counts).get_mut(&model.name) {
                counts.remaining = counts.remaining.saturating_sub(1);
            }
        }

        tracing::info!("Stem model {} ready", model.name);
        Ok(true)
    }

    async fn download_stem_file(&self, file: &str, handle: &ProgressHandle) -> Result<()> {
        let path = self.local_path(file);
        let known = known_stem_sha1(file);

        if let Some(sha1) = known {
            if self.checksum.verify(&path, sha1).await? {
                tracing::debug!("{file} already present");
                return Ok(());
            }
        }

        fs::create_dir_all(&self.weights_dir)?;
        handle.reset();
        let url = join_url(&self.asset_host, file);
        self.http
            .download_to_file(&url, &path, |loaded, total| handle.update(loaded, total))
            .await?;

        if let Some(sha1) = known {
            self.verify_or_delete(&path, sha1).await?;
        }
        Ok(())
    }

    /// Whether every file of the model is present and, where the hash is known, verified
    pub async fn is_stem_model_downloaded(&self, model: &StemmingModel) -> Result<bool> {
        if self.stems.is_in_flight(&model.name) {
            return Ok(false);
        }
        for file in &model.files {
            let path = self.local_path(file);
            let present = match known_stem_sha1(file) {
                Some(sha1) => self.checksum.verify(&path, sha1).await?,
                None => path.is_file(),
            };
            if !present {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Stem files on disk: everything in `weights/` except baseline weights, files still
    /// downloading and partial transfers
    pub fn list_stem_models(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.weights_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let in_flight = lock(&self.in_flight_files).clone();
        let mut files = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if Weight::is_baseline(&name)
                || in_flight.contains(&name)
                || name.ends_with(".partial")
            {
                continue;
            }
            files.push(name);
        }
        files.sort();
        Ok(files)
    }

    /// Progress, error and file counts of one stem model
    #[must_use]
    pub fn stem_status(&self, model_name: &str) -> StemStatus {
        StemStatus {
            item: self.stems.status(model_name),
            files: lock(&self.file_counts).get(model_name).copied(),
        }
    }
}
