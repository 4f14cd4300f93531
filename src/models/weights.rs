use super::catalog::{
    merge_catalog, start_case, ArtistModelOption, HubTreeEntry, RemoteModelWeight, VoiceModelWeight,
};
use super::download::check_disk_space;
use crate::archive::{self, copy_dir_all, find_files_with_extension, has_extension};
use crate::config::RuntimeMode;
use crate::error::{Result, ReplayError};
use crate::http::{join_url, with_retries, HttpClient};
use crate::progress::{ItemStatus, ProgressBoard, ProgressHandle};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const DOWNLOAD_ATTEMPTS: u32 = 3;

/// A Hugging Face repo listed next to the catalog
struct HubListing {
    tree_url: String,
    token: String,
}

/// Voice model catalog, downloads and user-imported models.
///
/// Each model lives in `models/<id>/`. Downloads are tracked per id on a [`ProgressBoard`];
/// a second download of an id that is already in flight is refused.
///
/// With a Hugging Face token the repo's zip files are listed after the catalog entries.
/// They are browse-only: [`WeightRegistry::download`] serves catalog entries.
pub struct WeightRegistry {
    http: HttpClient,
    catalog_url: String,
    models_host: String,
    models_dir: PathBuf,
    mode: RuntimeMode,
    hub: Option<HubListing>,
    remote: Mutex<Option<Vec<VoiceModelWeight>>>,
    hub_models: Mutex<Option<Vec<VoiceModelWeight>>>,
    board: ProgressBoard,
}

impl WeightRegistry {
    #[must_use]
    pub fn new(
        http: HttpClient,
        catalog_url: impl Into<String>,
        models_host: impl Into<String>,
        models_dir: impl Into<PathBuf>,
        mode: RuntimeMode,
    ) -> Self {
        Self {
            http,
            catalog_url: catalog_url.into(),
            models_host: models_host.into(),
            models_dir: models_dir.into(),
            mode,
            hub: None,
            remote: Mutex::new(None),
            hub_models: Mutex::new(None),
            board: ProgressBoard::new(),
        }
    }

    /// Also list the zip files of a Hugging Face repo tree, authenticated with `token`
    #[must_use]
    pub fn with_hub(mut self, tree_url: impl Into<String>, token: impl Into<String>) -> Self {
        self.hub = Some(HubListing {
            tree_url: tree_url.into(),
            token: token.into(),
        });
        self
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Progress and last error of one model
    #[must_use]
    pub fn status(&self, id: &str) -> ItemStatus {
        self.board.status(id)
    }

    /// Remote catalog followed by the Hugging Face listing, each fetched once and memoized.
    ///
    /// A failed fetch is logged and yields the previous listing (empty on first use) so
    /// local models stay listable offline.
    pub async fn remote_catalog(&self, force: bool) -> Vec<VoiceModelWeight> {
        let mut weights = self.catalog(force).await;
        weights.extend(self.hub_catalog(force).await);
        weights
    }

    async fn catalog(&self, force: bool) -> Vec<VoiceModelWeight> {
        let mut remote = self.remote.lock().await;
        if !force {
            if let Some(weights) = remote.as_ref() {
                return weights.clone();
            }
        }

        match self.http.get_json::<Vec<RemoteModelWeight>>(&self.catalog_url).await {
            Ok(items) => {
                let weights: Vec<VoiceModelWeight> =
                    items.into_iter().map(VoiceModelWeight::from).collect();
                tracing::debug!("Loaded {} catalog entries", weights.len());
                *remote = Some(weights.clone());
                weights
            }
            Err(e) => {
                tracing::error!("Failed to load model catalog from {}: {e}", self.catalog_url);
                remote.clone().unwrap_or_default()
            }
        }
    }

    async fn hub_catalog(&self, force: bool) -> Vec<VoiceModelWeight> {
        let Some(hub) = &self.hub else {
            return Vec::new();
        };
        let mut cached = self.hub_models.lock().await;
        if !force {
            if let Some(weights) = cached.as_ref() {
                return weights.clone();
            }
        }

        match self
            .http
            .get_json_with_token::<Vec<HubTreeEntry>>(&hub.tree_url, &hub.token)
            .await
        {
            Ok(entries) => {
                let weights: Vec<VoiceModelWeight> =
                    entries.into_iter().filter_map(HubTreeEntry::into_weight).collect();
                tracing::debug!("Loaded {} Hugging Face models", weights.len());
                *cached = Some(weights.clone());
                weights
            }
            Err(e) => {
                tracing::error!("Failed to list Hugging Face models: {e}");
                cached.clone().unwrap_or_default()
            }
        }
    }

    /// Directory names under `models/`
    pub fn local_model_dirs(&self) -> Result<Vec<String>> {
        if !self.mode.has_local_filesystem {
            return Ok(Vec::new());
        }

        let entries = match fs::read_dir(&self.models_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(dirs)
    }

    /// Catalog merged with local directories, downloaded entries first
    pub async fn list(&self, local_only: bool) -> Result<Vec<ArtistModelOption>> {
        let remote = if local_only {
            Vec::new()
        } else {
            self.remote_catalog(false).await
        };
        let local = self.local_model_dirs()?;

        Ok(merge_catalog(&remote, &local, self.mode, |id| {
            self.board.is_in_flight(id)
        }))
    }

    /// Download and extract a catalog model.
    ///
    /// Returns `Ok(false)` if the id is already in flight. Failures are recorded against the
    /// id for polling and the whole transfer is retried up to three times.
    pub async fn download(&self, id: &str) -> Result<bool> {
        let Some(handle) = self.board.try_begin(id) else {
            tracing::info!("Already downloading {id}");
            return Ok(false);
        };

        let result = self.download_claimed(id, &handle).await;
        if let Err(e) = &result {
            tracing::error!("Download of {id} failed: {e}");
            handle.record_error(e);
        }
        result.map(|()| true)
    }

    async fn download_claimed(&self, id: &str, handle: &ProgressHandle) -> Result<()> {
        let catalog = self.catalog(false).await;
        let weight = catalog
            .iter()
            .find(|w| w.id == id)
            .ok_or_else(|| ReplayError::NotFound(format!("Model {id} is not in the catalog")))?;

        fs::create_dir_all(&self.models_dir)?;
        check_disk_space(&self.models_dir, weight.size.saturating_mul(2))?;

        let zip_name = format!("{id}.zip");
        let url = join_url(&self.models_host, &zip_name);
        let zip_path = self.models_dir.join(&zip_name);
        let target = self.models_dir.join(id);

        let http = &self.http;
        let (url, zip_path, target) = (&url, &zip_path, &target);
        with_retries(DOWNLOAD_ATTEMPTS, &format!("Download of {zip_name}"), move |_| async move {
            handle.reset();
            let outcome = async {
                http.download_to_file(url, zip_path, |loaded, total| handle.update(loaded, total))
                    .await?;
                tracing::info!("Downloaded {}", zip_path.display());
                archive::extract_zip(zip_path, target).await?;
                tokio::fs::remove_file(zip_path).await?;
                tracing::info!("Unzipped {}", target.display());
                Ok::<(), ReplayError>(())
            }
            .await;

            match &outcome {
                Ok(()) => handle.clear_error(),
                Err(e) => handle.record_error(e),
            }
            outcome
        })
        .await
    }

    /// Import a model from a zip, a directory, or a loose `.pth` file.
    ///
    /// A loose `.pth` brings along only the `.index` files next to it. The result must contain
    /// at least one `.pth` somewhere, otherwise the new directory is removed again.
    pub async fn add_local_model(&self, source: &Path) -> Result<ArtistModelOption> {
        if !self.mode.has_local_filesystem {
            return Err(ReplayError::Other(
                "Importing models needs a local filesystem".to_string(),
            ));
        }
        if !source.exists() {
            return Err(ReplayError::NotFound(format!("{} does not exist", source.display())));
        }

        let id = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_lowercase())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| ReplayError::InvalidModel(format!("{} has no usable name", source.display())))?;
        let target = self.models_dir.join(&id);
        // a re-import replaces the old contents; importing the directory itself is left alone
        if target.exists() && !source.starts_with(&target) {
            fs::remove_dir_all(&target)?;
        }

        if source.is_dir() {
            copy_dir_all(source, &target)?;
        } else if has_extension(source, "zip") {
            archive::extract_zip(source, &target).await?;
        } else if has_extension(source, "pth") {
            copy_weight_with_indexes(source, &target)?;
        }

        if find_files_with_extension(&target, "pth")?.is_empty() {
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            return Err(ReplayError::InvalidModel(format!(
                "{} does not contain a .pth file",
                source.display()
            )));
        }

        tracing::info!("Imported {} as {id}", source.display());
        self.list(true)
            .await?
            .into_iter()
            .find(|option| option.weight.id == id)
            .ok_or_else(|| ReplayError::NotFound(format!("Imported model {id} is not listed")))
    }

    /// Local model directory whose name matches, ignoring case and surrounding whitespace
    pub fn find_local_by_name(&self, name: &str) -> Result<Option<PathBuf>> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .local_model_dirs()?
            .into_iter()
            .find(|dir| dir.trim().to_lowercase() == wanted)
            .map(|dir| self.models_dir.join(dir)))
    }

    /// Delete a local model by name. No match is not an error.
    pub fn remove_by_name(&self, name: &str) -> Result<bool> {
        match self.find_local_by_name(name)? {
            Some(dir) => {
                tracing::info!("Removing model {}", dir.display());
                fs::remove_dir_all(dir)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Open a local model's folder in the file manager. No match is not an error.
    pub fn reveal_by_name(&self, name: &str) -> Result<bool> {
        match self.find_local_by_name(name)? {
            Some(dir) => {
                open::that(&dir).map_err(|e| {
                    ReplayError::Other(format!("Failed to open {}: {e}", dir.display()))
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every local model directory
    pub fn remove_all(&self) -> Result<usize> {
        let dirs = self.local_model_dirs()?;
        for dir in &dirs {
            fs::remove_dir_all(self.models_dir.join(dir))?;
        }
        Ok(dirs.len())
    }

    /// Catalog name for an id, or the id in Start Case
    pub async fn display_name_for(&self, id: &str) -> String {
        if id.is_empty() {
            return String::new();
        }
        for listing in [&self.remote, &self.hub_models] {
            let weights = listing.lock().await;
            if let Some(weight) = weights.iter().flatten().find(|w| w.id == id) {
                return weight.name.clone();
            }
        }
        start_case(id)
    }
}

fn copy_weight_with_indexes(weight: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    let Some(file_name) = weight.file_name() else {
        return Ok(());
    };
    fs::copy(weight, target.join(file_name))?;

    let Some(source_dir) = weight.parent() else {
        return Ok(());
    };
    for entry in fs::read_dir(source_dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, "index") {
            if let Some(name) = path.file_name() {
                fs::copy(&path, target.join(name))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn registry(root: &Path) -> WeightRegistry {
        let http = HttpClient::new(0, Duration::from_millis(1), Duration::from_secs(5)).unwrap();
        WeightRegistry::new(
            http,
            "http://127.0.0.1:9/models.json",
            "http://127.0.0.1:9",
            root.join("models"),
            RuntimeMode {
                has_local_filesystem: true,
            },
        )
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_add_loose_pth_copies_only_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let downloads = temp_dir.path().join("Downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("MyVoice.pth"), b"weights").unwrap();
        fs::write(downloads.join("added_IVF.INDEX"), b"index").unwrap();
        fs::write(downloads.join("holiday.jpg"), b"photo").unwrap();
        fs::write(downloads.join("other.pth"), b"unrelated").unwrap();

        let registry = registry(temp_dir.path());
        let option = registry
            .add_local_model(&downloads.join("MyVoice.pth"))
            .await
            .unwrap();
        assert_eq!(option.weight.id, "myvoice");
        assert!(option.downloaded);

        let target = registry.models_dir().join("myvoice");
        assert!(target.join("MyVoice.pth").exists());
        assert!(target.join("added_IVF.INDEX").exists());
        assert!(!target.join("holiday.jpg").exists());
        assert!(!target.join("other.pth").exists());

        // importing again is harmless
        registry
            .add_local_model(&downloads.join("MyVoice.pth"))
            .await
            .unwrap();
        assert_eq!(registry.local_model_dirs().unwrap(), vec!["myvoice"]);
    }

    #[tokio::test]
    async fn test_add_zip_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("Singer.zip");
        write_zip(&archive, &[("nested/singer.pth", "w"), ("nested/singer.index", "i")]);

        let folder = temp_dir.path().join("Band");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("band.PTH"), b"w").unwrap();

        let registry = registry(temp_dir.path());
        registry.add_local_model(&archive).await.unwrap();
        registry.add_local_model(&folder).await.unwrap();

        let mut dirs = registry.local_model_dirs().unwrap();
        dirs.sort();
        assert_eq!(dirs, vec!["band", "singer"]);
    }

    #[tokio::test]
    async fn test_reimport_replaces_previous_contents() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("first").join("Voice");
        fs::create_dir_all(&first).unwrap();
        fs::write(first.join("voice.pth"), b"w").unwrap();
        fs::write(first.join("stale.index"), b"i").unwrap();

        let registry = registry(temp_dir.path());
        registry.add_local_model(&first).await.unwrap();

        let second = temp_dir.path().join("second").join("Voice");
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("notes.txt"), b"no weights").unwrap();

        let err = registry.add_local_model(&second).await.unwrap_err();
        assert!(matches!(err, ReplayError::InvalidModel(_)));
        assert!(!registry.models_dir().join("voice").exists());

        fs::write(second.join("voice_v2.pth"), b"w2").unwrap();
        registry.add_local_model(&second).await.unwrap();
        let target = registry.models_dir().join("voice");
        assert!(target.join("voice_v2.pth").exists());
        assert!(!target.join("voice.pth").exists());
        assert!(!target.join("stale.index").exists());
    }

    #[tokio::test]
    async fn test_add_without_pth_is_invalid_and_cleaned_up() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("empty.zip");
        write_zip(&archive, &[("readme.txt", "nothing here")]);

        let registry = registry(temp_dir.path());
        let err = registry.add_local_model(&archive).await.unwrap_err();
        assert!(matches!(err, ReplayError::InvalidModel(_)));
        assert!(!registry.models_dir().join("empty").exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(temp_dir.path());
        let err = registry
            .add_local_model(&temp_dir.path().join("ghost.pth"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::NotFound(_)));
    }

    #[test]
    fn test_remove_by_name_is_case_and_space_insensitive() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(temp_dir.path());
        fs::create_dir_all(registry.models_dir().join("customvoice")).unwrap();

        assert!(!registry.remove_by_name("nobody").unwrap());
        assert!(registry.remove_by_name("  CustomVoice ").unwrap());
        assert!(!registry.models_dir().join("customvoice").exists());
    }

    #[test]
    fn test_remove_all() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(temp_dir.path());
        fs::create_dir_all(registry.models_dir().join("a")).unwrap();
        fs::create_dir_all(registry.models_dir().join("b")).unwrap();
        assert_eq!(registry.remove_all().unwrap(), 2);
        assert!(registry.local_model_dirs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_display_name_falls_back_to_start_case() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(temp_dir.path());
        assert_eq!(registry.display_name_for("my_voice").await, "My Voice");
        assert_eq!(registry.display_name_for("").await, "");
    }
}
