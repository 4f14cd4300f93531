//! Archive extraction and directory copies.

use crate::error::{Result, ReplayError};
use std::fs;
use std::path::{Path, PathBuf};

/// Extract a zip archive into `dest`, creating it if needed.
///
/// Runs on the blocking pool; entries with paths escaping `dest` are rejected by the zip reader.
pub async fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || extract_zip_blocking(&archive, &dest))
        .await
        .map_err(|e| ReplayError::Archive(format!("Extraction task failed: {e}")))?
}

fn extract_zip_blocking(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| {
        ReplayError::Archive(format!("{} is not a valid zip: {e}", archive.display()))
    })?;

    fs::create_dir_all(dest)?;
    zip.extract(dest)?;

    tracing::debug!(
        "Extracted {} entries from {} into {}",
        zip.len(),
        archive.display(),
        dest.display()
    );
    Ok(())
}

/// Recursively copy a directory tree
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Every file under `dir` (recursive) whose extension matches `ext`, ignoring case
pub fn find_files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            found.extend(find_files_with_extension(&path, ext)?);
        } else if has_extension(&path, ext) {
            found.push(path);
        }
    }
    Ok(found)
}

/// Case-insensitive extension check
#[must_use]
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
