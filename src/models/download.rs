use crate::error::{Result, ReplayError};
use std::path::Path;

/// Free space kept on top of every download
const DISK_BUFFER_BYTES: u64 = 100 * 1_024 * 1_024;

/// Check that `dir` has room for `required_bytes` plus a 100 MB buffer
#[cfg(unix)]
pub fn check_disk_space(dir: &Path, required_bytes: u64) -> Result<()> {
    // Get filesystem stats for the nearest existing ancestor
    let probe = dir
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("."));
    let stats = nix::sys::statvfs::statvfs(probe)
        .map_err(|e| ReplayError::Other(format!("Failed to check disk space: {e}")))?;

    #[allow(clippy::useless_conversion)]
    let available_bytes = u64::from(stats.blocks_available()) * u64::from(stats.fragment_size());
    let required_with_buffer = required_bytes.saturating_add(DISK_BUFFER_BYTES);

    if available_bytes < required_with_buffer {
        return Err(ReplayError::Other(format!(
            "Not enough disk space in {}: {} required, {} available",
            dir.display(),
            format_bytes(required_with_buffer),
            format_bytes(available_bytes)
        )));
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn check_disk_space(_dir: &Path, _required_bytes: u64) -> Result<()> {
    Ok(())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_572_864), "1.50 MB");
        assert_eq!(format_bytes(189_507_909), "180.73 MB");
        assert_eq!(format_bytes(1_610_612_736), "1.50 GB");
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_space_small_and_absurd_requests() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(check_disk_space(temp_dir.path(), 1).is_ok());
        assert!(check_disk_space(&temp_dir.path().join("not/yet/created"), 1).is_ok());
        assert!(check_disk_space(temp_dir.path(), u64::MAX / 2).is_err());
    }
}
