//! Local file state: existence, byte size and SHA-1 digest.
//!
//! SHA-1 is what the asset host publishes in every manifest, so it is kept for
//! compatibility even though it is not collision resistant.

use crate::error::Result;
use sha1::{Digest, Sha1};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// How much work an inspection does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// Existence and size only
    Fast,
    /// Existence, size and a streaming SHA-1 of the contents
    Full,
}

/// Result of inspecting a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Absent,
    Present { size: u64, sha1: Option<String> },
}

impl FileState {
    #[must_use]
    pub const fn exists(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    #[must_use]
    pub const fn size(&self) -> Option<u64> {
        match self {
            Self::Present { size, .. } => Some(*size),
            Self::Absent => None,
        }
    }

    #[must_use]
    pub fn sha1(&self) -> Option<&str> {
        match self {
            Self::Present { sha1, .. } => sha1.as_deref(),
            Self::Absent => None,
        }
    }

    /// Present and hashed to the expected digest (case-insensitive hex)
    #[must_use]
    pub fn matches_sha1(&self, expected: &str) -> bool {
        self.sha1()
            .is_some_and(|actual| actual.eq_ignore_ascii_case(expected.trim()))
    }
}

/// Computes and compares content digests of local files
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumStore;

impl ChecksumStore {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Inspect a path. A missing file is `FileState::Absent`, never an error.
    pub async fn inspect(&self, path: &Path, mode: ChecksumMode) -> Result<FileState> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FileState::Absent),
            Err(e) => return Err(e.into()),
        };

        let sha1 = if mode == ChecksumMode::Full && metadata.is_file() {
            Some(self.sha1_file(path).await?)
        } else {
            None
        };

        Ok(FileState::Present {
            size: metadata.len(),
            sha1,
        })
    }

    /// Stream a file through SHA-1 and return the lowercase hex digest
    pub async fn sha1_file(&self, path: &Path) -> Result<String> {
        let mut file = fs::File::open(path).await?;
        let mut hasher = Sha1::new();
        let mut buffer = vec![0; HASH_BUFFER_SIZE];

        loop {
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// True only if the file exists and hashes to `expected`
    pub async fn verify(&self, path: &Path, expected: &str) -> Result<bool> {
        Ok(self
            .inspect(path, ChecksumMode::Full)
            .await?
            .matches_sha1(expected))
    }
}

/// SHA-1 of an in-memory buffer
#[must_use]
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}
