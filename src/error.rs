use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Replay engine
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Network error: {0}\n\nTroubleshooting:\n- Check internet connection\n- Verify firewall or proxy settings\n- Try again in a moment, transient resets are common with large files")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("Server manifest unavailable: {0}\n\nTroubleshooting:\n- Check internet connection\n- No cached manifest exists yet, the first install needs network access\n- Run with RUST_LOG=debug to see every candidate URL tried")]
    ManifestUnavailable(String),

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}. The file has been deleted.", .path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Invalid model: {0}\n\nTroubleshooting:\n- A model needs at least one .pth weight file\n- Drop the .zip you downloaded, the model folder, or the .pth file itself")]
    InvalidModel(String),

    #[error("Port contention: {0}\n\nTroubleshooting:\n- Another program is listening on the server port\n- Close it, or set server.port / REPLAY_PORT to a free port")]
    PortContention(String),

    #[error("Server binary not found at {}\n\nTroubleshooting:\n- The server install is incomplete or damaged\n- Remove the server directory and run: replay-engine sync", .0.display())]
    ServerBinaryNotFound(PathBuf),

    #[error("Server crashed: {0}\n\nPlease file an issue in the Replay Discord")]
    ServerCrashed(String),

    #[error("Required assets are not ready: {0}")]
    AssetsNotReady(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/replay/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ReplayError {
    /// Whether a retry of the same request could plausibly succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ReplayError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Http {
                url: e.url().map(ToString::to_string).unwrap_or_default(),
                status: status.as_u16(),
            },
            None => Self::Network(e.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for ReplayError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;
