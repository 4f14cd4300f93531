//! Server install: manifest retrieval and synchronization of the install root.
//!
//! # Example
//!
//! ```no_run
//! use replay_engine::assets::{AssetSynchronizer, BuildIdentity, ManifestFetcher, PinningPolicy};
//! use replay_engine::http::HttpClient;
//! use std::time::Duration;
//!
//! # async fn run() -> replay_engine::Result<()> {
//! let http = HttpClient::new(2, Duration::from_millis(500), Duration::from_secs(30))?;
//! let fetcher = ManifestFetcher::new(
//!     http.clone(),
//!     "https://replay-servers.replay-music.xyz",
//!     BuildIdentity::current(None, false),
//!     "/tmp/replay/server",
//! );
//! let sync = AssetSynchronizer::new(
//!     http,
//!     "https://replay-servers.replay-music.xyz",
//!     "/tmp/replay/server",
//!     "/tmp/replay",
//! );
//! sync.download_latest(&fetcher, PinningPolicy::Latest).await?;
//! # Ok(())
//! # }
//! ```

pub mod fetcher;
pub mod manifest;
pub mod sync;

pub use fetcher::ManifestFetcher;
pub use manifest::{BuildIdentity, ManifestEntry, PinningPolicy, RemoteConfig, Symlink};
pub use sync::{AssetSynchronizer, SyncReport};
