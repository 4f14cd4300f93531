//! Shared HTTP transport with bounded retries.
//!
//! Every remote call (manifests, catalog, archives, weights, server API) goes through
//! [`HttpClient`]. Transient failures (connection errors, 5xx, 429) are retried up to
//! `retries` extra times with exponential backoff; anything else fails immediately.

use crate::config::Config;
use crate::error::{Result, ReplayError};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(retries: u32, retry_delay: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("replay-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReplayError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            retries,
            retry_delay,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.remote.retries,
            config.remote.retry_delay(),
            Duration::from_secs(config.remote.connect_timeout_secs),
        )
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.fetch_json(url, None).await
    }

    /// GET and decode a JSON body, sending `token` as a bearer credential
    pub async fn get_json_with_token<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<T> {
        self.fetch_json(url, Some(token)).await
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str, token: Option<&str>) -> Result<T> {
        let bytes = self
            .with_transport_retries(url, move || async move {
                let mut request = self.client.get(url);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                let response = request.send().await?.error_for_status()?;
                Ok(response.bytes().await?)
            })
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// GET with a per-request timeout, true on any 2xx
    pub async fn get_ok(&self, url: &str, timeout: Duration) -> bool {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("GET {url} failed: {e}");
                false
            }
        }
    }

    /// POST with no body and a per-request timeout. Not retried.
    pub async fn post(&self, url: &str, timeout: Duration) -> Result<()> {
        self.client
            .post(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Stream `url` into `dest`, reporting `(loaded, total)` after every chunk.
    ///
    /// Bytes land in `<dest>.partial` and are renamed into place once the body is
    /// complete, so an interrupted transfer never leaves a truncated `dest`. Returns the
    /// number of bytes written.
    pub async fn download_to_file<F>(&self, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(u64, u64),
    {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let response = self
            .with_transport_retries(url, move || async move {
                Ok(self.client.get(url).send().await?.error_for_status()?)
            })
            .await?;

        let total = response.content_length().unwrap_or(0);
        let partial = partial_path(dest);
        let written = match write_body(response, &partial, total, &mut on_progress).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        fs::rename(&partial, dest).await?;

        tracing::debug!("Downloaded {url} -> {} ({written} bytes)", dest.display());
        Ok(written)
    }

    async fn with_transport_retries<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.retry_delay;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Request to {url} failed ({e}), retry {attempt}/{} in {delay:?}",
                        self.retries
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Run `op` up to `attempts` times, returning the first success or the last error.
///
/// Unlike the transport retries this retries every error kind; it wraps whole
/// operations (download, extract, verify) where a corrupt transfer is worth redoing.
pub async fn with_retries<T, F, Fut>(attempts: u32, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!("{label} failed on attempt {attempt}/{attempts}: {e}");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn write_body<F>(
    response: reqwest::Response,
    partial: &Path,
    total: u64,
    on_progress: &mut F,
) -> Result<u64>
where
    F: FnMut(u64, u64),
{
    let mut file = fs::File::create(partial).await?;
    let mut loaded = 0u64;
    let mut stream = response.bytes_stream();

    on_progress(0, total);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        loaded += chunk.len() as u64;
        on_progress(loaded, total.max(loaded));
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(loaded)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Join a host and a file name with exactly one slash
#[must_use]
pub fn join_url(host: &str, file: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), file.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(2, Duration::from_millis(10), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h/", "/a.zip"), "http://h/a.zip");
        assert_eq!(join_url("http://h", "a.zip"), "http://h/a.zip");
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/x/model.pth")),
            PathBuf::from("/x/model.pth.partial")
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .mount(&server)
            .await;

        let value: serde_json::Value = client()
            .get_json(&format!("{}/data.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client()
            .get_json::<serde_json::Value>(&format!("{}/missing.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_download_reports_progress_and_renames() {
        let server = MockServer::start().await;
        let body = vec![3u8; 4096];
        Mock::given(method("GET"))
            .and(path("/blob.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("nested").join("blob.bin");
        let mut last = (0, 0);
        let written = client()
            .download_to_file(&format!("{}/blob.bin", server.uri()), &dest, |l, t| {
                last = (l, t);
            })
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(last, (4096, 4096));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!partial_path(&dest).exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blob.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 4096]))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("blob.bin");
        // every write to /dev/full fails with ENOSPC
        std::os::unix::fs::symlink("/dev/full", partial_path(&dest)).unwrap();

        let result = client()
            .download_to_file(&format!("{}/blob.bin", server.uri()), &dest, |_, _| {})
            .await;

        assert!(matches!(result, Err(ReplayError::Io(_))));
        assert!(std::fs::symlink_metadata(partial_path(&dest)).is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_with_retries_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retries(3, "flaky", move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ReplayError::Other("boom".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_stops_on_success() {
        let calls = AtomicU32::new(0);
        let value = with_retries(3, "flaky", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(ReplayError::Other("boom".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
