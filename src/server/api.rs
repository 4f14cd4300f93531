use crate::error::Result;
use crate::http::HttpClient;
use crate::models::StemmingModel;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the local inference server's HTTP API
#[derive(Debug, Clone)]
pub struct ServerApi {
    http: HttpClient,
    base_url: String,
}

impl ServerApi {
    #[must_use]
    pub fn new(http: HttpClient, port: u16) -> Self {
        Self {
            http,
            base_url: format!("http://127.0.0.1:{port}"),
        }
    }

    /// Point at an arbitrary base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True if the server answers its health endpoint
    pub async fn health(&self) -> bool {
        self.http
            .get_ok(&format!("{}/health", self.base_url), PROBE_TIMEOUT)
            .await
    }

    /// Ask the server to exit on its own
    pub async fn shutdown(&self) -> Result<()> {
        self.http
            .post(&format!("{}/shutdown", self.base_url), SHUTDOWN_TIMEOUT)
            .await
    }

    /// Stem separation models the server knows how to run
    pub async fn stemming_models(&self) -> Result<Vec<StemmingModel>> {
        self.http
            .get_json(&format!("{}/stemming_models", self.base_url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> ServerApi {
        let http = HttpClient::new(0, Duration::from_millis(1), Duration::from_secs(5)).unwrap();
        ServerApi::new(http, 0).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_health_and_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/shutdown"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server);
        assert!(api.health().await);
        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_is_false_when_unreachable() {
        let http = HttpClient::new(0, Duration::from_millis(1), Duration::from_secs(1)).unwrap();
        // nothing listens on port 9 (discard) in test environments
        let api = ServerApi::new(http, 9);
        assert!(!api.health().await);
    }

    #[tokio::test]
    async fn test_stemming_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stemming_models"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"name": "UVR-MDX-NET-Voc_FT", "files": ["UVR-MDX-NET-Voc_FT.onnx"], "type": "mdx"}]"#,
            ))
            .mount(&server)
            .await;

        let models = api(&server).stemming_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].files, vec!["UVR-MDX-NET-Voc_FT.onnx"]);
    }
}
