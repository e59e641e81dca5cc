//! HTTP source for remotely published files (e.g. monthly trip dumps)

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use super::SourceStore;
use crate::error::{LoadError, Result};

/// Default request timeout for source downloads
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Fetches sources with `GET`; existence is checked with `HEAD`
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl SourceStore for HttpSource {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn exists(&self, location: &str) -> Result<bool> {
        let response = self
            .client
            .head(location)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LoadError::source_unavailable(location, e))?;

        debug!(url = location, status = %response.status(), "HEAD source");
        Ok(response.status().is_success())
    }

    async fn read(&self, location: &str) -> Result<Vec<u8>> {
        info!(url = location, "Fetching source");

        let response = self
            .client
            .get(location)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LoadError::source_unavailable(location, e))?;

        if !response.status().is_success() {
            return Err(LoadError::source_unavailable(
                location,
                format!("HTTP status {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoadError::source_unavailable(location, e))?;
        Ok(bytes.to_vec())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Err(LoadError::config(format!(
            "listing is not supported for HTTP sources ({})",
            prefix
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_read_and_exists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/green_tripdata_2019-01.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("id\n1\n"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/green_tripdata_2019-01.csv"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let source = HttpSource::new();
        let url = format!("{}/green_tripdata_2019-01.csv", server.uri());
        assert!(source.exists(&url).await.unwrap());
        assert_eq!(source.read(&url).await.unwrap(), b"id\n1\n");

        let missing = format!("{}/nope.csv", server.uri());
        assert!(!source.exists(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_error_status_is_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = HttpSource::new()
            .read(&format!("{}/busy.csv", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable { .. }));
    }
}
