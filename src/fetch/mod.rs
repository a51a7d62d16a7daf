//! Resource fetching and plugin code loading.
//!
//! [`ResourceFetcher`] retrieves manifests and configuration documents by URL.
//! [`CodeLoader`] turns a plugin's code location into plugin instances.

mod catalog;

pub use catalog::{CodeLoader, ModuleCatalog, ModuleFactory};

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme { scheme: String, url: String },

    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON at {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No module registered for plugin '{plugin_id}' ({url})")]
    ModuleNotFound { plugin_id: String, url: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::UnsupportedScheme { url, .. }
            | Self::NotFound { url }
            | Self::Status { url, .. }
            | Self::Network { url, .. }
            | Self::Io { url, .. }
            | Self::Json { url, .. }
            | Self::ModuleNotFound { url, .. } => url,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Status { status: 404, .. })
    }
}

/// Retrieves remote or local documents by URL.
#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError>;

    async fn fetch_json(&self, url: &Url) -> Result<Value, FetchError> {
        let text = self.fetch_text(url).await?;
        serde_json::from_str(&text).map_err(|source| FetchError::Json {
            url: url.to_string(),
            source,
        })
    }
}

/// Fetches `http(s)://` URLs with reqwest and `file://` URLs from disk.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("plugin-runtime/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_http(&self, url: &Url) -> Result<String, FetchError> {
        let network = |source| FetchError::Network {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(network)
    }

    async fn fetch_file(&self, url: &Url) -> Result<String, FetchError> {
        let path = url
            .to_file_path()
            .map_err(|_| FetchError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                url: url.to_string(),
            })?;

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
            Err(source) => Err(FetchError::Io {
                url: url.to_string(),
                source,
            }),
        }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for DefaultFetcher {
    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        tracing::trace!(url = %url, "fetching resource");
        match url.scheme() {
            "http" | "https" => self.fetch_http(url).await,
            "file" => self.fetch_file(url).await,
            scheme => Err(FetchError::UnsupportedScheme {
                scheme: scheme.to_string(),
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch_file_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plugins.json");
        tokio::fs::write(&path, r#"{"e": {}}"#).await.unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let value = DefaultFetcher::new().fetch_json(&url).await.unwrap();
        assert_eq!(value, json!({"e": {}}));
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let url = Url::from_file_path(temp_dir.path().join("absent.json")).unwrap();

        let err = DefaultFetcher::new().fetch_text(&url).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.url().ends_with("absent.json"));
    }

    #[tokio::test]
    async fn test_fetch_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        tokio::fs::write(&path, "{oops").await.unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let err = DefaultFetcher::new().fetch_json(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Json { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/plugins.json").unwrap();
        let err = DefaultFetcher::new().fetch_text(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme { ref scheme, .. } if scheme == "ftp"));
    }
}
