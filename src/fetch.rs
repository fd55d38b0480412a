use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::FetchOutcome;

/// Total timeout for a single page fetch during a crawl.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

/// A fetched HTTP response, body already read.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("html")
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// The request timed out. Status sentinel "000".
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The request itself failed: DNS, connect, TLS. Status sentinel "000".
    #[error("request failed: {0}")]
    Request(String),
    /// Any other failure (body read, invalid encoding). Status sentinel "ERR".
    #[error("fetch error: {0}")]
    Other(String),
}

impl FetchError {
    pub fn outcome(&self) -> FetchOutcome {
        match self {
            FetchError::Timeout(_) | FetchError::Request(_) => FetchOutcome::NetworkError,
            FetchError::Other(_) => FetchOutcome::Error,
        }
    }
}

/// The open HTTP fetcher the extractor pipeline runs against. Abstracted so
/// tests can inject canned responses per URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage, FetchError>;
}

/// Production fetcher backed by the shared `reqwest` client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(e.to_string())
                } else {
                    FetchError::Request(e.to_string())
                }
            })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Other(e.to_string()))?;
        Ok(FetchedPage {
            status,
            content_type,
            body,
        })
    }
}
