//! Source fetching for remote and local photos.
//!
//! The estimator only needs bytes for a locator; where they come from is a
//! collaborator behind [`SourceFetcher`]. [`HttpFetcher`] handles
//! `http(s)://` URLs with reqwest and falls back to the filesystem for
//! `file://` URLs and plain paths. [`NoFetcher`] refuses everything and is
//! what an in-memory estimator gets.
//!
//! Remote fetches can be retried with exponential backoff (0.5s, 1s, 2s,
//! ...). A 403 or 404 is final: the photo is gone or off limits, and asking
//! again will not change that.

use crate::config::FetchConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Fetching is disabled: {0}")]
    Disabled(String),
}

/// Something that turns a locator into raw image bytes.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError>;
}

/// Where a locator points.
#[derive(Debug, PartialEq, Eq)]
enum Locator<'a> {
    Remote(&'a str),
    Local(&'a Path),
}

fn classify(locator: &str) -> Locator<'_> {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        Locator::Remote(locator)
    } else if let Some(path) = locator.strip_prefix("file://") {
        Locator::Local(Path::new(path))
    } else {
        Locator::Local(Path::new(locator))
    }
}

/// Wait before retry number `attempt + 1`: `0.5s * 2^attempt`.
pub fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500u64 << attempt.min(16))
}

/// Whether another attempt could succeed where this one failed.
fn is_retryable(err: &FetchError) -> bool {
    !matches!(
        err,
        FetchError::Status { status, .. }
            if *status == StatusCode::FORBIDDEN || *status == StatusCode::NOT_FOUND
    )
}

/// reqwest-backed fetcher with a request timeout and optional retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retries: u32,
}

impl HttpFetcher {
    /// Single-attempt fetcher.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, retries: 0 })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self::new(Duration::from_secs(config.timeout_secs), &config.user_agent)?
            .with_retries(config.retries))
    }

    /// Allow `retries` extra attempts after a retryable failure.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.retries && is_retryable(&e) => {
                    let backoff = retry_backoff(attempt);
                    tracing::debug!(
                        url = %url,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "fetch failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let bytes = response.bytes().await?;
        tracing::debug!(url = %url, bytes = bytes.len(), "fetched remote photo");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        match classify(locator) {
            Locator::Remote(url) => self.fetch_remote(url).await,
            Locator::Local(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

/// Fetcher that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFetcher;

#[async_trait]
impl SourceFetcher for NoFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Disabled(locator.to_string()))
    }
}
