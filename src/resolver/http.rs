//! HTTP(S) retrieval using reqwest
//!
//! Runs on the background decode pool, so the blocking client is used.

use super::Fetch;
use crate::{Result, SoundstageError};
use log::debug;
use reqwest::blocking::Client;
use std::time::Duration;
use url::Url;

/// Default timeout for a whole asset download
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetcher for `http://` and `https://` locations
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Client with [`DEFAULT_FETCH_TIMEOUT`] and system proxy settings
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Client with a custom download timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            SoundstageError::Retrieval(format!("Failed to create HTTP client: {e}"))
        })?;
        Ok(Self::from_client(client))
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SoundstageError::Retrieval(format!(
                "unsupported scheme '{}' for {url}",
                url.scheme()
            )));
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| SoundstageError::Retrieval(format!("{url}: {e}")))?;
        let bytes = response
            .bytes()
            .map_err(|e| SoundstageError::Retrieval(format!("{url}: {e}")))?;

        debug!("Fetched {} bytes from {url}", bytes.len());
        Ok(bytes.to_vec())
    }
}
