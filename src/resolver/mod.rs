//! Asset resolution
//!
//! Turns library paths and asset URLs into byte streams the decoder can
//! consume. Local reads are privileged (arbitrary filesystem paths) and so are
//! gated by an extension allow-list; everything else goes through a [`Fetch`]
//! implementation. The default [`UrlFetcher`] handles `file://` and, with the
//! `http` feature, `http(s)://` locations.

#[cfg(feature = "http")]
pub mod http;
pub mod location;

#[cfg(feature = "http")]
pub use http::HttpFetcher;
pub use location::{asset_url, mime_type, AssetLocation};

use crate::config::PlaybackConfig;
use crate::{Result, SoundstageError};
use log::debug;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Conventional retrieval of an already reachable location
pub trait Fetch: Send + Sync {
    /// Retrieve the full contents behind `url`.
    fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Fetcher for `file://` URLs. Other schemes are reported as retrieval failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl Fetch for FileFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        if url.scheme() != "file" {
            return Err(SoundstageError::Retrieval(format!(
                "unsupported scheme '{}' for {url}",
                url.scheme()
            )));
        }
        let path = url
            .to_file_path()
            .map_err(|_| SoundstageError::Retrieval(format!("not a local file URL: {url}")))?;
        std::fs::read(&path)
            .map_err(|e| SoundstageError::Retrieval(format!("{}: {e}", path.display())))
    }
}

/// Routes each location to the fetcher for its scheme
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    file: FileFetcher,
    #[cfg(feature = "http")]
    http: Option<HttpFetcher>,
}

impl UrlFetcher {
    /// File fetcher plus, when available, a default HTTP client
    pub fn new() -> Self {
        Self {
            file: FileFetcher,
            #[cfg(feature = "http")]
            http: HttpFetcher::new()
                .map_err(|err| log::warn!("HTTP retrieval disabled: {err}"))
                .ok(),
        }
    }

    /// Use a specific HTTP fetcher
    #[cfg(feature = "http")]
    pub fn with_http(http: HttpFetcher) -> Self {
        Self {
            file: FileFetcher,
            http: Some(http),
        }
    }
}

impl Default for UrlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for UrlFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        match url.scheme() {
            "file" => self.file.fetch(url),
            #[cfg(feature = "http")]
            "http" | "https" => match &self.http {
                Some(http) => http.fetch(url),
                None => Err(SoundstageError::Retrieval(format!(
                    "no HTTP client available for {url}"
                ))),
            },
            scheme => Err(SoundstageError::Retrieval(format!(
                "unsupported scheme '{scheme}' for {url}"
            ))),
        }
    }
}

/// A resolved asset, ready for decoding
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    /// Raw file contents
    pub bytes: Arc<[u8]>,
    /// Lowercase extension (without dot), used as a format hint
    pub extension: Option<String>,
}

/// Resolves asset locations to bytes
pub struct AssetResolver {
    allowed_extensions: HashSet<String>,
    fetcher: Box<dyn Fetch>,
}

impl AssetResolver {
    /// Create a resolver using the config's allow-list and a [`UrlFetcher`]
    pub fn new(config: &PlaybackConfig) -> Self {
        Self::with_fetcher(config, Box::new(UrlFetcher::new()))
    }

    /// Create a resolver with a custom fetcher for non-local locations
    pub fn with_fetcher(config: &PlaybackConfig, fetcher: Box<dyn Fetch>) -> Self {
        let allowed_extensions = config
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            allowed_extensions,
            fetcher,
        }
    }

    /// Resolve a plain path or asset URL to its bytes
    pub fn resolve(&self, location: &str) -> Result<ResolvedAsset> {
        let parsed = AssetLocation::parse(location)?;
        let extension = parsed.extension();
        let bytes = match &parsed {
            AssetLocation::Local(path) => self.read_local(path)?,
            AssetLocation::Remote(url) => self.fetcher.fetch(url)?,
        };
        debug!(
            "Resolved '{}' ({} bytes, {})",
            location,
            bytes.len(),
            match &parsed {
                AssetLocation::Local(path) => mime_type(path),
                AssetLocation::Remote(url) => mime_type(url.path()),
            }
        );
        Ok(ResolvedAsset {
            bytes: Arc::from(bytes),
            extension,
        })
    }

    /// Privileged local read: extension gate first, then the filesystem
    pub fn read_local(&self, path: &Path) -> Result<Vec<u8>> {
        if !self.is_allowed(path) {
            return Err(SoundstageError::NotAllowed(path.display().to_string()));
        }
        std::fs::read(path).map_err(|source| SoundstageError::NotFound {
            path: path.display().to_string(),
            source,
        })
    }

    /// Whether the allow-list accepts this path's extension
    pub fn is_allowed(&self, path: &Path) -> bool {
        location::extension_of(path)
            .map(|ext| self.allowed_extensions.contains(&ext))
            .unwrap_or(false)
    }
}
