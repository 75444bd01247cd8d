//! Asset locations
//!
//! Library assets travel through the engine either as plain filesystem paths
//! or as `app://asset?path=...` URLs that wrap a percent-encoded path. Any
//! other `scheme://` location is handed to the conventional fetcher.

use crate::{Result, SoundstageError};
use std::path::{Path, PathBuf};
use url::Url;

/// Scheme used for privileged local asset URLs
pub const ASSET_SCHEME: &str = "app";

const ASSET_BASE_URL: &str = "app://asset";

/// Where an asset lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    /// Filesystem path, read through the privileged (allow-listed) local read
    Local(PathBuf),
    /// Already reachable location, retrieved through a [`crate::Fetch`] implementation
    Remote(Url),
}

impl AssetLocation {
    /// Classify a location string.
    pub fn parse(location: &str) -> Result<Self> {
        if !location.contains("://") {
            return Ok(Self::Local(PathBuf::from(location)));
        }

        let url = Url::parse(location)
            .map_err(|e| SoundstageError::InvalidLocation(format!("{location}: {e}")))?;
        if url.scheme() != ASSET_SCHEME {
            return Ok(Self::Remote(url));
        }

        let path = url
            .query_pairs()
            .find(|(name, _)| name == "path")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SoundstageError::InvalidLocation(format!("{location}: missing path parameter"))
            })?;
        Ok(Self::Local(PathBuf::from(path)))
    }

    /// Lowercase extension without the dot, used as a decoder hint
    pub fn extension(&self) -> Option<String> {
        let path = match self {
            Self::Local(path) => path.as_path(),
            Self::Remote(url) => Path::new(url.path()),
        };
        extension_of(path)
    }
}

/// Build the `app://asset?path=...` URL for a filesystem path.
pub fn asset_url(path: impl AsRef<Path>) -> String {
    let path = path.as_ref().to_string_lossy();
    match Url::parse_with_params(ASSET_BASE_URL, &[("path", path.as_ref())]) {
        Ok(url) => url.into(),
        // The base URL is a constant; only reachable if it stops parsing.
        Err(_) => format!("{ASSET_BASE_URL}?path={path}"),
    }
}

/// MIME type for an asset path, based on its extension.
pub fn mime_type(path: impl AsRef<Path>) -> &'static str {
    match extension_of(path.as_ref()).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_local() {
        let location = AssetLocation::parse("/music/Tavern Theme.MP3").unwrap();
        assert_eq!(
            location,
            AssetLocation::Local(PathBuf::from("/music/Tavern Theme.MP3"))
        );
        assert_eq!(location.extension().as_deref(), Some("mp3"));
    }

    #[test]
    fn test_asset_url_round_trip() {
        let original = "/library/sfx/door creak & slam.wav";
        let url = asset_url(original);
        assert!(url.starts_with("app://asset?path="));
        assert!(!url.contains(' '));

        let location = AssetLocation::parse(&url).unwrap();
        assert_eq!(location, AssetLocation::Local(PathBuf::from(original)));
    }

    #[test]
    fn test_asset_url_without_path_is_invalid() {
        let err = AssetLocation::parse("app://asset?other=1").unwrap_err();
        assert!(matches!(err, SoundstageError::InvalidLocation(_)));

        let err = AssetLocation::parse("app://asset?path=").unwrap_err();
        assert!(matches!(err, SoundstageError::InvalidLocation(_)));
    }

    #[test]
    fn test_other_schemes_are_remote() {
        let location = AssetLocation::parse("file:///tmp/rain.ogg").unwrap();
        match &location {
            AssetLocation::Remote(url) => assert_eq!(url.scheme(), "file"),
            other => panic!("expected remote location, got {other:?}"),
        }
        assert_eq!(location.extension().as_deref(), Some("ogg"));
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type("a.mp3"), "audio/mpeg");
        assert_eq!(mime_type("b.JPEG"), "image/jpeg");
        assert_eq!(mime_type("c.m4a"), "audio/mp4");
        assert_eq!(mime_type("d.xyz"), "application/octet-stream");
        assert_eq!(mime_type("no_extension"), "application/octet-stream");
    }
}
