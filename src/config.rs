//! Engine configuration
//!
//! [`PlaybackConfig`] collects the tunables of the playback engine. It can be
//! built in code with the chained `with_*` setters or loaded from a JSON
//! document; missing fields fall back to their defaults.

use crate::{Result, SoundstageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default effect-progress polling interval in milliseconds
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 80;

/// Default random pitch range in cents (offsets drawn from `[-20, +20]`)
pub const DEFAULT_PITCH_RANGE_CENTS: f32 = 20.0;

/// Largest accepted random pitch range in cents (one octave)
pub const MAX_PITCH_RANGE_CENTS: f32 = 1200.0;

/// Default number of background resolve/decode workers
pub const DEFAULT_DECODE_THREADS: usize = 2;

/// File extensions the privileged local read accepts by default
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 12] = [
    ".mp3", ".wav", ".ogg", ".m4a", ".aac", ".flac", ".webm", ".png", ".jpg", ".jpeg", ".gif",
    ".webp",
];

/// Playback engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Effect-progress polling interval in milliseconds
    pub progress_interval_ms: u64,
    /// Random pitch offsets are drawn uniformly from `[-range, +range]` cents
    pub pitch_range_cents: f32,
    /// Number of background resolve/decode workers
    pub decode_threads: usize,
    /// Extensions (with leading dot, case-insensitive) readable from the local filesystem
    pub allowed_extensions: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            pitch_range_cents: DEFAULT_PITCH_RANGE_CENTS,
            decode_threads: DEFAULT_DECODE_THREADS,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl PlaybackConfig {
    /// Parse a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SoundstageError::ConfigError(format!("Malformed configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SoundstageError::ConfigError(format!("Failed to read '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Check that every field is usable
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_ms == 0 {
            return Err(SoundstageError::ConfigError(
                "progress_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=MAX_PITCH_RANGE_CENTS).contains(&self.pitch_range_cents) {
            return Err(SoundstageError::ConfigError(format!(
                "pitch_range_cents must be between 0 and {MAX_PITCH_RANGE_CENTS}, got {}",
                self.pitch_range_cents
            )));
        }
        if self.decode_threads == 0 {
            return Err(SoundstageError::ConfigError(
                "decode_threads must be at least 1".to_string(),
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(SoundstageError::ConfigError(
                "allowed_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Polling interval as a [`Duration`]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Set the effect-progress polling interval
    pub fn with_progress_interval_ms(mut self, millis: u64) -> Self {
        self.progress_interval_ms = millis;
        self
    }

    /// Set the random pitch range in cents
    pub fn with_pitch_range_cents(mut self, cents: f32) -> Self {
        self.pitch_range_cents = cents;
        self
    }

    /// Set the number of decode workers
    pub fn with_decode_threads(mut self, threads: usize) -> Self {
        self.decode_threads = threads;
        self
    }

    /// Replace the extension allow-list
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlaybackConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.progress_interval(), Duration::from_millis(80));
        assert!(config.allowed_extensions.iter().any(|e| e == ".flac"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlaybackConfig::from_json_str(r#"{ "pitch_range_cents": 35.0 }"#)
            .expect("partial config should parse");
        assert_eq!(config.pitch_range_cents, 35.0);
        assert_eq!(config.progress_interval_ms, DEFAULT_PROGRESS_INTERVAL_MS);
        assert_eq!(config.decode_threads, DEFAULT_DECODE_THREADS);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = PlaybackConfig::default()
            .with_progress_interval_ms(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SoundstageError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_negative_pitch_range() {
        let config = PlaybackConfig::default().with_pitch_range_cents(-1.0);
        assert!(config.validate().is_err());
        let config = PlaybackConfig::default().with_pitch_range_cents(f32::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pitch_range_is_bounded() {
        let config = PlaybackConfig::default().with_pitch_range_cents(MAX_PITCH_RANGE_CENTS);
        assert!(config.validate().is_ok());

        let err = PlaybackConfig::default()
            .with_pitch_range_cents(100_000.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SoundstageError::ConfigError(_)));
        assert!(PlaybackConfig::default()
            .with_pitch_range_cents(f32::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = PlaybackConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SoundstageError::ConfigError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soundstage.json");
        std::fs::write(&path, r#"{ "decode_threads": 4, "allowed_extensions": [".wav"] }"#)
            .unwrap();

        let config = PlaybackConfig::load(&path).unwrap();
        assert_eq!(config.decode_threads, 4);
        assert_eq!(config.allowed_extensions, vec![".wav".to_string()]);
    }

    #[test]
    fn test_empty_allow_list_is_rejected() {
        let config = PlaybackConfig::default().with_allowed_extensions(Vec::<String>::new());
        assert!(config.validate().is_err());
    }
}
