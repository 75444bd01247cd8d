//! Soundstage: scene-driven soundboard playback engine
//!
//! A single exclusive looping music channel plus a polyphonic pool of one-shot
//! sound-effect voices, fed by an asset resolver that turns library paths into
//! playable byte streams. Everything is owned by one [`Coordinator`] instance
//! which is the only surface a host application talks to.
//!
//! # Features
//! - Music channel with replace semantics, endless looping and live position/duration
//! - Keyed effect voices: replace-per-key, true polyphony across keys, auto-retire on end
//! - Optional per-play random pitch perturbation (bounded, re-rolled every play)
//! - Instant global stop, cancelling in-flight decodes through generation guards
//! - Privileged local reads gated by an extension allow-list, or URL fetches
//!
//! # Crate feature flags
//! - `streaming` (opt-in): Real-time audio output via rodio ([`RodioOutput`])
//! - `http` (default): `http(s)://` asset retrieval via reqwest (`HttpFetcher`)
//!
//! Without `streaming` the engine runs against [`HeadlessOutput`], which accepts
//! every playback request but produces no sound.
//!
//! # Quick start
//! ```no_run
//! use std::sync::Arc;
//! use soundstage::{Coordinator, HeadlessOutput, MemoryCatalog, PlaybackConfig};
//!
//! let catalog = MemoryCatalog::load("catalog.json").unwrap();
//! let output = HeadlessOutput::new();
//! let stage = Coordinator::new(PlaybackConfig::default(), Arc::new(catalog), Arc::new(output)).unwrap();
//!
//! stage.activate_scene(42);
//! stage.play_effect("sfx/door.wav", true, "door");
//! let progress = stage.music_progress();
//! println!("{:.1}/{:.1}s", progress.current, progress.duration);
//! stage.stop_all();
//! ```

#![warn(missing_docs)]

pub mod catalog; // Catalog collaborator seam
pub mod config; // Engine configuration
pub mod coordinator; // Public playback surface
pub mod decode; // symphonia decoding
pub mod effects; // Effect voice pool
pub mod music; // Music channel
pub mod output; // Output device seam
pub mod resolver; // Asset resolution

/// Error types for soundstage operations
#[derive(thiserror::Error, Debug)]
pub enum SoundstageError {
    /// Asset path rejected by the extension allow-list
    #[error("Asset not allowed: {0}")]
    NotAllowed(String),

    /// Asset missing or unreadable
    #[error("Asset not found: {path}")]
    NotFound {
        /// Path that failed to read
        path: String,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// Malformed asset location (bad URL, missing `path` parameter)
    #[error("Invalid asset location: {0}")]
    InvalidLocation(String),

    /// Remote retrieval failed
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// Malformed or unsupported audio data
    #[error("Decode error: {0}")]
    Decode(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Catalog lookup failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of failures, as seen by the coordinator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Path disallowed, malformed or unreadable
    Resolution,
    /// Data could not be decoded
    Decode,
    /// Remote fetch failed; retrying later may succeed
    TransientRetrieval,
    /// Device, catalog, configuration or other environmental failure
    Environment,
}

impl SoundstageError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotAllowed(_) | Self::NotFound { .. } | Self::InvalidLocation(_) => {
                ErrorClass::Resolution
            }
            Self::Decode(_) => ErrorClass::Decode,
            Self::Retrieval(_) => ErrorClass::TransientRetrieval,
            Self::AudioDeviceError(_) | Self::Catalog(_) | Self::ConfigError(_) | Self::Io(_) => {
                ErrorClass::Environment
            }
        }
    }
}

/// Result type for soundstage operations
pub type Result<T> = std::result::Result<T, SoundstageError>;

// Public API exports
pub use catalog::{
    AudioCategory, AudioFileMeta, AudioId, Catalog, MemoryCatalog, SceneId, SceneMusicEntry,
    SceneRecord,
};
pub use config::PlaybackConfig;
pub use coordinator::Coordinator;
pub use decode::{Clip, MusicStream, Playhead};
pub use effects::{EffectPool, EffectTicket, VoiceInfo};
pub use music::{MusicChannel, MusicProgress, MusicTicket};
#[cfg(feature = "streaming")]
pub use output::RodioOutput;
pub use output::{AudioOutput, EndCallback, HeadlessOutput, PlaybackHandle};
#[cfg(feature = "http")]
pub use resolver::HttpFetcher;
pub use resolver::{
    asset_url, mime_type, AssetLocation, AssetResolver, Fetch, FileFetcher, ResolvedAsset,
    UrlFetcher,
};
