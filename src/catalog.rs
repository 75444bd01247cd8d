//! Catalog collaborator
//!
//! The playback core only ever asks two questions of the library: which track
//! a scene starts with, and what is known about a given audio file.
//! [`MemoryCatalog`] answers them from a JSON document; hosts with a real
//! database implement [`Catalog`] themselves.

use crate::{Result, SoundstageError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scene identifier
pub type SceneId = i64;

/// Audio file identifier
pub type AudioId = i64;

/// What an audio file is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCategory {
    /// Looping background track
    Music,
    /// One-shot sound effect
    Effect,
}

/// Library metadata for one audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFileMeta {
    /// Identifier
    pub id: AudioId,
    /// Library path (plain path or asset URL)
    pub path: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Music or effect
    pub category: AudioCategory,
    /// Randomize pitch on every play
    #[serde(default)]
    pub random_pitch: bool,
    /// Pinned to the quick-select panel
    #[serde(default)]
    pub quick_select: bool,
}

/// Catalog queries consumed by the coordinator
pub trait Catalog: Send + Sync {
    /// Path of the scene's default music track, if it has one
    fn scene_default_music_path(&self, scene: SceneId) -> Result<Option<String>>;

    /// Metadata for an audio file, if it exists
    fn audio_file(&self, id: AudioId) -> Result<Option<AudioFileMeta>>;
}

/// Track assignment within a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMusicEntry {
    /// Assigned track
    pub audio_file_id: AudioId,
    /// Played on scene activation
    #[serde(default)]
    pub is_default: bool,
    /// Position in the scene's track list
    #[serde(default)]
    pub sort_order: i64,
}

/// A scene with its music and effect assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    /// Identifier
    pub id: SceneId,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Assigned music tracks
    #[serde(default)]
    pub music: Vec<SceneMusicEntry>,
    /// Assigned effects
    #[serde(default)]
    pub effects: Vec<AudioId>,
}

impl SceneRecord {
    /// Empty scene
    pub fn new(id: SceneId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            music: Vec::new(),
            effects: Vec::new(),
        }
    }

    /// First default entry in sort order
    fn default_music(&self) -> Option<&SceneMusicEntry> {
        self.music
            .iter()
            .filter(|entry| entry.is_default)
            .min_by_key(|entry| entry.sort_order)
    }
}

/// In-memory catalog, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryCatalog {
    #[serde(default)]
    audio_files: Vec<AudioFileMeta>,
    #[serde(default)]
    scenes: Vec<SceneRecord>,
}

impl MemoryCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog document
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SoundstageError::Catalog(format!("Invalid catalog JSON: {e}")))
    }

    /// Load a catalog document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Add or replace an audio file
    pub fn insert_audio_file(&mut self, meta: AudioFileMeta) {
        self.audio_files.retain(|existing| existing.id != meta.id);
        self.audio_files.push(meta);
    }

    /// Add or replace a scene
    pub fn insert_scene(&mut self, scene: SceneRecord) {
        self.scenes.retain(|existing| existing.id != scene.id);
        self.scenes.push(scene);
    }

    /// Assign a music track to a scene. A new default demotes the previous one.
    pub fn add_scene_music(
        &mut self,
        scene: SceneId,
        audio_file: AudioId,
        is_default: bool,
    ) -> Result<()> {
        if !self.audio_files.iter().any(|meta| meta.id == audio_file) {
            return Err(SoundstageError::Catalog(format!(
                "Unknown audio file {audio_file}"
            )));
        }
        let record = self
            .scenes
            .iter_mut()
            .find(|record| record.id == scene)
            .ok_or_else(|| SoundstageError::Catalog(format!("Unknown scene {scene}")))?;

        if is_default {
            for entry in &mut record.music {
                entry.is_default = false;
            }
        }
        let sort_order = record.music.len() as i64;
        record.music.push(SceneMusicEntry {
            audio_file_id: audio_file,
            is_default,
            sort_order,
        });
        Ok(())
    }

    /// Look up a scene
    pub fn scene(&self, id: SceneId) -> Option<&SceneRecord> {
        self.scenes.iter().find(|record| record.id == id)
    }

    fn meta(&self, id: AudioId) -> Option<&AudioFileMeta> {
        self.audio_files.iter().find(|meta| meta.id == id)
    }
}

impl Catalog for MemoryCatalog {
    fn scene_default_music_path(&self, scene: SceneId) -> Result<Option<String>> {
        let Some(entry) = self.scene(scene).and_then(SceneRecord::default_music) else {
            return Ok(None);
        };
        self.meta(entry.audio_file_id)
            .map(|meta| Some(meta.path.clone()))
            .ok_or_else(|| {
                SoundstageError::Catalog(format!(
                    "Scene {scene} references missing audio file {}",
                    entry.audio_file_id
                ))
            })
    }

    fn audio_file(&self, id: AudioId) -> Result<Option<AudioFileMeta>> {
        Ok(self.meta(id).cloned())
    }
}
