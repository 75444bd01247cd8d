//! Playback coordinator
//!
//! The only surface a host talks to. Owns the asset resolver, the music
//! channel and the effect pool, and runs resolve + decode work on a small
//! background pool. Claims (music begin, effect reserve) are taken
//! synchronously on the caller's thread so call order decides which request
//! wins; the background task then commits through the owning component's
//! generation check.
//!
//! No operation here returns an error: resolution, retrieval, decode and
//! device failures are logged and dropped.

use crate::catalog::{AudioCategory, AudioId, Catalog, SceneId};
use crate::config::PlaybackConfig;
use crate::decode::{panic_message, Clip, MusicStream};
use crate::effects::EffectPool;
use crate::music::{MusicChannel, MusicProgress};
use crate::output::AudioOutput;
use crate::resolver::AssetResolver;
use crate::{Result, SoundstageError};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Background dispatcher
// ============================================================================

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the in-flight count when a task finishes.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

struct Dispatcher {
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlight>,
}

impl Dispatcher {
    fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("soundstage-decode-{i}"))
            .build()
            .map_err(|e| SoundstageError::ConfigError(format!("Failed to create decode pool: {e}")))?;
        Ok(Self {
            pool,
            in_flight: Arc::new(InFlight::default()),
        })
    }

    fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.in_flight.count.lock() += 1;
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        self.pool.spawn(move || {
            let _guard = guard;
            // An escaping panic would abort the process from inside rayon.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                warn!("Background task panicked: {}", panic_message(payload.as_ref()));
            }
        });
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            if self.in_flight.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

fn report(operation: &str, target: &str, err: &SoundstageError) {
    warn!("{operation} '{target}' failed ({:?}): {err}", err.class());
}

// ============================================================================
// Coordinator
// ============================================================================

/// Scene activation and playback surface
pub struct Coordinator {
    catalog: Arc<dyn Catalog>,
    resolver: Arc<AssetResolver>,
    music: Arc<MusicChannel>,
    effects: Arc<EffectPool>,
    active_scene: Mutex<Option<SceneId>>,
    dispatcher: Dispatcher,
    one_shots: AtomicU64,
}

impl Coordinator {
    /// Build a coordinator. Fails only on invalid configuration.
    pub fn new(
        config: PlaybackConfig,
        catalog: Arc<dyn Catalog>,
        output: Arc<dyn AudioOutput>,
    ) -> Result<Self> {
        Self::with_resolver(config.clone(), catalog, output, AssetResolver::new(&config))
    }

    /// Build a coordinator with a custom resolver (e.g. one with its own [`crate::Fetch`])
    pub fn with_resolver(
        config: PlaybackConfig,
        catalog: Arc<dyn Catalog>,
        output: Arc<dyn AudioOutput>,
        resolver: AssetResolver,
    ) -> Result<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(config.decode_threads)?;

        Ok(Self {
            catalog,
            resolver: Arc::new(resolver),
            music: Arc::new(MusicChannel::new(Arc::clone(&output))),
            effects: Arc::new(EffectPool::new(output, &config)),
            active_scene: Mutex::new(None),
            dispatcher,
            one_shots: AtomicU64::new(0),
        })
    }

    /// Make `scene` the active scene and start its default track, if any.
    ///
    /// The pointer is updated regardless of whether the track starts.
    pub fn activate_scene(&self, scene: SceneId) {
        *self.active_scene.lock() = Some(scene);
        info!("Scene {scene} activated");

        match self.catalog.scene_default_music_path(scene) {
            Ok(Some(path)) => self.play_music(&path, &path),
            Ok(None) => debug!("Scene {scene} has no default track"),
            Err(err) => report("Default track lookup for scene", &scene.to_string(), &err),
        }
    }

    /// Clear the active scene pointer. Playback is untouched.
    pub fn deactivate_scene(&self) {
        *self.active_scene.lock() = None;
    }

    /// Currently active scene
    pub fn active_scene(&self) -> Option<SceneId> {
        *self.active_scene.lock()
    }

    /// Replace the music with `path`, reported under `key`.
    pub fn play_music(&self, path: &str, key: &str) {
        let ticket = self.music.begin(key);
        let resolver = Arc::clone(&self.resolver);
        let music = Arc::clone(&self.music);
        let path = path.to_string();

        self.dispatcher.spawn(move || {
            let opened = resolver
                .resolve(&path)
                .and_then(|asset| MusicStream::open(asset.bytes, asset.extension.as_deref()));
            match opened {
                Ok(stream) => {
                    if let Err(err) = music.commit(ticket, stream) {
                        report("Music", &path, &err);
                    }
                }
                Err(err) => {
                    music.abandon(ticket);
                    report("Music", &path, &err);
                }
            }
        });
    }

    /// Stop the music
    pub fn stop_music(&self) {
        self.music.stop();
    }

    /// Play `path` as a one-shot effect under `key`, replacing whatever plays there.
    pub fn play_effect(&self, path: &str, random_pitch: bool, key: &str) {
        let ticket = self.effects.reserve(key);
        let resolver = Arc::clone(&self.resolver);
        let effects = Arc::clone(&self.effects);
        let path = path.to_string();

        self.dispatcher.spawn(move || {
            let decoded = resolver
                .resolve(&path)
                .and_then(|asset| Clip::decode(asset.bytes, asset.extension.as_deref()));
            match decoded {
                Ok(clip) => {
                    if let Err(err) = effects.commit(ticket, clip, random_pitch) {
                        report("Effect", &path, &err);
                    }
                }
                Err(err) => {
                    effects.abandon(ticket);
                    report("Effect", &path, &err);
                }
            }
        });
    }

    /// Play an effect under a fresh key and return that key.
    pub fn play_one_shot(&self, path: &str, random_pitch: bool) -> String {
        let key = format!("sfx-{}", self.one_shots.fetch_add(1, Ordering::Relaxed));
        self.play_effect(path, random_pitch, &key);
        key
    }

    /// Play a catalog entry according to its category
    pub fn play_audio_file(&self, id: AudioId) {
        match self.catalog.audio_file(id) {
            Ok(Some(meta)) => match meta.category {
                AudioCategory::Music => self.play_music(&meta.path, &meta.path),
                AudioCategory::Effect => {
                    self.play_effect(&meta.path, meta.random_pitch, &format!("audio-{id}"))
                }
            },
            Ok(None) => warn!("Audio file {id} not in catalog"),
            Err(err) => report("Catalog lookup for audio file", &id.to_string(), &err),
        }
    }

    /// Stop the effect under `key`, if any
    pub fn stop_effect(&self, key: &str) {
        self.effects.stop(key);
    }

    /// Stop the music and every effect, cancelling decodes in flight
    pub fn stop_all(&self) {
        self.music.stop();
        self.effects.stop_all();
        info!("All playback stopped");
    }

    /// Music position and length in seconds
    pub fn music_progress(&self) -> MusicProgress {
        self.music.progress()
    }

    /// Key of the current music track
    pub fn music_key(&self) -> Option<String> {
        self.music.active_key()
    }

    /// Progress fraction of every live effect
    pub fn effect_progress(&self) -> HashMap<String, f32> {
        self.effects.progress()
    }

    /// The music channel, for inspection
    pub fn music(&self) -> &MusicChannel {
        &self.music
    }

    /// The effect pool, for inspection
    pub fn effects(&self) -> &EffectPool {
        &self.effects
    }

    /// Block until no resolve/decode task is in flight. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle(timeout)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.music.stop();
        self.effects.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::output::HeadlessOutput;

    fn coordinator(output: &HeadlessOutput) -> Coordinator {
        Coordinator::new(
            PlaybackConfig::default(),
            Arc::new(MemoryCatalog::new()),
            Arc::new(output.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = Coordinator::new(
            PlaybackConfig::default().with_decode_threads(0),
            Arc::new(MemoryCatalog::new()),
            Arc::new(HeadlessOutput::new()),
        );
        assert!(matches!(result, Err(SoundstageError::ConfigError(_))));
    }

    #[test]
    fn test_wait_idle_with_nothing_in_flight() {
        let stage = coordinator(&HeadlessOutput::new());
        assert!(stage.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_dispatcher_tracks_in_flight_tasks() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        dispatcher.spawn(move || {
            let _ = release_rx.recv();
        });

        assert!(!dispatcher.wait_idle(Duration::from_millis(20)));
        release_tx.send(()).unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_dispatcher_survives_panicking_task() {
        let dispatcher = Dispatcher::new(1).unwrap();
        dispatcher.spawn(|| panic!("decoder blew up"));
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        dispatcher.spawn(move || {
            let _ = done_tx.send(());
        });
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert!(done_rx.try_recv().is_ok());
    }

    #[test]
    fn test_one_shot_keys_are_unique() {
        let stage = coordinator(&HeadlessOutput::new());
        let first = stage.play_one_shot("missing.wav", false);
        let second = stage.play_one_shot("missing.wav", false);
        assert_ne!(first, second);
        assert!(first.starts_with("sfx-"));
        assert!(stage.wait_idle(Duration::from_secs(5)));
        assert!(stage.effect_progress().is_empty());
    }

    #[test]
    fn test_scene_pointer_is_independent_of_music() {
        let output = HeadlessOutput::new();
        let stage = coordinator(&output);

        stage.activate_scene(3);
        assert_eq!(stage.active_scene(), Some(3));
        assert_eq!(stage.music_key(), None);

        stage.deactivate_scene();
        assert_eq!(stage.active_scene(), None);
        assert_eq!(output.music_started(), 0);
    }
}
