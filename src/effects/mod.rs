//! Effect voice pool
//!
//! A keyed, unbounded set of concurrently playing one-shot voices. Each key
//! maps to at most one live voice: playing under a key that is already live
//! stops and evicts the old voice first. Distinct keys never affect each other.
//!
//! Decoding happens between [`EffectPool::reserve`] and [`EffectPool::commit`].
//! Every reservation draws a new generation number; a commit only lands if its
//! generation is still the latest one pending for the key, so a decode that
//! finishes after its key was stopped or superseded never produces sound.

pub mod pitch;
mod ticker;

use crate::config::PlaybackConfig;
use crate::decode::Clip;
use crate::output::{AudioOutput, EndCallback, PlaybackHandle};
use crate::{Result, SoundstageError};
use log::debug;
use parking_lot::Mutex;
use pitch::{cents_to_speed, PitchRange};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Proof of a reservation, consumed by [`EffectPool::commit`] or [`EffectPool::abandon`]
#[derive(Debug)]
#[must_use]
pub struct EffectTicket {
    key: String,
    generation: u64,
}

impl EffectTicket {
    /// Key this ticket reserves
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Snapshot of one live voice
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    /// Identity key
    pub key: String,
    /// Real playback length, after pitch adjustment
    pub duration: Duration,
    /// Applied pitch offset in cents (0 when randomization is off)
    pub pitch_offset_cents: f32,
    /// Elapsed fraction in `[0, 1]`
    pub progress: f32,
}

struct Voice {
    generation: u64,
    started_at: Instant,
    duration: Duration,
    pitch_offset_cents: f32,
    handle: Box<dyn PlaybackHandle>,
}

impl Voice {
    fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0) as f32
    }

    fn release(mut self) {
        self.handle.stop();
    }
}

#[derive(Default)]
struct PoolState {
    voices: HashMap<String, Voice>,
    /// Latest reserved generation per key whose decode has not landed yet
    pending: HashMap<String, u64>,
    next_generation: u64,
    /// Last polled progress, per live key
    progress: HashMap<String, f32>,
    ticker_running: bool,
}

pub(crate) struct PoolShared {
    output: Arc<dyn AudioOutput>,
    pitch: PitchRange,
    interval: Duration,
    state: Mutex<PoolState>,
}

impl PoolShared {
    /// Natural end of a voice. Ignored unless the voice is still the live one for its key.
    fn retire(&self, key: &str, generation: u64) {
        let mut state = self.state.lock();
        if state.voices.get(key).map(|v| v.generation) != Some(generation) {
            return;
        }
        if let Some(voice) = state.voices.remove(key) {
            voice.release();
        }
        state.progress.remove(key);
        debug!("Effect '{key}' finished");
    }

    /// One polling tick. Returns `false` once the pool is empty and polling should stop.
    fn refresh_progress(&self) -> bool {
        let mut state = self.state.lock();
        if state.voices.is_empty() {
            state.ticker_running = false;
            state.progress.clear();
            return false;
        }
        let now = Instant::now();
        let progress = state
            .voices
            .iter()
            .map(|(key, voice)| (key.clone(), voice.progress(now)))
            .collect();
        state.progress = progress;
        true
    }
}

fn retire_callback(shared: Weak<PoolShared>, key: String, generation: u64) -> EndCallback {
    Box::new(move || {
        if let Some(shared) = shared.upgrade() {
            shared.retire(&key, generation);
        }
    })
}

/// Keyed pool of one-shot effect voices
pub struct EffectPool {
    shared: Arc<PoolShared>,
}

impl EffectPool {
    /// Create an empty pool playing through `output`
    pub fn new(output: Arc<dyn AudioOutput>, config: &PlaybackConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                output,
                pitch: PitchRange::new(config.pitch_range_cents),
                interval: config.progress_interval(),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Decode and play synchronously under `key`, replacing any live voice there.
    pub fn play(
        &self,
        bytes: Arc<[u8]>,
        hint: Option<&str>,
        random_pitch: bool,
        key: &str,
    ) -> Result<()> {
        let ticket = self.reserve(key);
        match Clip::decode(bytes, hint) {
            Ok(clip) => self.commit(ticket, clip, random_pitch).map(|_| ()),
            Err(err) => {
                self.abandon(ticket);
                Err(err)
            }
        }
    }

    /// Evict whatever plays under `key` and reserve it for a new voice.
    /// Supersedes any earlier reservation still decoding.
    pub fn reserve(&self, key: &str) -> EffectTicket {
        let mut state = self.shared.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;

        if let Some(previous) = state.voices.remove(key) {
            previous.release();
            debug!("Effect '{key}' replaced");
        }
        state.progress.remove(key);
        state.pending.insert(key.to_string(), generation);

        EffectTicket {
            key: key.to_string(),
            generation,
        }
    }

    /// Start the decoded clip if the reservation is still current.
    ///
    /// Returns `Ok(false)` when the reservation went stale (stopped or
    /// superseded); the clip is dropped without playing.
    pub fn commit(&self, ticket: EffectTicket, clip: Clip, random_pitch: bool) -> Result<bool> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.pending.get(&ticket.key) != Some(&ticket.generation) {
            debug!("Discarding stale decode for effect '{}'", ticket.key);
            return Ok(false);
        }
        state.pending.remove(&ticket.key);

        let pitch_offset_cents = if random_pitch {
            shared.pitch.sample(&mut rand::rng())
        } else {
            0.0
        };
        let speed = cents_to_speed(pitch_offset_cents);
        let duration = Duration::try_from_secs_f64(clip.duration().as_secs_f64() / f64::from(speed))
            .map_err(|e| {
                SoundstageError::Decode(format!("Voice length out of range at speed {speed}: {e}"))
            })?;

        let on_end = retire_callback(Arc::downgrade(shared), ticket.key.clone(), ticket.generation);
        let handle = shared.output.start_voice(Arc::new(clip), speed, on_end)?;

        let voice = Voice {
            generation: ticket.generation,
            started_at: Instant::now(),
            duration,
            pitch_offset_cents,
            handle,
        };
        if let Some(previous) = state.voices.insert(ticket.key.clone(), voice) {
            previous.release();
        }
        state.progress.insert(ticket.key.clone(), 0.0);

        if !state.ticker_running {
            state.ticker_running = ticker::spawn(Arc::downgrade(shared), shared.interval);
        }

        debug!(
            "Effect '{}' started ({:.2}s, {:+.1} cents)",
            ticket.key,
            duration.as_secs_f32(),
            pitch_offset_cents
        );
        Ok(true)
    }

    /// Drop a reservation whose decode failed. The key stays empty.
    pub fn abandon(&self, ticket: EffectTicket) {
        let mut state = self.shared.state.lock();
        if state.pending.get(&ticket.key) == Some(&ticket.generation) {
            state.pending.remove(&ticket.key);
        }
    }

    /// Stop and evict the voice under `key`, cancelling any decode in flight for it.
    /// Does nothing if the key is unknown.
    pub fn stop(&self, key: &str) {
        let mut state = self.shared.state.lock();
        state.pending.remove(key);
        state.progress.remove(key);
        if let Some(voice) = state.voices.remove(key) {
            voice.release();
            debug!("Effect '{key}' stopped");
        }
    }

    /// Stop every voice and cancel every decode in flight
    pub fn stop_all(&self) {
        let mut state = self.shared.state.lock();
        state.pending.clear();
        state.progress.clear();
        for (_, voice) in state.voices.drain() {
            voice.release();
        }
    }

    /// Last polled progress per live key, each in `[0, 1]`
    pub fn progress(&self) -> HashMap<String, f32> {
        self.shared.state.lock().progress.clone()
    }

    /// Snapshot of the voice under `key`, with progress computed now
    pub fn voice(&self, key: &str) -> Option<VoiceInfo> {
        let state = self.shared.state.lock();
        state.voices.get(key).map(|voice| VoiceInfo {
            key: key.to_string(),
            duration: voice.duration,
            pitch_offset_cents: voice.pitch_offset_cents,
            progress: voice.progress(Instant::now()),
        })
    }

    /// Keys with a live voice
    pub fn keys(&self) -> Vec<String> {
        self.shared.state.lock().voices.keys().cloned().collect()
    }

    /// Whether a decode is in flight for `key`
    pub fn is_pending(&self, key: &str) -> bool {
        self.shared.state.lock().pending.contains_key(key)
    }

    /// Whether the progress poller is running
    pub fn is_polling(&self) -> bool {
        self.shared.state.lock().ticker_running
    }

    /// Number of live voices
    pub fn len(&self) -> usize {
        self.shared.state.lock().voices.len()
    }

    /// Whether no voice is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for EffectPool {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::wav_bytes;
    use crate::output::HeadlessOutput;
    use std::thread;

    fn pool_with(output: &HeadlessOutput, config: PlaybackConfig) -> EffectPool {
        EffectPool::new(Arc::new(output.clone()), &config)
    }

    fn pool(output: &HeadlessOutput) -> EffectPool {
        pool_with(output, PlaybackConfig::default())
    }

    fn clip(frames: usize) -> Clip {
        Clip::decode(wav_bytes(8_000, 1, frames), Some("wav")).unwrap()
    }

    #[test]
    fn test_play_registers_voice() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        pool.play(wav_bytes(8_000, 1, 8_000), Some("wav"), false, "bell")
            .unwrap();

        assert_eq!(pool.keys(), vec!["bell".to_string()]);
        let voice = pool.voice("bell").unwrap();
        assert_eq!(voice.pitch_offset_cents, 0.0);
        assert_eq!(voice.duration, Duration::from_secs(1));
        assert_eq!(output.voice_speeds(), vec![1.0]);
        assert!(pool.progress().contains_key("bell"));
    }

    #[test]
    fn test_same_key_replaces() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        pool.play(wav_bytes(8_000, 1, 800), None, false, "door").unwrap();
        pool.play(wav_bytes(8_000, 1, 800), None, false, "door").unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(output.voices_started(), 2);
        assert_eq!(output.releases(), 1);
        assert_eq!(output.live_voices(), 1);
    }

    #[test]
    fn test_superseded_voice_end_is_ignored() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        pool.play(wav_bytes(8_000, 1, 800), None, false, "door").unwrap();
        pool.play(wav_bytes(8_000, 1, 800), None, false, "door").unwrap();

        // The first voice was stopped; it can no longer complete.
        assert!(!output.complete_voice(0));
        assert_eq!(pool.keys(), vec!["door".to_string()]);

        // The live one retires normally.
        assert!(output.complete_voice(1));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_stale_end_callback_cannot_evict_successor() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        let first = pool.reserve("door");
        assert!(pool.commit(first, clip(800), false).unwrap());
        let stale_generation = pool.shared.state.lock().voices["door"].generation;

        let second = pool.reserve("door");
        assert!(pool.commit(second, clip(800), false).unwrap());

        // Even if an old end notification arrives late, the new voice survives.
        pool.shared.retire("door", stale_generation);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        pool.play(wav_bytes(8_000, 1, 800), None, false, "rain").unwrap();
        pool.play(wav_bytes(8_000, 1, 800), None, false, "thunder")
            .unwrap();
        assert_eq!(pool.len(), 2);

        pool.stop("rain");
        assert!(pool.voice("rain").is_none());
        assert!(pool.voice("thunder").is_some());
        assert_eq!(output.releases(), 1);
    }

    #[test]
    fn test_stop_unknown_key_is_noop() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);
        pool.stop("nothing");
        pool.stop("nothing");
        assert_eq!(output.releases(), 0);
    }

    #[test]
    fn test_decode_failure_registers_nothing() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);
        pool.play(wav_bytes(8_000, 1, 800), None, false, "keep").unwrap();

        let garbage: Arc<[u8]> = Arc::from(vec![7u8; 64]);
        let err = pool.play(garbage, Some("wav"), false, "broken").unwrap_err();

        assert!(matches!(err, SoundstageError::Decode(_)));
        assert!(pool.voice("broken").is_none());
        assert!(!pool.is_pending("broken"));
        assert!(pool.voice("keep").is_some());
        assert_eq!(output.voices_started(), 1);
    }

    #[test]
    fn test_commit_after_stop_is_discarded() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        let ticket = pool.reserve("late");
        pool.stop("late");
        assert!(!pool.commit(ticket, clip(800), false).unwrap());
        assert!(pool.is_empty());
        assert_eq!(output.voices_started(), 0);
    }

    #[test]
    fn test_older_reservation_loses_to_newer() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        let older = pool.reserve("hit");
        let newer = pool.reserve("hit");

        // Completion order is reversed: newer lands first, older arrives stale.
        assert!(pool.commit(newer, clip(800), false).unwrap());
        assert!(!pool.commit(older, clip(1_600), false).unwrap());

        assert_eq!(output.voices_started(), 1);
        assert_eq!(pool.voice("hit").unwrap().duration, Duration::from_millis(100));
    }

    #[test]
    fn test_stop_all_cancels_pending_and_live() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        pool.play(wav_bytes(8_000, 1, 800), None, false, "a").unwrap();
        pool.play(wav_bytes(8_000, 1, 800), None, false, "b").unwrap();
        let pending = pool.reserve("c");

        pool.stop_all();
        assert!(pool.is_empty());
        assert!(pool.progress().is_empty());
        assert!(!pool.commit(pending, clip(800), false).unwrap());
        assert_eq!(output.releases(), 2);

        // Nothing live: a second stop_all is harmless.
        pool.stop_all();
        assert_eq!(output.releases(), 2);
    }

    #[test]
    fn test_random_pitch_is_bounded_and_rerolled() {
        let output = HeadlessOutput::new();
        let pool = pool(&output);

        let mut offsets = Vec::new();
        for _ in 0..50 {
            let ticket = pool.reserve("whoosh");
            pool.commit(ticket, clip(80), true).unwrap();
            offsets.push(pool.voice("whoosh").unwrap().pitch_offset_cents);
        }

        assert!(offsets.iter().all(|c| (-20.0..=20.0).contains(c)));
        assert!(offsets.windows(2).any(|pair| pair[0] != pair[1]));
        for (speed, cents) in output.voice_speeds().iter().zip(&offsets) {
            approx::assert_relative_eq!(*speed, cents_to_speed(*cents));
        }
    }

    #[test]
    fn test_oversized_pitch_range_stays_bounded() {
        let output = HeadlessOutput::new();
        let pool = pool_with(&output, PlaybackConfig::default().with_pitch_range_cents(100_000.0));

        for _ in 0..50 {
            pool.play(wav_bytes(8_000, 1, 800), None, true, "k").unwrap();
            let voice = pool.voice("k").unwrap();
            assert!(voice.pitch_offset_cents.abs() <= 1200.0);
            assert!(voice.duration <= Duration::from_millis(201));
        }
    }

    #[test]
    fn test_progress_polling_runs_only_while_live() {
        let output = HeadlessOutput::new();
        let pool = pool_with(&output, PlaybackConfig::default().with_progress_interval_ms(5));
        assert!(!pool.is_polling());

        pool.play(wav_bytes(8_000, 1, 16_000), None, false, "long")
            .unwrap();
        assert!(pool.is_polling());

        thread::sleep(Duration::from_millis(40));
        let first = pool.progress()["long"];
        thread::sleep(Duration::from_millis(40));
        let second = pool.progress()["long"];
        assert!(first > 0.0);
        assert!(second >= first);
        assert!(second <= 1.0);

        pool.stop("long");
        thread::sleep(Duration::from_millis(40));
        assert!(!pool.is_polling());
        assert!(pool.progress().is_empty());
    }
}
