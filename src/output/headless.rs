//! Device-free output
//!
//! Accepts every request and plays nothing. Music is advanced only when the
//! host pulls samples with [`HeadlessOutput::render_music`], and voices end
//! only when [`HeadlessOutput::complete_voice`] is called. Every release is
//! counted so callers can verify resource accounting.
//!
//! Stopping a handle frees what it held: a music stream (and its shared bytes)
//! is dropped, and a voice's end callback is discarded. Voices keep only their
//! length and speed so they stay addressable by start index.

use super::{AudioOutput, EndCallback, PlaybackHandle};
use crate::decode::{Clip, MusicStream};
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Output that produces no sound
#[derive(Clone, Default)]
pub struct HeadlessOutput {
    state: Arc<Mutex<HeadlessState>>,
}

#[derive(Default)]
struct HeadlessState {
    music: Vec<MusicSlot>,
    music_started: usize,
    voices: Vec<VoiceSlot>,
    releases: usize,
}

struct MusicSlot {
    stream: MusicStream,
    stopped: Arc<AtomicBool>,
}

struct VoiceSlot {
    duration: Duration,
    speed: f32,
    on_end: Option<EndCallback>,
    stopped: Arc<AtomicBool>,
}

enum Slot {
    Music,
    Voice(usize),
}

struct HeadlessHandle {
    slot: Slot,
    stopped: Arc<AtomicBool>,
    state: Arc<Mutex<HeadlessState>>,
}

impl PlaybackHandle for HeadlessHandle {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        let mut state = self.state.lock();
        state.releases += 1;
        match self.slot {
            Slot::Music => state.music.retain(|m| !m.stopped.load(Ordering::Acquire)),
            Slot::Voice(index) => {
                if let Some(voice) = state.voices.get_mut(index) {
                    voice.on_end = None;
                }
            }
        }
    }
}

impl HeadlessOutput {
    /// Create an empty headless output
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `stop()` calls received across music and voices
    pub fn releases(&self) -> usize {
        self.state.lock().releases
    }

    /// Number of music streams ever attached
    pub fn music_started(&self) -> usize {
        self.state.lock().music_started
    }

    /// Music streams attached and not yet stopped
    pub fn live_music(&self) -> usize {
        self.state.lock().music.len()
    }

    /// Number of voices ever scheduled
    pub fn voices_started(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Voices neither stopped nor completed
    pub fn live_voices(&self) -> usize {
        self.state
            .lock()
            .voices
            .iter()
            .filter(|v| v.on_end.is_some() && !v.stopped.load(Ordering::Acquire))
            .count()
    }

    /// Playback speed of every scheduled voice, in start order
    pub fn voice_speeds(&self) -> Vec<f32> {
        self.state.lock().voices.iter().map(|v| v.speed).collect()
    }

    /// Clip length of every scheduled voice, in start order
    pub fn voice_durations(&self) -> Vec<Duration> {
        self.state.lock().voices.iter().map(|v| v.duration).collect()
    }

    /// Pull `samples` interleaved samples from the live music stream, if any.
    /// Returns how many were produced.
    pub fn render_music(&self, samples: usize) -> usize {
        let mut state = self.state.lock();
        let Some(slot) = state
            .music
            .iter_mut()
            .rev()
            .find(|m| !m.stopped.load(Ordering::Acquire))
        else {
            return 0;
        };
        slot.stream.by_ref().take(samples).count()
    }

    /// Finish the `index`-th scheduled voice as if it played to the end.
    /// Fires its end callback unless it was stopped or already finished.
    pub fn complete_voice(&self, index: usize) -> bool {
        let callback = {
            let mut state = self.state.lock();
            match state.voices.get_mut(index) {
                Some(slot) if !slot.stopped.load(Ordering::Acquire) => slot.on_end.take(),
                _ => None,
            }
        };
        match callback {
            Some(on_end) => {
                on_end();
                true
            }
            None => false,
        }
    }

    /// Finish every live voice. Returns how many callbacks fired.
    pub fn complete_all_voices(&self) -> usize {
        let count = self.state.lock().voices.len();
        (0..count).filter(|&index| self.complete_voice(index)).count()
    }

    fn handle(&self, slot: Slot, stopped: Arc<AtomicBool>) -> Box<dyn PlaybackHandle> {
        Box::new(HeadlessHandle {
            slot,
            stopped,
            state: Arc::clone(&self.state),
        })
    }
}

impl AudioOutput for HeadlessOutput {
    fn start_music(&self, stream: MusicStream) -> Result<Box<dyn PlaybackHandle>> {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        state.music.push(MusicSlot {
            stream,
            stopped: Arc::clone(&stopped),
        });
        state.music_started += 1;
        drop(state);
        Ok(self.handle(Slot::Music, stopped))
    }

    fn start_voice(
        &self,
        clip: Arc<Clip>,
        speed: f32,
        on_end: EndCallback,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        let index = state.voices.len();
        state.voices.push(VoiceSlot {
            duration: clip.duration(),
            speed,
            on_end: Some(on_end),
            stopped: Arc::clone(&stopped),
        });
        drop(state);
        Ok(self.handle(Slot::Voice(index), stopped))
    }
}
