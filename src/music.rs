//! Music channel
//!
//! One exclusive, always-looping background track. Starting a new track
//! releases the previous one first, before the new data is even probed, so at
//! most one music resource exists at any instant and a failed replacement
//! leaves the channel idle rather than half-attached.

use crate::decode::{MusicStream, Playhead};
use crate::output::{AudioOutput, PlaybackHandle};
use crate::Result;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// Position and length of the current track, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MusicProgress {
    /// Position within the current loop pass
    pub current: f64,
    /// Length of one pass; 0 until known
    pub duration: f64,
}

/// Proof of a started replacement, consumed by [`MusicChannel::commit`] or [`MusicChannel::abandon`]
#[derive(Debug)]
#[must_use]
pub struct MusicTicket {
    generation: u64,
}

struct Attached {
    handle: Box<dyn PlaybackHandle>,
    playhead: Playhead,
}

impl Attached {
    fn release(mut self) {
        self.handle.stop();
    }
}

#[derive(Default)]
struct ChannelState {
    active_key: Option<String>,
    generation: u64,
    attached: Option<Attached>,
}

impl ChannelState {
    fn detach(&mut self) {
        if let Some(attached) = self.attached.take() {
            attached.release();
            debug!("Music resource released");
        }
    }
}

/// The exclusive music slot
pub struct MusicChannel {
    output: Arc<dyn AudioOutput>,
    state: Mutex<ChannelState>,
}

impl MusicChannel {
    /// Create an idle channel
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Replace the current track with `bytes`, looping from position 0.
    ///
    /// On failure the previous track is already gone and the channel is idle.
    pub fn start(&self, bytes: Arc<[u8]>, hint: Option<&str>, key: &str) -> Result<()> {
        let ticket = self.begin(key);
        match MusicStream::open(bytes, hint) {
            Ok(stream) => self.commit(ticket, stream).map(|_| ()),
            Err(err) => {
                self.abandon(ticket);
                Err(err)
            }
        }
    }

    /// Release the current track and claim the channel for `key`.
    /// Any earlier replacement still decoding becomes stale.
    pub fn begin(&self, key: &str) -> MusicTicket {
        let mut state = self.state.lock();
        state.detach();
        state.generation += 1;
        state.active_key = Some(key.to_string());
        MusicTicket {
            generation: state.generation,
        }
    }

    /// Attach the decoded stream if the ticket is still current.
    ///
    /// Returns `Ok(false)` when the channel was stopped or claimed again in the meantime.
    pub fn commit(&self, ticket: MusicTicket, stream: MusicStream) -> Result<bool> {
        let mut state = self.state.lock();
        if state.generation != ticket.generation {
            debug!("Discarding stale music decode");
            return Ok(false);
        }

        let playhead = stream.playhead();
        match self.output.start_music(stream) {
            Ok(handle) => {
                state.attached = Some(Attached { handle, playhead });
                debug!(
                    "Music '{}' playing",
                    state.active_key.as_deref().unwrap_or_default()
                );
                Ok(true)
            }
            Err(err) => {
                state.active_key = None;
                Err(err)
            }
        }
    }

    /// Give up a replacement whose decode failed; the channel goes idle.
    pub fn abandon(&self, ticket: MusicTicket) {
        let mut state = self.state.lock();
        if state.generation == ticket.generation {
            state.active_key = None;
        }
    }

    /// Stop playback, release the track and clear the key. No-op when idle.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.detach();
        state.active_key = None;
    }

    /// Current position and length, both 0 when idle
    pub fn progress(&self) -> MusicProgress {
        let state = self.state.lock();
        match &state.attached {
            Some(attached) => MusicProgress {
                current: attached.playhead.position().as_secs_f64(),
                duration: attached
                    .playhead
                    .duration()
                    .map_or(0.0, |d| d.as_secs_f64()),
            },
            None => MusicProgress::default(),
        }
    }

    /// Key of the current (or currently loading) track
    pub fn active_key(&self) -> Option<String> {
        self.state.lock().active_key.clone()
    }

    /// Whether a track is attached to the output
    pub fn is_playing(&self) -> bool {
        self.state.lock().attached.is_some()
    }
}

impl Drop for MusicChannel {
    fn drop(&mut self) {
        self.state.get_mut().detach();
    }
}
