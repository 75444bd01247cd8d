//! Output device seam
//!
//! The music channel and the effect pool never talk to an audio API directly.
//! They hand decoded material to an [`AudioOutput`] and keep the returned
//! [`PlaybackHandle`] as the owned, releasable resource.

mod headless;
#[cfg(feature = "streaming")]
mod device;

pub use headless::HeadlessOutput;
#[cfg(feature = "streaming")]
pub use device::RodioOutput;

use crate::decode::{Clip, MusicStream};
use crate::Result;
use std::sync::Arc;

/// Invoked once when a voice reaches its natural end
pub type EndCallback = Box<dyn FnOnce() + Send + 'static>;

/// A started stream or voice. Stopping releases it.
pub trait PlaybackHandle: Send {
    /// Stop playback and release the underlying resource
    fn stop(&mut self);
}

/// Something that can play music streams and effect voices
pub trait AudioOutput: Send + Sync {
    /// Attach a looping music stream and start it immediately
    fn start_music(&self, stream: MusicStream) -> Result<Box<dyn PlaybackHandle>>;

    /// Schedule a one-shot voice for immediate playback at `speed`
    /// (1.0 = original pitch). `on_end` fires once on natural completion and
    /// must never be invoked from inside this call.
    fn start_voice(
        &self,
        clip: Arc<Clip>,
        speed: f32,
        on_end: EndCallback,
    ) -> Result<Box<dyn PlaybackHandle>>;
}
