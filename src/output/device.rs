//! Audio device integration using rodio
//!
//! One `Sink` per attached music stream and per effect voice, all mixed by
//! rodio on the default output device.

use super::{AudioOutput, EndCallback, PlaybackHandle};
use crate::decode::{Clip, MusicStream};
use crate::{Result, SoundstageError};
use log::debug;
use parking_lot::Mutex;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

impl Source for MusicStream {
    fn current_frame_len(&self) -> Option<usize> {
        // Format never changes mid-stream
        None
    }

    fn channels(&self) -> u16 {
        MusicStream::channels(self)
    }

    fn sample_rate(&self) -> u32 {
        MusicStream::sample_rate(self)
    }

    fn total_duration(&self) -> Option<Duration> {
        // Loops forever
        None
    }
}

/// Audio source over a shared decoded clip
struct ClipSource {
    clip: Arc<Clip>,
    pos: usize,
}

impl Iterator for ClipSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.clip.samples().get(self.pos).copied();
        self.pos += 1;
        sample
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.clip.samples().len().saturating_sub(self.pos);
        (remaining, Some(remaining))
    }
}

impl Source for ClipSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.clip.samples().len().saturating_sub(self.pos))
    }

    fn channels(&self) -> u16 {
        self.clip.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.clip.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(self.clip.duration())
    }
}

struct SinkHandle {
    sink: Sink,
}

impl PlaybackHandle for SinkHandle {
    fn stop(&mut self) {
        self.sink.stop();
    }
}

/// Playback on the system's default output device
pub struct RodioOutput {
    handle: OutputStreamHandle,
    shutdown: Option<mpsc::Sender<()>>,
    device_thread: Option<JoinHandle<()>>,
}

impl RodioOutput {
    /// Open the default output device.
    ///
    /// The rodio `OutputStream` cannot leave the thread that created it, so it
    /// lives on a dedicated device thread until this value is dropped.
    pub fn open_default() -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let device_thread = std::thread::Builder::new()
            .name("soundstage-device".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Blocks until shutdown is signalled or the sender is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| {
                SoundstageError::AudioDeviceError("Device thread exited early".to_string())
            })?
            .map_err(|e| {
                SoundstageError::AudioDeviceError(format!("Failed to create audio stream: {e}"))
            })?;

        debug!("Audio device opened");
        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            device_thread: Some(device_thread),
        })
    }

    fn new_sink(&self) -> Result<Sink> {
        Sink::try_new(&self.handle)
            .map_err(|e| SoundstageError::AudioDeviceError(format!("Failed to create sink: {e}")))
    }
}

impl AudioOutput for RodioOutput {
    fn start_music(&self, stream: MusicStream) -> Result<Box<dyn PlaybackHandle>> {
        let sink = self.new_sink()?;
        sink.append(stream);
        Ok(Box::new(SinkHandle { sink }))
    }

    fn start_voice(
        &self,
        clip: Arc<Clip>,
        speed: f32,
        on_end: EndCallback,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let sink = self.new_sink()?;
        sink.append(ClipSource { clip, pos: 0 }.speed(speed));

        // EmptyCallback wants a repeatable Fn; ours runs at most once.
        let on_end = Mutex::new(Some(on_end));
        sink.append(EmptyCallback::<f32>::new(Box::new(move || {
            if let Some(callback) = on_end.lock().take() {
                callback();
            }
        })));
        Ok(Box::new(SinkHandle { sink }))
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.device_thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::wav_bytes;

    fn try_output() -> Option<RodioOutput> {
        match RodioOutput::open_default() {
            Ok(output) => Some(output),
            Err(err) => {
                eprintln!("Skipping device test (audio backend unavailable): {err}");
                None
            }
        }
    }

    #[test]
    fn test_clip_source_reports_format() {
        let clip = Arc::new(Clip::decode(wav_bytes(8_000, 2, 400), Some("wav")).unwrap());
        let source = ClipSource {
            clip: Arc::clone(&clip),
            pos: 0,
        };
        assert_eq!(Source::channels(&source), 2);
        assert_eq!(Source::sample_rate(&source), 8_000);
        assert_eq!(source.total_duration(), Some(clip.duration()));
        assert_eq!(source.count(), 800);
    }

    #[test]
    fn test_voice_and_music_on_device() {
        let Some(output) = try_output() else {
            return;
        };
        let clip = Arc::new(Clip::decode(wav_bytes(8_000, 1, 800), Some("wav")).unwrap());
        let mut voice = output.start_voice(clip, 1.1, Box::new(|| {})).unwrap();
        voice.stop();

        let stream = MusicStream::open(wav_bytes(8_000, 1, 800), Some("wav")).unwrap();
        let mut music = output.start_music(stream).unwrap();
        music.stop();
    }
}
