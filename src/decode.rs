//! Audio decoding
//!
//! Uses symphonia for every supported container/codec:
//! - WAV (PCM), FLAC
//! - MP3, OGG Vorbis, AAC / M4A
//!
//! Effects are decoded once into a [`Clip`]. Music is decoded lazily by a
//! [`MusicStream`], which loops forever and publishes its progress through a
//! shared [`Playhead`].

use crate::{Result, SoundstageError};
use log::{debug, warn};
use std::any::Any;
use std::io::{Cursor, ErrorKind};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

// ============================================================================
// PacketReader - symphonia format + codec pair
// ============================================================================

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Run decoder code, turning a panic on malformed input into a decode error.
fn guarded<T>(operation: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(SoundstageError::Decode(format!(
            "{operation} panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

struct PacketReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    n_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl PacketReader {
    fn open(bytes: Arc<[u8]>, hint: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(
            Box::new(Cursor::new(bytes)),
            MediaSourceStreamOptions::default(),
        );

        let mut probe_hint = Hint::new();
        if let Some(ext) = hint {
            probe_hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &probe_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| SoundstageError::Decode(format!("Failed to probe format: {e}")))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SoundstageError::Decode("No audio track found".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .filter(|&rate| rate > 0)
            .ok_or_else(|| SoundstageError::Decode("Missing sample rate".to_string()))?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(0);
        if channels == 0 {
            return Err(SoundstageError::Decode("Missing channel layout".to_string()));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| SoundstageError::Decode(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            channels: channels as u16,
            sample_rate,
            n_frames: params.n_frames,
            sample_buf: None,
        })
    }

    /// Decode the next packet of our track into `out` (interleaved).
    /// Returns `Ok(false)` at end of stream.
    fn read_packet(&mut self, out: &mut Vec<f32>) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                // Chained streams; treat the boundary as the end of this pass.
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(SoundstageError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let needs_realloc = match self.sample_buf.as_ref() {
                        None => true,
                        Some(buf) => buf.capacity() < decoded.capacity(),
                    };
                    if needs_realloc {
                        let spec = SignalSpec::new(decoded.spec().rate, decoded.spec().channels);
                        self.sample_buf =
                            Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        out.extend_from_slice(buf.samples());
                    }
                    return Ok(true);
                }
                // Corrupt packet; skip it.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(SoundstageError::Decode(e.to_string())),
            }
        }
    }
}

// ============================================================================
// Clip - fully decoded one-shot buffer
// ============================================================================

/// A fully decoded, interleaved `f32` buffer
#[derive(Debug, Clone)]
pub struct Clip {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl Clip {
    /// Decode a whole byte stream. `hint` is the file extension, if known.
    pub fn decode(bytes: Arc<[u8]>, hint: Option<&str>) -> Result<Self> {
        let (reader, samples) = guarded("Decoding clip", || {
            let mut reader = PacketReader::open(bytes, hint)?;
            let mut samples = Vec::new();
            while reader.read_packet(&mut samples)? {}
            Ok((reader, samples))
        })?;

        if samples.is_empty() {
            return Err(SoundstageError::Decode(
                "Stream contains no audio frames".to_string(),
            ));
        }

        Ok(Self {
            samples,
            channels: reader.channels,
            sample_rate: reader.sample_rate,
        })
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback length at normal speed
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

// ============================================================================
// Playhead - shared music position
// ============================================================================

/// Position and length of a looping stream, shared between the audio thread
/// that advances it and the control side that reads it.
#[derive(Debug, Clone)]
pub struct Playhead {
    inner: Arc<PlayheadState>,
}

#[derive(Debug)]
struct PlayheadState {
    frames: AtomicU64,
    /// 0 while unknown
    total_frames: AtomicU64,
    sample_rate: u32,
}

impl Playhead {
    /// Create a playhead at position 0
    pub fn new(sample_rate: u32, total_frames: Option<u64>) -> Self {
        Self {
            inner: Arc::new(PlayheadState {
                frames: AtomicU64::new(0),
                total_frames: AtomicU64::new(total_frames.unwrap_or(0)),
                sample_rate: sample_rate.max(1),
            }),
        }
    }

    /// Position within the current pass
    pub fn position(&self) -> Duration {
        self.frames_to_duration(self.inner.frames.load(Ordering::Relaxed))
    }

    /// Length of one pass, once known
    pub fn duration(&self) -> Option<Duration> {
        match self.inner.total_frames.load(Ordering::Relaxed) {
            0 => None,
            frames => Some(self.frames_to_duration(frames)),
        }
    }

    pub(crate) fn advance(&self, frames: u64) {
        self.inner.frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// End of a pass: learn the length if the container didn't report it, and rewind.
    pub(crate) fn wrap(&self, pass_frames: u64) {
        let _ = self.inner.total_frames.compare_exchange(
            0,
            pass_frames,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        self.inner.frames.store(0, Ordering::Relaxed);
    }

    fn frames_to_duration(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.inner.sample_rate as f64)
    }
}

// ============================================================================
// MusicStream - lazily decoded, endlessly looping source
// ============================================================================

/// Endlessly looping decoded stream over a shared byte buffer
pub struct MusicStream {
    bytes: Arc<[u8]>,
    hint: Option<String>,
    reader: PacketReader,
    buffer: Vec<f32>,
    cursor: usize,
    channel_index: u16,
    pass_frames: u64,
    channels: u16,
    sample_rate: u32,
    playhead: Playhead,
    exhausted: bool,
}

impl MusicStream {
    /// Probe the data and prepare the stream. Malformed data fails here,
    /// before anything is attached to an output.
    pub fn open(bytes: Arc<[u8]>, hint: Option<&str>) -> Result<Self> {
        let reader = guarded("Probing music", || PacketReader::open(Arc::clone(&bytes), hint))?;
        let playhead = Playhead::new(reader.sample_rate, reader.n_frames);
        debug!(
            "Opened music stream: {} Hz, {} channel(s), length {:?}",
            reader.sample_rate,
            reader.channels,
            playhead.duration()
        );

        Ok(Self {
            bytes,
            hint: hint.map(str::to_string),
            channels: reader.channels,
            sample_rate: reader.sample_rate,
            reader,
            buffer: Vec::new(),
            cursor: 0,
            channel_index: 0,
            pass_frames: 0,
            playhead,
            exhausted: false,
        })
    }

    /// Channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Handle for reading the position from another thread
    pub fn playhead(&self) -> Playhead {
        self.playhead.clone()
    }

    fn restart_pass(&mut self) {
        if self.pass_frames == 0 {
            warn!("Music stream produced no audio in a full pass; stopping");
            self.exhausted = true;
            return;
        }

        self.playhead.wrap(self.pass_frames);
        self.pass_frames = 0;
        self.channel_index = 0;

        let bytes = Arc::clone(&self.bytes);
        let hint = self.hint.as_deref();
        match guarded("Reopening music", || PacketReader::open(bytes, hint)) {
            Ok(reader) => self.reader = reader,
            Err(err) => {
                warn!("Music stream could not loop: {err}");
                self.exhausted = true;
            }
        }
    }
}

impl Iterator for MusicStream {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        loop {
            if self.cursor < self.buffer.len() {
                let sample = self.buffer[self.cursor];
                self.cursor += 1;
                self.channel_index += 1;
                if self.channel_index == self.channels {
                    self.channel_index = 0;
                    self.pass_frames += 1;
                    self.playhead.advance(1);
                }
                return Some(sample);
            }

            if self.exhausted {
                return None;
            }

            self.buffer.clear();
            self.cursor = 0;
            let reader = &mut self.reader;
            let buffer = &mut self.buffer;
            match guarded("Decoding music", || reader.read_packet(buffer)) {
                Ok(true) => {}
                Ok(false) => self.restart_pass(),
                Err(err) => {
                    warn!("Music stream stopped: {err}");
                    self.exhausted = true;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Mono/stereo 16-bit WAV with a simple ramp, built in memory.
    pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Arc<[u8]> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut data = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut data), spec)
                .expect("Failed to create WAV writer");
            for frame in 0..frames {
                for _ in 0..channels {
                    let value = ((frame % 200) as i16 - 100) * 100;
                    writer.write_sample(value).expect("Failed to write sample");
                }
            }
            writer.finalize().expect("Failed to finalize WAV");
        }
        Arc::from(data)
    }

    #[test]
    fn test_clip_decode_wav() {
        let clip = Clip::decode(wav_bytes(8_000, 1, 4_000), Some("wav")).unwrap();
        assert_eq!(clip.channels(), 1);
        assert_eq!(clip.sample_rate(), 8_000);
        assert_eq!(clip.frames(), 4_000);
        assert_relative_eq!(clip.duration().as_secs_f64(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_clip_decode_without_hint() {
        let clip = Clip::decode(wav_bytes(22_050, 2, 2_205), None).unwrap();
        assert_eq!(clip.channels(), 2);
        assert_eq!(clip.samples().len(), 2 * 2_205);
    }

    #[test]
    fn test_clip_decode_garbage() {
        let garbage: Arc<[u8]> = Arc::from(vec![0x42u8; 512]);
        let err = Clip::decode(garbage, Some("wav")).unwrap_err();
        assert!(matches!(err, SoundstageError::Decode(_)));
    }

    /// WAV whose header claims a sample rate of zero
    pub(crate) fn zero_rate_wav_bytes() -> Arc<[u8]> {
        let mut data = wav_bytes(8_000, 1, 800).to_vec();
        // Sample rate and byte rate fields of the fmt chunk
        data[24..32].fill(0);
        Arc::from(data)
    }

    #[test]
    fn test_zero_sample_rate_is_a_decode_error() {
        let err = Clip::decode(zero_rate_wav_bytes(), Some("wav")).unwrap_err();
        assert!(matches!(err, SoundstageError::Decode(_)));
        assert!(MusicStream::open(zero_rate_wav_bytes(), Some("wav")).is_err());
    }

    #[test]
    fn test_guarded_converts_panics() {
        let err = guarded::<()>("Decoding clip", || panic!("bad header")).unwrap_err();
        match err {
            SoundstageError::Decode(message) => assert!(message.contains("bad header")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(guarded("Decoding clip", || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_music_stream_open_garbage() {
        let garbage: Arc<[u8]> = Arc::from(b"definitely not audio".to_vec());
        assert!(MusicStream::open(garbage, Some("mp3")).is_err());
    }

    #[test]
    fn test_music_stream_loops_and_rewinds_playhead() {
        let mut stream = MusicStream::open(wav_bytes(1_000, 2, 100), Some("wav")).unwrap();
        let playhead = stream.playhead();
        assert_eq!(playhead.duration(), Some(Duration::from_millis(100)));
        assert_eq!(playhead.position(), Duration::ZERO);

        let first_pass: Vec<f32> = stream.by_ref().take(200).collect();
        assert_relative_eq!(playhead.position().as_secs_f64(), 0.1, epsilon = 1e-9);

        // Crossing the end rewinds and replays the same data.
        let second_pass: Vec<f32> = stream.by_ref().take(50).collect();
        assert_eq!(&second_pass[..], &first_pass[..50]);
        assert_relative_eq!(playhead.position().as_secs_f64(), 0.025, epsilon = 1e-9);
    }

    #[test]
    fn test_playhead_learns_duration_on_wrap() {
        let playhead = Playhead::new(1_000, None);
        assert_eq!(playhead.duration(), None);

        playhead.advance(250);
        assert_eq!(playhead.position(), Duration::from_millis(250));

        playhead.wrap(250);
        assert_eq!(playhead.duration(), Some(Duration::from_millis(250)));
        assert_eq!(playhead.position(), Duration::ZERO);

        // A known length is never overwritten.
        playhead.wrap(999);
        assert_eq!(playhead.duration(), Some(Duration::from_millis(250)));
    }
}
