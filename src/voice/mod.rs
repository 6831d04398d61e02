//! Voice processing module
//!
//! Handles audio capture and fan-out, playback buffering, and wake/exit phrase
//! detection. The realtime call itself lives in [`crate::realtime`].

mod capture;
mod device;
mod hub;
mod playback;
mod playback_buffer;
mod queue;
mod recognizer;
mod wake_word;

use std::sync::Arc;

pub use capture::MicCapture;
pub use device::{DeviceListing, DeviceSelector, list_devices};
pub use hub::{AudioHub, Subscriber, SubscriptionToken};
pub use playback::SpeakerOutput;
pub use playback_buffer::{PLAYBACK_QUEUE_CAPACITY, PlaybackBuffer};
pub use queue::DropOldestQueue;
pub use recognizer::{Recognizer, RecognizerLoader, Transcript, UnavailableRecognizer};
#[cfg(feature = "vosk")]
pub use recognizer::VoskLoader;
pub use wake_word::{
    ConfirmationPolicy, Intent, PhraseConfirmer, RunMode, WAKE_QUEUE_CAPACITY, WakeEngine,
};

use crate::Result;

/// Bytes per 16-bit PCM sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// One immutable chunk of 16-bit little-endian PCM audio
///
/// Shared by every subscriber of the hub; never mutated after capture.
pub type AudioChunk = Arc<[u8]>;

/// Callback receiving fixed-size chunks from a capture device
pub type ChunkHandler = Box<dyn FnMut(AudioChunk) + Send + 'static>;

/// PCM stream format shared by capture, playback and the realtime session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Duration of one capture/playback chunk in milliseconds
    pub chunk_ms: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            chunk_ms: 20,
        }
    }
}

impl AudioFormat {
    /// Frames (samples per channel) in one chunk
    #[must_use]
    pub const fn chunk_frames(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize) / 1000
    }

    /// Interleaved samples in one chunk
    #[must_use]
    pub const fn chunk_samples(&self) -> usize {
        self.chunk_frames() * self.channels as usize
    }

    /// Bytes in one chunk
    #[must_use]
    pub const fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * BYTES_PER_SAMPLE
    }
}

/// Hardware-driven audio input
///
/// Implementations invoke the handler from their own callback thread with
/// chunks of exactly [`AudioFormat::chunk_bytes`] bytes.
pub trait CaptureDevice {
    /// Start delivering chunks to `handler`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self, handler: ChunkHandler) -> Result<()>;

    /// Stop delivering chunks
    fn stop(&mut self);
}

/// Hardware-driven audio output
///
/// Implementations pull fixed-size frames from the buffer on their own
/// callback thread.
pub trait PlaybackDevice {
    /// Start pulling frames from `source`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self, source: Arc<PlaybackBuffer>) -> Result<()>;

    /// Stop pulling frames
    fn stop(&mut self);
}

/// Encode i16 samples as little-endian PCM bytes
#[must_use]
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian PCM bytes into i16 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
