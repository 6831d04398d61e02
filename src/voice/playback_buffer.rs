//! Outbound audio buffering between the realtime session and the speaker
//!
//! The realtime receive loop enqueues decoded PCM at network pace; the
//! playback callback pulls exact frame sizes at hardware pace. Underruns are
//! filled with silence so the output device never stalls.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum number of queued chunks before new audio is dropped
pub const PLAYBACK_QUEUE_CAPACITY: usize = 512;

#[derive(Default)]
struct Inner {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of the front chunk already handed to the device
    head_offset: usize,
}

/// Bounded PCM queue read in fixed-size frames
pub struct PlaybackBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for PlaybackBuffer {
    fn default() -> Self {
        Self::new(PLAYBACK_QUEUE_CAPACITY)
    }
}

impl PlaybackBuffer {
    /// Create a buffer holding at most `capacity` chunks
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Append producer audio; drops the chunk if the queue is full
    ///
    /// Returns false if the chunk was dropped.
    pub fn enqueue(&self, pcm: Vec<u8>) -> bool {
        if pcm.is_empty() {
            return true;
        }

        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };

        if inner.chunks.len() >= self.capacity {
            drop(inner);
            tracing::warn!(bytes = pcm.len(), "playback queue full, dropping audio chunk");
            return false;
        }

        inner.chunks.push_back(pcm);
        true
    }

    /// Fill `out` with queued audio, zero-padding any shortfall
    ///
    /// Returns the number of bytes that came from queued audio.
    pub fn fill_frame(&self, out: &mut [u8]) -> usize {
        let mut written = 0;

        if let Ok(mut inner) = self.inner.lock() {
            while written < out.len() {
                let offset = inner.head_offset;
                let Some(front) = inner.chunks.front() else {
                    break;
                };

                let available = &front[offset..];
                let n = available.len().min(out.len() - written);
                out[written..written + n].copy_from_slice(&available[..n]);
                written += n;
                let exhausted = offset + n == front.len();

                if exhausted {
                    inner.chunks.pop_front();
                    inner.head_offset = 0;
                } else {
                    inner.head_offset = offset + n;
                }
            }
        }

        out[written..].fill(0);
        written
    }

    /// Read exactly `frame_bytes` bytes, silence-padded on underrun
    #[must_use]
    pub fn read_frame(&self, frame_bytes: usize) -> Vec<u8> {
        let mut frame = vec![0_u8; frame_bytes];
        self.fill_frame(&mut frame);
        frame
    }

    /// Discard all queued and partially played audio
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.chunks.clear();
            inner.head_offset = 0;
        }
    }

    /// Bytes waiting to be played
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| {
                inner.chunks.iter().map(Vec::len).sum::<usize>() - inner.head_offset
            })
            .unwrap_or(0)
    }

    /// Whether nothing is waiting to be played
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffered_bytes() == 0
    }
}
