//! Shared test utilities
//!
//! Fake audio devices, a scripted recognizer and a fake call connector so the
//! daemon can run without audio hardware or network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_call::events::EventSender;
use beacon_call::voice::{
    AudioChunk, CaptureDevice, ChunkHandler, PlaybackBuffer, PlaybackDevice, Recognizer,
    RecognizerLoader, Subscriber, Transcript,
};
use beacon_call::{CallConnector, CallSession, Error, Result, SessionState};
use tokio::sync::mpsc;

/// Chunk of `len` bytes filled with `byte`
#[must_use]
pub fn chunk(byte: u8, len: usize) -> AudioChunk {
    Arc::from(vec![byte; len])
}

/// Wait for the next state, failing after two seconds
pub async fn next_state(states: &mut mpsc::UnboundedReceiver<SessionState>) -> SessionState {
    tokio::time::timeout(Duration::from_secs(2), states.recv())
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed")
}

/// Capture device driven by the test
#[derive(Clone, Default)]
pub struct FakeCapture {
    handler: Arc<Mutex<Option<ChunkHandler>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl FakeCapture {
    /// Deliver a chunk as if it came from the microphone
    ///
    /// Returns false if capture is not running.
    pub fn push(&self, chunk: AudioChunk) -> bool {
        let mut handler = self.handler.lock().unwrap();
        match handler.as_mut() {
            Some(handler) => {
                handler(chunk);
                true
            }
            None => false,
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for FakeCapture {
    fn start(&mut self, handler: ChunkHandler) -> Result<()> {
        *self.handler.lock().unwrap() = Some(handler);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.handler.lock().unwrap().take();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capture device that cannot be opened
pub struct BrokenCapture;

impl CaptureDevice for BrokenCapture {
    fn start(&mut self, _handler: ChunkHandler) -> Result<()> {
        Err(Error::Audio("no input device available".to_string()))
    }

    fn stop(&mut self) {}
}

/// Playback device that records its lifecycle
#[derive(Clone, Default)]
pub struct FakePlayback {
    source: Arc<Mutex<Option<Arc<PlaybackBuffer>>>>,
    stops: Arc<AtomicUsize>,
}

impl FakePlayback {
    /// Buffer the daemon attached on start
    pub fn source(&self) -> Option<Arc<PlaybackBuffer>> {
        self.source.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl PlaybackDevice for FakePlayback {
    fn start(&mut self, source: Arc<PlaybackBuffer>) -> Result<()> {
        *self.source.lock().unwrap() = Some(source);
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recognizer that returns one scripted result per accepted chunk
pub struct ScriptedRecognizer {
    script: Arc<Mutex<VecDeque<Option<Transcript>>>>,
}

impl Recognizer for ScriptedRecognizer {
    fn accept(&mut self, _pcm: &[u8]) -> Result<Option<Transcript>> {
        Ok(self.script.lock().unwrap().pop_front().flatten())
    }
}

/// Loader for a [`ScriptedRecognizer`]; the script can be extended after start
#[derive(Clone, Default)]
pub struct ScriptedLoader {
    script: Arc<Mutex<VecDeque<Option<Transcript>>>>,
}

impl ScriptedLoader {
    /// Queue a final transcript for the next chunk
    pub fn final_text(&self, text: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Some(Transcript::Final(text.to_string())));
    }

    /// Queue a partial transcript for the next chunk
    pub fn partial_text(&self, text: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Some(Transcript::Partial(text.to_string())));
    }

    /// Queue a chunk that yields nothing
    pub fn silence(&self) {
        self.script.lock().unwrap().push_back(None);
    }

    /// Script entries not yet consumed
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl RecognizerLoader for ScriptedLoader {
    fn load(&self) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(ScriptedRecognizer {
            script: Arc::clone(&self.script),
        }))
    }
}

/// Counters shared between a [`FakeConnector`] and its sessions
#[derive(Clone, Default)]
pub struct CallStats {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    chunks: Arc<AtomicUsize>,
}

impl CallStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Audio chunks delivered to any call
    pub fn chunks(&self) -> usize {
        self.chunks.load(Ordering::SeqCst)
    }
}

/// Connector that opens in-memory sessions
#[derive(Clone, Default)]
pub struct FakeConnector {
    stats: CallStats,
    fail_open: bool,
}

impl FakeConnector {
    /// Connector whose every open fails
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stats(&self) -> CallStats {
        self.stats.clone()
    }
}

impl CallConnector for FakeConnector {
    fn open(&self, _playback: Arc<PlaybackBuffer>, _events: EventSender) -> Result<Box<dyn CallSession>> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(Error::Realtime("connection refused".to_string()));
        }
        Ok(Box::new(FakeSession {
            stats: self.stats.clone(),
        }))
    }
}

/// Counts every close call so duplicate teardowns show up
struct FakeSession {
    stats: CallStats,
}

#[async_trait]
impl CallSession for FakeSession {
    fn audio_input(&self) -> Subscriber {
        let chunks = Arc::clone(&self.stats.chunks);
        Arc::new(move |_chunk| {
            chunks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    async fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}
