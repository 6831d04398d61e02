//! Wake and exit phrase detection
//!
//! Captured audio is recognized locally; a phrase only counts once it appears
//! in several consecutive final transcripts, and triggers are rate-limited by a
//! cooldown. This suppresses one-off misrecognitions as well as the assistant's
//! own voice echoing the phrase back through the microphone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::task::JoinHandle;

use super::queue::DropOldestQueue;
use super::recognizer::{Recognizer, RecognizerLoader, Transcript};
use super::{AudioChunk, Subscriber};
use crate::events::{EventKind, EventSender};

/// Maximum chunks waiting for recognition before the oldest are dropped
pub const WAKE_QUEUE_CAPACITY: usize = 512;

/// How long the recognition loop waits for audio before re-checking stop
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bounded wait for the recognition loop to exit
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Which phrase the engine listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Waiting for the wake phrase
    #[default]
    Idle,
    /// In a call, waiting for the exit phrase
    InCall,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InCall => write!(f, "in_call"),
        }
    }
}

/// Intent confirmed from speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Wake phrase confirmed
    Wake,
    /// Exit phrase confirmed
    Exit,
}

impl Intent {
    /// Event posted for this intent
    #[must_use]
    pub const fn event_kind(self) -> EventKind {
        match self {
            Self::Wake => EventKind::WakeDetected,
            Self::Exit => EventKind::ExitDetected,
        }
    }
}

/// Phrases and thresholds for confirmation
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    /// Phrase that starts a call
    pub wake_phrase: String,
    /// Phrase that ends a call
    pub exit_phrase: String,
    /// Minimum time between two triggers
    pub cooldown: Duration,
    /// Consecutive matching final transcripts required to trigger
    pub consecutive_finals: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            wake_phrase: "你好GPT".to_string(),
            exit_phrase: "再见GPT".to_string(),
            cooldown: Duration::from_secs(2),
            consecutive_finals: 2,
        }
    }
}

/// Lowercase and remove all whitespace
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Counts consecutive phrase matches per run mode
#[derive(Debug)]
pub struct PhraseConfirmer {
    wake_phrase: String,
    exit_phrase: String,
    cooldown: Duration,
    threshold: u32,
    mode: RunMode,
    wake_hits: u32,
    exit_hits: u32,
    last_trigger: Option<Instant>,
}

impl PhraseConfirmer {
    /// Create a confirmer in idle mode
    #[must_use]
    pub fn new(policy: &ConfirmationPolicy) -> Self {
        Self {
            wake_phrase: normalize(&policy.wake_phrase),
            exit_phrase: normalize(&policy.exit_phrase),
            cooldown: policy.cooldown,
            threshold: policy.consecutive_finals.max(1),
            mode: RunMode::Idle,
            wake_hits: 0,
            exit_hits: 0,
            last_trigger: None,
        }
    }

    /// Current run mode
    #[must_use]
    pub const fn mode(&self) -> RunMode {
        self.mode
    }

    /// Switch mode and reset both hit counters
    pub const fn set_mode(&mut self, mode: RunMode) {
        self.mode = mode;
        self.wake_hits = 0;
        self.exit_hits = 0;
    }

    /// Current (wake, exit) hit counters
    #[must_use]
    pub const fn hits(&self) -> (u32, u32) {
        (self.wake_hits, self.exit_hits)
    }

    /// Process one final transcript observed at `now`
    ///
    /// Returns the intent when the current mode's phrase is confirmed.
    pub fn on_final(&mut self, text: &str, now: Instant) -> Option<Intent> {
        let norm = normalize(text);
        if norm.is_empty() {
            return None;
        }

        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) < self.cooldown {
                tracing::debug!(transcript = text, "within trigger cooldown, ignoring");
                return None;
            }
        }

        let (phrase, hits, intent) = match self.mode {
            RunMode::Idle => (&self.wake_phrase, &mut self.wake_hits, Intent::Wake),
            RunMode::InCall => (&self.exit_phrase, &mut self.exit_hits, Intent::Exit),
        };

        if phrase.is_empty() || !norm.contains(phrase.as_str()) {
            *hits = 0;
            return None;
        }

        *hits += 1;
        if *hits < self.threshold {
            tracing::debug!(hits = *hits, threshold = self.threshold, "phrase matched, awaiting confirmation");
            return None;
        }

        *hits = 0;
        self.last_trigger = Some(now);
        Some(intent)
    }
}

/// Background wake/exit phrase detector
///
/// Audio arrives through [`WakeEngine::audio_input`] on the capture thread and
/// is recognized on a blocking worker. Confirmed intents are posted as events.
pub struct WakeEngine {
    confirmer: Arc<Mutex<PhraseConfirmer>>,
    queue: Arc<DropOldestQueue<AudioChunk>>,
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    loader: Box<dyn RecognizerLoader>,
    events: EventSender,
    worker: Option<JoinHandle<()>>,
}

impl WakeEngine {
    /// Create a stopped engine
    #[must_use]
    pub fn new(
        policy: &ConfirmationPolicy,
        loader: Box<dyn RecognizerLoader>,
        events: EventSender,
    ) -> Self {
        Self {
            confirmer: Arc::new(Mutex::new(PhraseConfirmer::new(policy))),
            queue: Arc::new(DropOldestQueue::new(WAKE_QUEUE_CAPACITY)),
            enabled: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            loader,
            events,
            worker: None,
        }
    }

    /// Whether audio is being accepted for recognition
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Current run mode
    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.confirmer
            .lock()
            .map(|c| c.mode())
            .unwrap_or_default()
    }

    /// Switch run mode, resetting confirmation counters
    pub fn set_mode(&self, mode: RunMode) {
        match self.confirmer.lock() {
            Ok(mut confirmer) => confirmer.set_mode(mode),
            Err(poisoned) => poisoned.into_inner().set_mode(mode),
        }
        tracing::info!(%mode, "wake engine mode changed");
    }

    /// Queue a captured chunk for recognition; ignored while disabled
    pub fn push_audio(&self, chunk: AudioChunk) {
        push_chunk(&self.enabled, &self.queue, chunk);
    }

    /// Hub subscriber feeding this engine
    #[must_use]
    pub fn audio_input(&self) -> Subscriber {
        let enabled = Arc::clone(&self.enabled);
        let queue = Arc::clone(&self.queue);
        Arc::new(move |chunk| {
            push_chunk(&enabled, &queue, chunk);
            Ok(())
        })
    }

    /// Load the recognizer and start the recognition loop
    ///
    /// If the recognizer cannot be loaded the engine stays disabled.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }

        let recognizer = match self.loader.load() {
            Ok(recognizer) => recognizer,
            Err(e) => {
                tracing::warn!(error = %e, "speech recognizer unavailable, wake engine disabled");
                return;
            }
        };

        self.stop.store(false, Ordering::Release);
        self.queue.clear();

        let ctx = LoopContext {
            confirmer: Arc::clone(&self.confirmer),
            queue: Arc::clone(&self.queue),
            enabled: Arc::clone(&self.enabled),
            stop: Arc::clone(&self.stop),
            events: self.events.clone(),
        };
        self.worker = Some(tokio::task::spawn_blocking(move || {
            recognition_loop(recognizer, &ctx);
        }));
        self.enabled.store(true, Ordering::Release);

        tracing::info!("wake engine started");
    }

    /// Stop the recognition loop, waiting a bounded time for it to exit
    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.enabled.store(false, Ordering::Release);

        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(JOIN_TIMEOUT, worker).await.is_err() {
                tracing::warn!("wake engine did not stop in time, detaching");
            }
        }

        self.queue.clear();
        tracing::info!("wake engine stopped");
    }
}

fn push_chunk(enabled: &AtomicBool, queue: &DropOldestQueue<AudioChunk>, chunk: AudioChunk) {
    if !enabled.load(Ordering::Acquire) {
        return;
    }
    if queue.push(chunk) {
        tracing::trace!("recognition queue full, dropped oldest chunk");
    }
}

struct LoopContext {
    confirmer: Arc<Mutex<PhraseConfirmer>>,
    queue: Arc<DropOldestQueue<AudioChunk>>,
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    events: EventSender,
}

fn recognition_loop(mut recognizer: Box<dyn Recognizer>, ctx: &LoopContext) {
    while !ctx.stop.load(Ordering::Acquire) {
        let Some(chunk) = ctx.queue.pop_timeout(POLL_INTERVAL) else {
            continue;
        };

        match recognizer.accept(&chunk) {
            Ok(Some(Transcript::Final(text))) => handle_final(ctx, &text),
            Ok(Some(Transcript::Partial(text))) => {
                tracing::debug!(partial = %text, "wake partial transcript");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "wake recognition error");
            }
        }
    }

    ctx.enabled.store(false, Ordering::Release);
    tracing::debug!("recognition loop exited");
}

fn handle_final(ctx: &LoopContext, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    tracing::info!(transcript = text, "wake final transcript");

    let intent = match ctx.confirmer.lock() {
        Ok(mut confirmer) => confirmer.on_final(text, Instant::now()),
        Err(_) => return,
    };

    if let Some(intent) = intent {
        tracing::info!(?intent, transcript = text, "phrase confirmed");
        ctx.events.post(intent.event_kind(), json!({ "text": text }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: u32) -> ConfirmationPolicy {
        ConfirmationPolicy {
            wake_phrase: "hello".to_string(),
            exit_phrase: "Good Bye".to_string(),
            cooldown: Duration::from_secs(2),
            consecutive_finals: threshold,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hey  ORIN\t"), "heyorin");
        assert_eq!(normalize("你好 GPT"), "你好gpt");
    }

    #[test]
    fn test_two_consecutive_finals_trigger_once() {
        let mut confirmer = PhraseConfirmer::new(&policy(2));
        let now = Instant::now();

        assert_eq!(confirmer.on_final("say hello now", now), None);
        assert_eq!(
            confirmer.on_final("say hello now", now + Duration::from_millis(500)),
            Some(Intent::Wake)
        );
        assert_eq!(confirmer.hits(), (0, 0));
    }

    #[test]
    fn test_non_match_resets_counter() {
        let mut confirmer = PhraseConfirmer::new(&policy(2));
        let now = Instant::now();

        assert_eq!(confirmer.on_final("say hello now", now), None);
        assert_eq!(confirmer.on_final("something else", now), None);
        assert_eq!(confirmer.on_final("say hello now", now), None);
        assert_eq!(confirmer.hits(), (1, 0));
    }

    #[test]
    fn test_cooldown_suppresses_retrigger() {
        let mut confirmer = PhraseConfirmer::new(&policy(1));
        let now = Instant::now();

        assert_eq!(confirmer.on_final("hello", now), Some(Intent::Wake));
        assert_eq!(confirmer.on_final("hello", now + Duration::from_secs(1)), None);
        assert_eq!(
            confirmer.on_final("hello", now + Duration::from_secs(3)),
            Some(Intent::Wake)
        );
    }

    #[test]
    fn test_mode_selects_phrase() {
        let mut confirmer = PhraseConfirmer::new(&policy(1));
        let now = Instant::now();

        assert_eq!(confirmer.on_final("good bye", now), None);

        confirmer.set_mode(RunMode::InCall);
        assert_eq!(confirmer.on_final("hello", now), None);
        assert_eq!(confirmer.on_final("ok goodbye then", now), Some(Intent::Exit));
    }

    #[test]
    fn test_set_mode_resets_hits() {
        let mut confirmer = PhraseConfirmer::new(&policy(3));
        let now = Instant::now();

        confirmer.on_final("hello", now);
        confirmer.on_final("hello", now);
        assert_eq!(confirmer.hits(), (2, 0));

        confirmer.set_mode(RunMode::Idle);
        assert_eq!(confirmer.hits(), (0, 0));
    }

    #[test]
    fn test_empty_transcript_keeps_counter() {
        let mut confirmer = PhraseConfirmer::new(&policy(2));
        let now = Instant::now();

        confirmer.on_final("hello", now);
        assert_eq!(confirmer.on_final("   ", now), None);
        assert_eq!(confirmer.on_final("hello", now), Some(Intent::Wake));
    }

    #[test]
    fn test_zero_threshold_clamped() {
        let mut confirmer = PhraseConfirmer::new(&policy(0));
        assert_eq!(confirmer.on_final("hello", Instant::now()), Some(Intent::Wake));
    }
}
