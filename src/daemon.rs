//! Daemon - the voice call session orchestrator
//!
//! Owns the audio devices, the audio hub, the playback buffer and the wake
//! engine, and consumes the session event queue. All session state changes
//! happen here, one event at a time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::events::{self, Event, EventKind, EventReceiver, EventSender};
use crate::voice::{
    AudioHub, CaptureDevice, ConfirmationPolicy, PLAYBACK_QUEUE_CAPACITY, PlaybackBuffer,
    PlaybackDevice, RecognizerLoader, RunMode, Subscriber, SubscriptionToken,
    UnavailableRecognizer, WakeEngine,
};
use crate::{Error, Result};

/// How long the event loop waits before re-checking the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Externally visible session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the wake phrase
    IdleListening,
    /// Opening a realtime session
    Connecting,
    /// Conversation in progress
    InCall,
    /// Tearing the call down
    Stopping,
    /// Not running
    Shutdown,
}

impl SessionState {
    /// Name printed on stdout
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdleListening => "IDLE_LISTENING",
            Self::Connecting => "CONNECTING",
            Self::InCall => "IN_CALL",
            Self::Stopping => "STOPPING",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// Whether entering this state prints a `STATE=` line
    #[must_use]
    pub const fn is_announced(self) -> bool {
        !matches!(self, Self::Shutdown)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Exit,
    Closed,
    Error,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Exit => "exit",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// One live conversation with the remote model
#[async_trait]
pub trait CallSession: Send {
    /// Hub subscriber that forwards microphone audio into the call
    fn audio_input(&self) -> Subscriber;

    /// End the call and release its resources; idempotent
    async fn close(&mut self);
}

/// Opens call sessions
pub trait CallConnector: Send + Sync {
    /// Start a session that plays replies into `playback` and reports
    /// lifecycle changes through `events`
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be started
    fn open(&self, playback: Arc<PlaybackBuffer>, events: EventSender) -> Result<Box<dyn CallSession>>;
}

struct ActiveCall {
    session: Box<dyn CallSession>,
    token: SubscriptionToken,
}

/// Builder for [`Daemon`]
pub struct DaemonBuilder {
    capture: Option<Box<dyn CaptureDevice>>,
    playback: Option<Box<dyn PlaybackDevice>>,
    recognizer: Option<Box<dyn RecognizerLoader>>,
    connector: Option<Box<dyn CallConnector>>,
    policy: ConfirmationPolicy,
    playback_capacity: usize,
}

impl Default for DaemonBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonBuilder {
    /// Create a builder with default confirmation policy
    #[must_use]
    pub fn new() -> Self {
        Self {
            capture: None,
            playback: None,
            recognizer: None,
            connector: None,
            policy: ConfirmationPolicy::default(),
            playback_capacity: PLAYBACK_QUEUE_CAPACITY,
        }
    }

    /// Microphone feeding the audio hub
    #[must_use]
    pub fn capture(mut self, capture: impl CaptureDevice + 'static) -> Self {
        self.capture = Some(Box::new(capture));
        self
    }

    /// Speaker draining the playback buffer
    #[must_use]
    pub fn playback(mut self, playback: impl PlaybackDevice + 'static) -> Self {
        self.playback = Some(Box::new(playback));
        self
    }

    /// Speech recognizer backend for the wake engine
    #[must_use]
    pub fn recognizer(mut self, loader: impl RecognizerLoader + 'static) -> Self {
        self.recognizer = Some(Box::new(loader));
        self
    }

    /// Connector used to open each call
    #[must_use]
    pub fn connector(mut self, connector: impl CallConnector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Wake/exit confirmation policy
    #[must_use]
    pub fn policy(mut self, policy: ConfirmationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Playback buffer capacity in chunks
    #[must_use]
    pub fn playback_capacity(mut self, capacity: usize) -> Self {
        self.playback_capacity = capacity;
        self
    }

    /// Build the daemon
    ///
    /// Without a recognizer the wake engine stays disabled.
    ///
    /// # Errors
    ///
    /// Returns error if capture, playback or connector is missing
    pub fn build(self) -> Result<Daemon> {
        let capture = self
            .capture
            .ok_or_else(|| Error::Config("capture device required".to_string()))?;
        let playback_device = self
            .playback
            .ok_or_else(|| Error::Config("playback device required".to_string()))?;
        let connector = self
            .connector
            .ok_or_else(|| Error::Config("call connector required".to_string()))?;
        let recognizer = self
            .recognizer
            .unwrap_or_else(|| Box::new(UnavailableRecognizer));

        let (events_tx, events_rx) = events::channel();
        let wake = WakeEngine::new(&self.policy, recognizer, events_tx.clone());

        Ok(Daemon {
            capture,
            playback_device,
            connector,
            hub: Arc::new(AudioHub::new()),
            playback: Arc::new(PlaybackBuffer::new(self.playback_capacity)),
            wake,
            events_tx,
            events_rx,
            state: SessionState::Shutdown,
            call: None,
            call_stopping: false,
            stop: false,
            wake_token: None,
            state_listeners: Vec::new(),
        })
    }
}

/// The voice call daemon
pub struct Daemon {
    capture: Box<dyn CaptureDevice>,
    playback_device: Box<dyn PlaybackDevice>,
    connector: Box<dyn CallConnector>,
    hub: Arc<AudioHub>,
    playback: Arc<PlaybackBuffer>,
    wake: WakeEngine,
    events_tx: EventSender,
    events_rx: EventReceiver,
    state: SessionState,
    call: Option<ActiveCall>,
    call_stopping: bool,
    stop: bool,
    wake_token: Option<SubscriptionToken>,
    state_listeners: Vec<mpsc::UnboundedSender<SessionState>>,
}

impl Daemon {
    /// Start building a daemon
    #[must_use]
    pub fn builder() -> DaemonBuilder {
        DaemonBuilder::new()
    }

    /// Handle for posting events, e.g. `app.stop` from a signal handler
    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current wake engine mode
    #[must_use]
    pub fn wake_mode(&self) -> RunMode {
        self.wake.mode()
    }

    /// Whether the wake engine is accepting audio
    #[must_use]
    pub fn wake_enabled(&self) -> bool {
        self.wake.is_enabled()
    }

    /// Audio hub fed by the capture device
    #[must_use]
    pub fn hub(&self) -> Arc<AudioHub> {
        Arc::clone(&self.hub)
    }

    /// Shared playback buffer
    #[must_use]
    pub fn playback_buffer(&self) -> Arc<PlaybackBuffer> {
        Arc::clone(&self.playback)
    }

    /// Receive every state the daemon enters from now on
    pub fn watch_states(&mut self) -> mpsc::UnboundedReceiver<SessionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state_listeners.push(tx);
        rx
    }

    /// Run until an `app.stop` event arrives
    ///
    /// # Errors
    ///
    /// Returns error if an audio device fails to start
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self) -> Result<()> {
        self.startup()?;
        tracing::info!("daemon running");

        while !self.stop {
            match tokio::time::timeout(POLL_INTERVAL, self.events_rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event).await,
                Ok(None) => break,
                Err(_) => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn startup(&mut self) -> Result<()> {
        self.stop = false;
        self.playback.clear();

        self.playback_device.start(Arc::clone(&self.playback))?;

        let hub = Arc::clone(&self.hub);
        if let Err(e) = self
            .capture
            .start(Box::new(move |chunk| hub.dispatch(&chunk)))
        {
            self.playback_device.stop();
            return Err(e);
        }

        self.wake.start();
        self.wake_token = Some(self.hub.subscribe(self.wake.audio_input()));
        self.wake.set_mode(RunMode::Idle);

        if !self.wake.is_enabled() {
            tracing::warn!("wake phrase detection unavailable; calls cannot be started by voice");
        }

        self.set_state(SessionState::IdleListening);
        Ok(())
    }

    #[allow(clippy::future_not_send)]
    async fn handle_event(&mut self, event: Event) {
        tracing::debug!(event = %event.kind, state = %self.state, "handling event");

        match (self.state, event.kind) {
            (_, EventKind::AppStop) => {
                tracing::info!("stop requested");
                self.stop = true;
            }
            (SessionState::IdleListening, EventKind::WakeDetected) => {
                tracing::info!(text = ?event.payload.get("text"), "wake phrase detected");
                self.open_call();
            }
            (SessionState::Connecting, EventKind::RealtimeReady) => {
                self.wake.set_mode(RunMode::InCall);
                self.set_state(SessionState::InCall);
            }
            (SessionState::InCall, EventKind::ExitDetected) => {
                tracing::info!(text = ?event.payload.get("text"), "exit phrase detected");
                self.teardown(StopReason::Exit).await;
            }
            (SessionState::Connecting | SessionState::InCall, kind) if kind.is_call_failure() => {
                tracing::warn!(event = %event.kind, payload = ?event.payload, "call ended unexpectedly");
                let reason = if event.kind == EventKind::RealtimeError {
                    StopReason::Error
                } else {
                    StopReason::Closed
                };
                self.teardown(reason).await;
            }
            (_, EventKind::RealtimeResponse) => {
                tracing::debug!(kind = ?event.payload.get("type"), "realtime response event");
            }
            (state, kind) => {
                tracing::debug!(%state, event = %kind, "ignoring event");
            }
        }
    }

    fn open_call(&mut self) {
        self.set_state(SessionState::Connecting);

        match self
            .connector
            .open(Arc::clone(&self.playback), self.events_tx.clone())
        {
            Ok(session) => {
                let token = self.hub.subscribe(session.audio_input());
                self.call = Some(ActiveCall { session, token });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to open call");
                self.events_tx
                    .post(EventKind::RealtimeError, json!({ "error": e.to_string() }));
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn teardown(&mut self, reason: StopReason) {
        if self.call_stopping {
            return;
        }
        let forced = reason == StopReason::Shutdown;
        if !forced && !matches!(self.state, SessionState::Connecting | SessionState::InCall) {
            return;
        }

        self.call_stopping = true;
        if !forced {
            self.set_state(SessionState::Stopping);
        }
        tracing::info!(%reason, "ending call");

        self.wake.set_mode(RunMode::Idle);
        if let Some(mut call) = self.call.take() {
            self.hub.unsubscribe(call.token);
            call.session.close().await;
        }
        self.playback.clear();

        self.call_stopping = false;
        if !forced {
            self.set_state(SessionState::IdleListening);
        }
    }

    #[allow(clippy::future_not_send)]
    async fn shutdown(&mut self) {
        self.set_state(SessionState::Shutdown);
        self.teardown(StopReason::Shutdown).await;

        if let Some(token) = self.wake_token.take() {
            self.hub.unsubscribe(token);
        }
        self.wake.stop().await;
        self.capture.stop();
        self.playback_device.stop();

        tracing::info!("daemon stopped");
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        if state.is_announced() {
            println!("STATE={state}");
        }
        tracing::info!(%state, "session state");
        self.state_listeners.retain(|tx| tx.send(state).is_ok());
    }
}
