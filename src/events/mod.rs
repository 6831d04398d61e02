//! Session events
//!
//! Every component reports intents and lifecycle changes by posting an [`Event`]
//! into one FIFO queue. The daemon is the only consumer, so all session state
//! transitions are totally ordered.
//!
//! Posting never blocks: it is safe from audio callbacks, blocking workers and
//! async tasks alike. Intent and lifecycle events are never dropped while the
//! consumer is alive; diagnostic events are capped at
//! [`DIAGNOSTIC_CAPACITY`] pending entries and dropped beyond that. Create the
//! queue with [`channel`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Maximum diagnostic events waiting in the queue
pub const DIAGNOSTIC_CAPACITY: usize = 1024;

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Wake phrase confirmed while idle
    #[serde(rename = "wake.detected")]
    WakeDetected,
    /// Exit phrase confirmed while in a call
    #[serde(rename = "exit.detected")]
    ExitDetected,
    /// Realtime session negotiated and accepting audio
    #[serde(rename = "realtime.ready")]
    RealtimeReady,
    /// Realtime connection closed by the remote end
    #[serde(rename = "realtime.closed")]
    RealtimeClosed,
    /// Realtime connection failed
    #[serde(rename = "realtime.error")]
    RealtimeError,
    /// Diagnostic: a `response.*` server event was observed
    #[serde(rename = "realtime.response_event")]
    RealtimeResponse,
    /// Process shutdown requested
    #[serde(rename = "app.stop")]
    AppStop,
}

impl EventKind {
    /// Wire tag of this event kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WakeDetected => "wake.detected",
            Self::ExitDetected => "exit.detected",
            Self::RealtimeReady => "realtime.ready",
            Self::RealtimeClosed => "realtime.closed",
            Self::RealtimeError => "realtime.error",
            Self::RealtimeResponse => "realtime.response_event",
            Self::AppStop => "app.stop",
        }
    }

    /// Whether this event ends an active call
    #[must_use]
    pub const fn is_call_failure(self) -> bool {
        matches!(self, Self::RealtimeClosed | Self::RealtimeError)
    }

    /// Whether this event is informational only and may be dropped under load
    #[must_use]
    pub const fn is_diagnostic(self) -> bool {
        matches!(self, Self::RealtimeResponse)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event consumed by the daemon
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Event type tag
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Arbitrary event payload
    pub payload: Map<String, Value>,
    /// Time the event was posted
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event with an empty payload
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self::with_payload(kind, Value::Null)
    }

    /// Create an event carrying a payload
    ///
    /// Non-object payloads are stored under a `value` key.
    #[must_use]
    pub fn with_payload(kind: EventKind, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Receiving half of the event queue, owned by the daemon
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    diagnostics: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Event> {
        let event = self.rx.recv().await?;
        self.release(&event);
        Some(event)
    }

    /// Take the next event if one is queued
    ///
    /// # Errors
    ///
    /// Returns error if the queue is empty or disconnected
    pub fn try_recv(&mut self) -> Result<Event, mpsc::error::TryRecvError> {
        let event = self.rx.try_recv()?;
        self.release(&event);
        Ok(event)
    }

    fn release(&self, event: &Event) {
        if event.kind.is_diagnostic() {
            self.diagnostics.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Cloneable, non-blocking handle for posting events
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
    diagnostics: Arc<AtomicUsize>,
}

impl EventSender {
    /// Post an event with a payload
    ///
    /// Returns false if the event was dropped (queue full or consumer gone).
    pub fn post(&self, kind: EventKind, payload: Value) -> bool {
        self.send(Event::with_payload(kind, payload))
    }

    /// Post an event without payload
    pub fn post_kind(&self, kind: EventKind) -> bool {
        self.send(Event::new(kind))
    }

    /// Post a prepared event
    ///
    /// Returns false if the consumer is gone, or for a diagnostic event when
    /// too many are already pending.
    pub fn send(&self, event: Event) -> bool {
        let diagnostic = event.kind.is_diagnostic();
        if diagnostic
            && self
                .diagnostics
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < DIAGNOSTIC_CAPACITY).then_some(n + 1)
                })
                .is_err()
        {
            tracing::warn!(event = %event.kind, "diagnostic backlog full, dropping event");
            return false;
        }

        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                if diagnostic {
                    self.diagnostics.fetch_sub(1, Ordering::AcqRel);
                }
                tracing::debug!(event = %event.kind, "event queue closed, dropping event");
                false
            }
        }
    }
}

/// Create the session event queue
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let diagnostics = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            tx,
            diagnostics: Arc::clone(&diagnostics),
        },
        EventReceiver { rx, diagnostics },
    )
}
