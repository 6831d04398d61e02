//! Beacon Call - hands-free voice calls with a realtime AI model
//!
//! This library provides the core functionality for the call daemon:
//! - Microphone capture fanned out to several consumers
//! - Offline wake/exit phrase confirmation
//! - A duplex realtime speech session over websocket
//! - Jitter-tolerant playback of the model's replies
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   chunks   ┌──────────────┐
//! │  MicCapture  ├───────────►│   AudioHub   │
//! └──────────────┘            └──┬────────┬──┘
//!                                │        │
//!                  ┌─────────────▼─┐    ┌─▼──────────────┐
//!                  │  WakeEngine   │    │ RealtimeClient │◄──► websocket
//!                  └──────┬────────┘    └─┬────────┬─────┘
//!                         │ wake/exit     │ ready/ │ audio deltas
//!                         │               │ closed │
//!                  ┌──────▼───────────────▼─┐   ┌──▼─────────────┐
//!                  │   Daemon (event loop)  │   │ PlaybackBuffer │
//!                  └────────────────────────┘   └──┬─────────────┘
//!                                                  │ frames
//!                                           ┌──────▼───────┐
//!                                           │ SpeakerOutput│
//!                                           └──────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod realtime;
pub mod voice;

pub use config::Config;
pub use daemon::{CallConnector, CallSession, Daemon, DaemonBuilder, SessionState};
pub use error::{Error, Result};
pub use events::{Event, EventKind, EventSender};
pub use realtime::{RealtimeClient, RealtimeConnector, SessionPhase};
