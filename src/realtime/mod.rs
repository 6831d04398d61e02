//! Realtime speech-to-speech session
//!
//! Streams microphone PCM to a hosted realtime model over a websocket and
//! plays the spoken reply through the [`PlaybackBuffer`]. Turn-taking is left
//! to the server's voice activity detection.

mod client;
pub mod protocol;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use client::{RealtimeClient, SEND_QUEUE_CAPACITY};

use crate::Result;
use crate::config::RealtimeConfig;
use crate::daemon::{CallConnector, CallSession};
use crate::events::EventSender;
use crate::voice::{PlaybackBuffer, Subscriber};

/// Connection phase of a [`RealtimeClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Not started
    #[default]
    Disconnected,
    /// Opening the websocket
    Connecting,
    /// Connected, waiting for the session to be created
    Negotiating,
    /// Session configured; audio flows both ways
    Streaming,
    /// Connection ended
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Negotiating => "negotiating",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[async_trait]
impl CallSession for RealtimeClient {
    fn audio_input(&self) -> Subscriber {
        Self::audio_input(self)
    }

    async fn close(&mut self) {
        Self::close(self).await;
    }
}

/// Opens a [`RealtimeClient`] per call
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    config: RealtimeConfig,
    sample_rate: u32,
}

impl RealtimeConnector {
    /// Create a connector for sessions at `sample_rate`
    #[must_use]
    pub const fn new(config: RealtimeConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
        }
    }
}

impl CallConnector for RealtimeConnector {
    fn open(&self, playback: Arc<PlaybackBuffer>, events: EventSender) -> Result<Box<dyn CallSession>> {
        let mut client =
            RealtimeClient::new(self.config.clone(), self.sample_rate, playback, events);
        client.start()?;
        Ok(Box::new(client))
    }
}
