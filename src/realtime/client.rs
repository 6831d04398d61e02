//! Realtime duplex session client
//!
//! One client owns one websocket session. A receive task opens the connection
//! and reacts to server events; a send task owns the write half and streams
//! microphone audio once the session is configured. Both observe a shared
//! stop signal and are joined with a bounded timeout on close.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::SessionPhase;
use super::protocol::{ClientMessage, ServerEvent, decode_audio};
use crate::config::RealtimeConfig;
use crate::events::{EventKind, EventSender};
use crate::voice::{AudioChunk, PlaybackBuffer, Subscriber};
use crate::{Error, Result};

/// Capacity of the outbound microphone queue
pub const SEND_QUEUE_CAPACITY: usize = 1024;

/// Maximum wait for each task on close
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Control traffic for the send task, always sent ahead of audio
#[derive(Debug)]
pub(super) enum Outbound {
    Message(ClientMessage),
    Close,
}

/// State shared by the client handle and its tasks
pub(super) struct Session {
    config: RealtimeConfig,
    sample_rate: u32,
    playback: Arc<PlaybackBuffer>,
    events: EventSender,
    phase: watch::Sender<SessionPhase>,
    control: mpsc::UnboundedSender<Outbound>,
    closing: AtomicBool,
}

impl Session {
    pub(super) fn new(
        config: RealtimeConfig,
        sample_rate: u32,
        playback: Arc<PlaybackBuffer>,
        events: EventSender,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(SessionPhase::Disconnected);

        let session = Self {
            config,
            sample_rate,
            playback,
            events,
            phase,
            control,
            closing: AtomicBool::new(false),
        };
        (session, control_rx)
    }

    pub(super) fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub(super) fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = %previous, to = %phase, "realtime phase changed");
        }
    }

    fn queue(&self, message: ClientMessage) {
        if self.control.send(Outbound::Message(message)).is_err() {
            tracing::debug!("send task gone, dropping control message");
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// React to one server event
    pub(super) fn on_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated => {
                if self.phase() != SessionPhase::Negotiating {
                    tracing::debug!(phase = %self.phase(), "ignoring session.created");
                    return;
                }
                self.queue(ClientMessage::session_update(
                    &self.config.model,
                    &self.config.voice,
                    self.sample_rate,
                    &self.config.instructions,
                ));
                self.set_phase(SessionPhase::Streaming);
                tracing::info!(model = %self.config.model, "realtime session ready");
                self.events
                    .post(EventKind::RealtimeReady, json!({ "model": self.config.model }));
            }
            ServerEvent::SpeechStarted => {
                tracing::debug!("speech started, clearing playback");
                self.playback.clear();
            }
            ServerEvent::SpeechStopped => {
                tracing::debug!("speech stopped, requesting response");
                self.queue(ClientMessage::InputAudioCommit);
                self.queue(ClientMessage::response_create());
            }
            ServerEvent::AudioDelta(b64) => match decode_audio(&b64) {
                Ok(pcm) => {
                    tracing::trace!(bytes = pcm.len(), "audio delta");
                    self.playback.enqueue(pcm);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode audio delta");
                }
            },
            ServerEvent::Response(kind) => {
                tracing::trace!(event = %kind, "response event");
                self.events
                    .post(EventKind::RealtimeResponse, json!({ "type": kind }));
            }
            ServerEvent::Other(kind) => {
                tracing::trace!(event = %kind, "ignoring server event");
            }
        }
    }

    fn on_text(&self, text: &str) {
        match ServerEvent::parse(text) {
            Ok(event) => self.on_server_event(event),
            Err(e) => tracing::debug!(error = %e, "ignoring non-JSON frame"),
        }
    }

    fn report_error(&self, error: &str) {
        if self.is_closing() {
            tracing::debug!(error, "realtime error after close");
            return;
        }
        tracing::error!(error, "realtime connection failed");
        self.events
            .post(EventKind::RealtimeError, json!({ "error": error }));
    }

    fn report_closed(&self, code: Option<u16>, message: &str) {
        if self.is_closing() {
            return;
        }
        tracing::info!(code, message, "realtime connection closed by remote");
        self.events.post(
            EventKind::RealtimeClosed,
            json!({ "code": code, "message": message }),
        );
    }
}

/// Client for one realtime speech-to-speech session
pub struct RealtimeClient {
    session: Arc<Session>,
    stop_tx: watch::Sender<bool>,
    audio_tx: mpsc::Sender<AudioChunk>,
    pending: Option<Pending>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Receivers handed to the tasks on start
struct Pending {
    audio_rx: mpsc::Receiver<AudioChunk>,
    control_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl RealtimeClient {
    /// Create a client; no connection is made until [`Self::start`]
    #[must_use]
    pub fn new(
        config: RealtimeConfig,
        sample_rate: u32,
        playback: Arc<PlaybackBuffer>,
        events: EventSender,
    ) -> Self {
        let (session, control_rx) = Session::new(config, sample_rate, playback, events);
        let (audio_tx, audio_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        Self {
            session: Arc::new(session),
            stop_tx,
            audio_tx,
            pending: Some(Pending {
                audio_rx,
                control_rx,
            }),
            tasks: Vec::new(),
            closed: false,
        }
    }

    /// Current connection phase
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Subscribe to phase changes
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.session.phase.subscribe()
    }

    /// Spawn the receive and send tasks
    ///
    /// Calling this on a running client has no effect.
    ///
    /// # Errors
    ///
    /// Returns error if no tokio runtime is available or the client was closed
    pub fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Realtime("client already closed".to_string()));
        }
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.pending = Some(pending);
                return Err(Error::Realtime(format!("no async runtime: {e}")));
            }
        };

        let (sink_tx, sink_rx) = oneshot::channel();

        self.tasks.push(runtime.spawn(receive_loop(
            Arc::clone(&self.session),
            sink_tx,
            self.stop_tx.subscribe(),
        )));
        self.tasks.push(runtime.spawn(send_loop(
            Arc::clone(&self.session),
            sink_rx,
            pending.control_rx,
            pending.audio_rx,
            self.stop_tx.subscribe(),
        )));

        Ok(())
    }

    /// Queue microphone audio for the session
    ///
    /// Never blocks; drops the chunk when the queue is full.
    pub fn send_audio(&self, chunk: AudioChunk) {
        enqueue_audio(&self.audio_tx, chunk);
    }

    /// Hub subscriber forwarding captured audio to this session
    #[must_use]
    pub fn audio_input(&self) -> Subscriber {
        let tx = self.audio_tx.clone();
        Arc::new(move |chunk| {
            enqueue_audio(&tx, chunk);
            Ok(())
        })
    }

    /// Close the session and join both tasks
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.closing.store(true, Ordering::Release);

        // Close frame goes out before the stop signal so the send task sees it
        let _ = self.session.control.send(Outbound::Close);
        self.stop_tx.send_replace(true);

        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                tracing::warn!("realtime task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.session.set_phase(SessionPhase::Closed);
        tracing::info!("realtime session closed");
    }
}

fn enqueue_audio(tx: &mpsc::Sender<AudioChunk>, chunk: AudioChunk) {
    match tx.try_send(chunk) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("realtime send queue full, dropping audio chunk");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::trace!("realtime send task gone, dropping audio chunk");
        }
    }
}

/// Resolve once the stop flag is set or the client is dropped
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Endpoint URL with the model added as a query parameter
///
/// Existing query parameters are kept; a `model` already present is replaced.
fn session_url(base: &str, model: &str) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| Error::Realtime(format!("invalid realtime url: {e}")))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "model")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("model", model);

    Ok(url)
}

async fn connect(config: &RealtimeConfig) -> Result<WsStream> {
    let url = session_url(&config.url, &config.model)?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Realtime(format!("invalid realtime url: {e}")))?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", config.api_key)
            .parse()
            .map_err(|e| Error::Realtime(format!("invalid auth header: {e}")))?,
    );

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::Realtime(e.to_string()))?;

    Ok(stream)
}

async fn receive_loop(
    session: Arc<Session>,
    sink_tx: oneshot::Sender<WsSink>,
    mut stop: watch::Receiver<bool>,
) {
    session.set_phase(SessionPhase::Connecting);
    tracing::info!(url = %session.config.url, model = %session.config.model, "connecting to realtime service");

    let result = tokio::select! {
        biased;
        () = stopped(&mut stop) => return,
        result = connect(&session.config) => result,
    };

    let stream = match result {
        Ok(stream) => stream,
        Err(e) => {
            session.report_error(&e.to_string());
            session.set_phase(SessionPhase::Closed);
            return;
        }
    };

    let (sink, mut stream) = stream.split();
    if sink_tx.send(sink).is_err() {
        return;
    }
    session.set_phase(SessionPhase::Negotiating);
    tracing::debug!("realtime connected, awaiting session");

    loop {
        let frame = tokio::select! {
            biased;
            () = stopped(&mut stop) => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => session.on_text(text.as_str()),
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                });
                session.report_closed(code, &reason);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                session.report_error(&e.to_string());
                break;
            }
            None => {
                session.report_closed(None, "stream ended");
                break;
            }
        }
    }

    session.set_phase(SessionPhase::Closed);
}

async fn send_loop(
    session: Arc<Session>,
    sink_rx: oneshot::Receiver<WsSink>,
    mut control_rx: mpsc::UnboundedReceiver<Outbound>,
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    mut stop: watch::Receiver<bool>,
) {
    let mut sink = tokio::select! {
        biased;
        () = stopped(&mut stop) => return,
        sink = sink_rx => match sink {
            Ok(sink) => sink,
            // Connect failed
            Err(_) => return,
        },
    };

    loop {
        tokio::select! {
            biased;
            Some(out) = control_rx.recv() => {
                if !send_outbound(&mut sink, out).await {
                    break;
                }
            }
            () = stopped(&mut stop) => break,
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else { break };

                // Flush control traffic queued while this chunk was taken
                let mut open = true;
                while let Ok(out) = control_rx.try_recv() {
                    if !send_outbound(&mut sink, out).await {
                        open = false;
                        break;
                    }
                }
                if !open {
                    break;
                }

                if session.phase() != SessionPhase::Streaming {
                    tracing::trace!("session not negotiated, discarding audio chunk");
                    continue;
                }
                send_message(&mut sink, &ClientMessage::audio_append(&chunk)).await;
            }
        }
    }

    tracing::debug!("realtime send task stopped");
}

/// Returns false once the close frame has been sent
async fn send_outbound(sink: &mut WsSink, out: Outbound) -> bool {
    match out {
        Outbound::Message(message) => {
            send_message(sink, &message).await;
            true
        }
        Outbound::Close => {
            if let Err(e) = sink.send(Message::Close(None)).await {
                tracing::debug!(error = %e, "failed to send close frame");
            }
            false
        }
    }
}

async fn send_message(sink: &mut WsSink, message: &ClientMessage) {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, kind = message.type_name(), "failed to encode message");
            return;
        }
    };

    if let Err(e) = sink.send(Message::text(text)).await {
        tracing::warn!(error = %e, kind = message.type_name(), "websocket send failed");
    }
}
