//! Daemon integration tests
//!
//! Drives the session state machine through its event queue with fake
//! devices and a fake call connector

use std::time::Duration;

use beacon_call::voice::{ConfirmationPolicy, RunMode};
use beacon_call::{Daemon, EventKind, SessionState};
use serde_json::json;

mod common;
use common::{
    BrokenCapture, FakeCapture, FakeConnector, FakePlayback, ScriptedLoader, chunk, next_state,
};

fn daemon(capture: &FakeCapture, connector: &FakeConnector) -> Daemon {
    Daemon::builder()
        .capture(capture.clone())
        .playback(FakePlayback::default())
        .connector(connector.clone())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_call_lifecycle() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let stats = connector.stats();
    let mut daemon = daemon(&capture, &connector);
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);

        events.post(EventKind::WakeDetected, json!({ "text": "hello" }));
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);

        events.post_kind(EventKind::RealtimeReady);
        assert_eq!(next_state(&mut states).await, SessionState::InCall);

        events.post(EventKind::ExitDetected, json!({ "text": "bye" }));
        assert_eq!(next_state(&mut states).await, SessionState::Stopping);
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);

        events.post_kind(EventKind::AppStop);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 1);
    assert_eq!(daemon.state(), SessionState::Shutdown);
    assert_eq!(daemon.wake_mode(), RunMode::Idle);
    assert_eq!(capture.starts(), 1);
    assert_eq!(capture.stops(), 1);
}

#[tokio::test]
async fn test_teardown_runs_once() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let stats = connector.stats();
    let mut daemon = daemon(&capture, &connector);
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        events.post_kind(EventKind::WakeDetected);
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);
        events.post_kind(EventKind::RealtimeReady);
        assert_eq!(next_state(&mut states).await, SessionState::InCall);

        // Several call-ending events at once
        events.post(EventKind::RealtimeClosed, json!({ "code": 1006 }));
        events.post(EventKind::RealtimeError, json!({ "error": "reset" }));
        events.post_kind(EventKind::ExitDetected);
        events.post_kind(EventKind::AppStop);

        assert_eq!(next_state(&mut states).await, SessionState::Stopping);
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 1);
}

#[tokio::test]
async fn test_error_while_connecting_never_enters_call() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let stats = connector.stats();
    let mut daemon = daemon(&capture, &connector);
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        events.post_kind(EventKind::WakeDetected);
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);

        events.post(EventKind::RealtimeError, json!({ "error": "handshake failed" }));
        assert_eq!(next_state(&mut states).await, SessionState::Stopping);
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);

        // A late ready from the failed session is ignored
        events.post_kind(EventKind::RealtimeReady);
        events.post_kind(EventKind::AppStop);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 1);
    assert_eq!(daemon.wake_mode(), RunMode::Idle);
}

#[tokio::test]
async fn test_open_failure_returns_to_idle() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::failing();
    let stats = connector.stats();
    let mut daemon = daemon(&capture, &connector);
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        events.post_kind(EventKind::WakeDetected);
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);
        assert_eq!(next_state(&mut states).await, SessionState::Stopping);
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        events.post_kind(EventKind::AppStop);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 0);
}

#[tokio::test]
async fn test_unmatched_events_ignored() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let stats = connector.stats();
    let mut daemon = daemon(&capture, &connector);
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        events.post_kind(EventKind::ExitDetected);
        events.post_kind(EventKind::RealtimeReady);
        events.post_kind(EventKind::RealtimeClosed);
        events.post(EventKind::RealtimeResponse, json!({ "type": "response.done" }));
        events.post_kind(EventKind::AppStop);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(stats.opens(), 0);
}

#[tokio::test]
async fn test_call_audio_routing() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let stats = connector.stats();
    let mut daemon = daemon(&capture, &connector);
    let hub = daemon.hub();
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        assert!(capture.push(chunk(1, 960)));
        assert_eq!(stats.chunks(), 0);

        events.post_kind(EventKind::WakeDetected);
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);
        assert!(capture.push(chunk(2, 960)));
        assert!(capture.push(chunk(3, 960)));
        assert_eq!(stats.chunks(), 2);

        events.post_kind(EventKind::RealtimeReady);
        assert_eq!(next_state(&mut states).await, SessionState::InCall);
        events.post_kind(EventKind::ExitDetected);
        assert_eq!(next_state(&mut states).await, SessionState::Stopping);
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);

        // The call's feed is gone; only the wake engine remains
        assert!(capture.push(chunk(4, 960)));
        assert_eq!(stats.chunks(), 2);
        assert_eq!(hub.subscriber_count(), 1);

        events.post_kind(EventKind::AppStop);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(hub.subscriber_count(), 0);
    assert!(!capture.push(chunk(5, 960)));
}

#[tokio::test]
async fn test_teardown_clears_playback() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let mut daemon = daemon(&capture, &connector);
    let playback = daemon.playback_buffer();
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        events.post_kind(EventKind::WakeDetected);
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);
        events.post_kind(EventKind::RealtimeReady);
        assert_eq!(next_state(&mut states).await, SessionState::InCall);

        assert!(playback.enqueue(vec![7; 480]));
        events.post(EventKind::RealtimeClosed, json!({ "code": 1000 }));
        assert_eq!(next_state(&mut states).await, SessionState::Stopping);
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        assert!(playback.is_empty());

        events.post_kind(EventKind::AppStop);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();
}

#[tokio::test]
async fn test_shutdown_during_call() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let stats = connector.stats();
    let playback = FakePlayback::default();
    let mut daemon = Daemon::builder()
        .capture(capture.clone())
        .playback(playback.clone())
        .connector(connector.clone())
        .build()
        .unwrap();
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);
        events.post_kind(EventKind::WakeDetected);
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);
        events.post_kind(EventKind::RealtimeReady);
        assert_eq!(next_state(&mut states).await, SessionState::InCall);

        events.post_kind(EventKind::AppStop);
        // Forced teardown skips STOPPING
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(stats.closes(), 1);
    assert_eq!(playback.stops(), 1);
    assert!(playback.source().is_some());
    assert!(states.try_recv().is_err());
}

#[tokio::test]
async fn test_startup_fails_without_capture_device() {
    let playback = FakePlayback::default();
    let mut daemon = Daemon::builder()
        .capture(BrokenCapture)
        .playback(playback.clone())
        .connector(FakeConnector::default())
        .build()
        .unwrap();

    assert!(daemon.run().await.is_err());
    assert_eq!(playback.stops(), 1);
}

#[tokio::test]
async fn test_voice_driven_call() {
    let capture = FakeCapture::default();
    let connector = FakeConnector::default();
    let stats = connector.stats();
    let recognizer = ScriptedLoader::default();
    let policy = ConfirmationPolicy {
        wake_phrase: "hello gpt".to_string(),
        exit_phrase: "goodbye gpt".to_string(),
        cooldown: Duration::ZERO,
        consecutive_finals: 2,
    };
    let mut daemon = Daemon::builder()
        .capture(capture.clone())
        .playback(FakePlayback::default())
        .connector(connector.clone())
        .recognizer(recognizer.clone())
        .policy(policy)
        .build()
        .unwrap();
    let events = daemon.event_sender();
    let mut states = daemon.watch_states();

    let driver = async {
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);

        recognizer.final_text("Hello GPT");
        recognizer.final_text("hello  gpt, are you there");
        capture.push(chunk(0, 960));
        capture.push(chunk(0, 960));
        assert_eq!(next_state(&mut states).await, SessionState::Connecting);

        events.post_kind(EventKind::RealtimeReady);
        assert_eq!(next_state(&mut states).await, SessionState::InCall);

        recognizer.final_text("goodbye gpt");
        recognizer.final_text("ok goodbye GPT");
        capture.push(chunk(0, 960));
        capture.push(chunk(0, 960));
        assert_eq!(next_state(&mut states).await, SessionState::Stopping);
        assert_eq!(next_state(&mut states).await, SessionState::IdleListening);

        events.post_kind(EventKind::AppStop);
        assert_eq!(next_state(&mut states).await, SessionState::Shutdown);
    };

    let (result, ()) = tokio::join!(daemon.run(), driver);
    result.unwrap();

    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 1);
    assert_eq!(recognizer.remaining(), 0);
}
