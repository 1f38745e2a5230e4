//! Recognition loop integration tests
//!
//! A scripted recognizer hands out sessions that replay canned events, so
//! restart behavior can be observed without a real speech engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use lily_conductor::recognition::{
    ListeningSession, RecognitionConfig, RecognitionError, RecognitionEvent, RecognitionHandle,
    RecognitionLoop, RecognitionState, SpeechRecognizer, WakeEvent,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Scripted Recognizer
// =============================================================================

enum SessionEnd {
    /// Keep the session open after the scripted events
    Hang,
    /// End the event stream after the scripted events
    Close,
}

struct Script {
    events: Vec<RecognitionEvent>,
    end: SessionEnd,
}

#[derive(Default)]
struct Shared {
    active: AtomicUsize,
    max_active: AtomicUsize,
    teardown: Mutex<Vec<&'static str>>,
}

struct ScriptedRecognizer {
    start_failures: AtomicUsize,
    scripts: Mutex<VecDeque<Script>>,
    shared: Arc<Shared>,
}

impl ScriptedRecognizer {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            start_failures: AtomicUsize::new(0),
            scripts: Mutex::new(scripts.into()),
            shared: Arc::new(Shared::default()),
        })
    }

    fn failing_starts(self: Arc<Self>, count: usize) -> Arc<Self> {
        self.start_failures.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start_session(&self) -> Result<Box<dyn ListeningSession>, RecognitionError> {
        let failures = self.start_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.start_failures.store(failures - 1, Ordering::SeqCst);
            return Err(RecognitionError::StartFailed("busy".to_string()));
        }

        let script = self.scripts.lock().pop_front().unwrap_or(Script {
            events: Vec::new(),
            end: SessionEnd::Hang,
        });

        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(ScriptedSession {
            events: script.events.into(),
            end: script.end,
            shared: Arc::clone(&self.shared),
            released: false,
        }))
    }
}

struct ScriptedSession {
    events: VecDeque<RecognitionEvent>,
    end: SessionEnd,
    shared: Arc<Shared>,
    released: bool,
}

#[async_trait]
impl ListeningSession for ScriptedSession {
    async fn next_event(&mut self) -> Option<RecognitionEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        match self.end {
            SessionEnd::Hang => std::future::pending().await,
            SessionEnd::Close => None,
        }
    }

    fn stop(&mut self) {
        self.shared.teardown.lock().push("stop");
    }

    fn cancel(&mut self) {
        self.shared.teardown.lock().push("cancel");
    }

    fn release(&mut self) {
        self.shared.teardown.lock().push("release");
        if !self.released {
            self.released = true;
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Recognizer whose sessions deliver a final result without ever waiting
#[derive(Default)]
struct InstantRecognizer;

#[async_trait]
impl SpeechRecognizer for InstantRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start_session(&self) -> Result<Box<dyn ListeningSession>, RecognitionError> {
        Ok(Box::new(InstantSession))
    }
}

struct InstantSession;

#[async_trait]
impl ListeningSession for InstantSession {
    async fn next_event(&mut self) -> Option<RecognitionEvent> {
        Some(RecognitionEvent::Final(words("background chatter")))
    }

    fn stop(&mut self) {}

    fn cancel(&mut self) {}

    fn release(&mut self) {}
}

fn words(text: &str) -> Vec<String> {
    vec![text.to_string()]
}

fn script(events: Vec<RecognitionEvent>, end: SessionEnd) -> Script {
    Script { events, end }
}

fn spawn(
    recognizer: Arc<ScriptedRecognizer>,
) -> (RecognitionHandle, mpsc::Receiver<WakeEvent>) {
    let (wake_tx, wake_rx) = mpsc::channel(8);
    let handle = RecognitionLoop::spawn(recognizer, RecognitionConfig::for_testing(), wake_tx);
    (handle, wake_rx)
}

async fn wait_until(handle: &RecognitionHandle, predicate: impl Fn(&RecognitionHandle) -> bool) {
    let mut states = handle.subscribe_state();
    tokio::time::timeout(WAIT, async {
        while !predicate(handle) {
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_error_returns_to_listening_with_fresh_session() {
    let recognizer = ScriptedRecognizer::new(vec![script(
        vec![RecognitionEvent::Error(RecognitionError::Engine(
            "no match".to_string(),
        ))],
        SessionEnd::Hang,
    )]);
    let (handle, _wake) = spawn(recognizer.clone());

    wait_until(&handle, |h| {
        h.sessions_started() == 2 && h.state() == RecognitionState::Listening
    })
    .await;

    assert_eq!(recognizer.shared.active.load(Ordering::SeqCst), 1);
    handle.stop().await;
}

#[tokio::test]
async fn test_failed_starts_are_retried() {
    let recognizer = ScriptedRecognizer::new(Vec::new()).failing_starts(3);
    let (handle, _wake) = spawn(recognizer);

    wait_until(&handle, |h| {
        h.sessions_started() == 1 && h.state() == RecognitionState::Listening
    })
    .await;

    handle.stop().await;
}

#[tokio::test]
async fn test_final_result_wakes_and_restarts() {
    let recognizer = ScriptedRecognizer::new(vec![script(
        vec![RecognitionEvent::Final(vec![
            "Hi".to_string(),
            "Lily, open maps".to_string(),
        ])],
        SessionEnd::Hang,
    )]);
    let (handle, mut wake) = spawn(recognizer);

    let event = tokio::time::timeout(WAIT, wake.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        WakeEvent {
            phrase: "hi lily".to_string(),
            transcript: "hi lily, open maps".to_string(),
        }
    );

    wait_until(&handle, |h| h.sessions_started() == 2).await;
    handle.stop().await;
}

#[tokio::test]
async fn test_partial_result_wakes_without_restart() {
    let recognizer = ScriptedRecognizer::new(vec![script(
        vec![RecognitionEvent::Partial(words("hey lily"))],
        SessionEnd::Hang,
    )]);
    let (handle, mut wake) = spawn(recognizer.clone());

    let event = tokio::time::timeout(WAIT, wake.recv()).await.unwrap().unwrap();
    assert_eq!(event.phrase, "hey lily");

    wait_until(&handle, |h| h.state() == RecognitionState::Listening).await;
    assert_eq!(handle.sessions_started(), 1);
    assert!(recognizer.shared.teardown.lock().is_empty());

    handle.stop().await;
}

#[tokio::test]
async fn test_other_speech_does_not_wake() {
    let recognizer = ScriptedRecognizer::new(vec![script(
        vec![RecognitionEvent::Final(words("hello there"))],
        SessionEnd::Hang,
    )]);
    let (handle, mut wake) = spawn(recognizer);

    wait_until(&handle, |h| h.sessions_started() == 2).await;
    assert!(wake.try_recv().is_err());

    handle.stop().await;
}

#[tokio::test]
async fn test_ended_stream_restarts() {
    let recognizer = ScriptedRecognizer::new(vec![
        script(Vec::new(), SessionEnd::Close),
        script(Vec::new(), SessionEnd::Close),
    ]);
    let (handle, _wake) = spawn(recognizer);

    wait_until(&handle, |h| {
        h.sessions_started() == 3 && h.state() == RecognitionState::Listening
    })
    .await;

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_session_at_a_time_and_teardown_order() {
    let engine_error = || RecognitionEvent::Error(RecognitionError::Engine("busy".to_string()));
    let recognizer = ScriptedRecognizer::new(vec![
        script(vec![engine_error()], SessionEnd::Hang),
        script(vec![RecognitionEvent::Final(words("nothing"))], SessionEnd::Hang),
        script(Vec::new(), SessionEnd::Close),
        script(vec![engine_error()], SessionEnd::Hang),
    ]);
    let (handle, _wake) = spawn(recognizer.clone());

    wait_until(&handle, |h| {
        h.sessions_started() == 5 && h.state() == RecognitionState::Listening
    })
    .await;
    handle.stop().await;

    assert_eq!(recognizer.shared.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(recognizer.shared.active.load(Ordering::SeqCst), 0);

    let teardown = recognizer.shared.teardown.lock().clone();
    assert_eq!(teardown.len(), 15);
    for chunk in teardown.chunks(3) {
        assert_eq!(chunk, ["stop", "cancel", "release"]);
    }
}

#[tokio::test]
async fn test_instant_final_results_still_let_stop_run() {
    let (wake_tx, _wake_rx) = mpsc::channel(8);
    let handle = RecognitionLoop::spawn(
        Arc::new(InstantRecognizer),
        RecognitionConfig::for_testing(),
        wake_tx,
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::time::timeout(WAIT, handle.stop()).await.unwrap();

    assert_eq!(handle.state(), RecognitionState::Idle);
    assert!(handle.sessions_started() > 1);
}

#[tokio::test]
async fn test_stop_returns_to_idle_and_is_idempotent() {
    let recognizer = ScriptedRecognizer::new(Vec::new());
    let (handle, _wake) = spawn(recognizer.clone());

    wait_until(&handle, |h| h.state() == RecognitionState::Listening).await;

    handle.stop().await;
    handle.stop().await;

    assert_eq!(handle.state(), RecognitionState::Idle);
    assert_eq!(recognizer.shared.active.load(Ordering::SeqCst), 0);
}
