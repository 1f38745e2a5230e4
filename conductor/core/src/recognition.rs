//! Recognition Loop
//!
//! Keeps a speech recognizer listening for a wake phrase for as long as the
//! loop runs.
//!
//! # Lifecycle
//!
//! ```text
//!            spawn                         final
//!   Idle ───────────▶ Listening ──────▶ Classifying ───────▶ Listening
//!                       │   ▲                 │
//!           error, end  │   │ backoff         │ stop
//!                       ▼   │                 ▼
//!                    Restarting             Idle
//! ```
//!
//! Every error, every final result and every session whose event stream
//! ends tears the session down (stop, cancel, release) and starts a fresh
//! one. Partial results are classified without ending the session. Only one
//! session exists at a time.
//!
//! # Wake Signal
//!
//! A transcript whose lower-cased text contains a configured wake phrase
//! produces one [`WakeEvent`] on the wake channel. The loop keeps listening
//! afterwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Recognizer failures
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecognitionError {
    /// No recognizer on this host
    #[error("speech recognition is unavailable")]
    Unavailable,

    /// A listening session could not be started
    #[error("failed to start listening: {0}")]
    StartFailed(String),

    /// The engine reported an error mid-session
    #[error("recognizer error: {0}")]
    Engine(String),
}

/// Events a listening session produces
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Interim hypotheses; the session continues
    Partial(Vec<String>),
    /// Final hypotheses; the session is over
    Final(Vec<String>),
    /// The session failed
    Error(RecognitionError),
}

/// One recognizer session
#[async_trait]
pub trait ListeningSession: Send {
    /// Next event, or `None` when the session's stream has ended
    async fn next_event(&mut self) -> Option<RecognitionEvent>;

    /// Stop listening
    fn stop(&mut self);

    /// Cancel pending recognition
    fn cancel(&mut self);

    /// Release engine resources
    fn release(&mut self);
}

/// Speech-to-text engine
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Whether recognition is possible at all
    fn is_available(&self) -> bool;

    /// Start a fresh session
    async fn start_session(&self) -> Result<Box<dyn ListeningSession>, RecognitionError>;
}

/// Loop state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecognitionState {
    /// Not running
    Idle,
    /// A session is open
    Listening,
    /// Evaluating a transcript
    Classifying,
    /// Waiting to open a new session after a failure
    Restarting,
}

/// Emitted when a wake phrase is heard
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WakeEvent {
    /// The configured phrase that matched
    pub phrase: String,
    /// Normalized transcript it matched in
    pub transcript: String,
}

/// Recognition loop settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognitionConfig {
    /// Phrases that trigger a wake event, matched case-insensitively
    pub wake_phrases: Vec<String>,
    /// First restart delay
    pub backoff_base: Duration,
    /// Restart delay ceiling
    pub backoff_max: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            wake_phrases: vec!["hey lily".to_string(), "hi lily".to_string()],
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl RecognitionConfig {
    /// Replace the wake phrases
    #[must_use]
    pub fn with_wake_phrases(mut self, phrases: Vec<String>) -> Self {
        self.wake_phrases = phrases;
        self
    }

    /// Set the backoff range
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Short delays for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self::default().with_backoff(Duration::from_millis(1), Duration::from_millis(10))
    }

    /// Delay before restart number `attempt` (0-based)
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Wake-phrase containment check
#[derive(Clone, Debug)]
pub struct WakePhraseClassifier {
    phrases: Vec<String>,
}

impl WakePhraseClassifier {
    /// Build from configured phrases; blank phrases are ignored
    #[must_use]
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Join alternatives with a space, lower-case, and look for a phrase
    #[must_use]
    pub fn classify(&self, alternatives: &[String]) -> Option<WakeEvent> {
        let transcript = alternatives.join(" ").to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| transcript.contains(phrase.as_str()))
            .map(|phrase| WakeEvent {
                phrase: phrase.clone(),
                transcript: transcript.clone(),
            })
    }
}

/// Handle to a running loop
#[derive(Debug)]
pub struct RecognitionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<RecognitionState>,
    sessions: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RecognitionHandle {
    /// Current state
    #[must_use]
    pub fn state(&self) -> RecognitionState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<RecognitionState> {
        self.state.clone()
    }

    /// Number of sessions opened so far
    #[must_use]
    pub fn sessions_started(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for it to finish; idempotent
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Recognition task ended abnormally");
            }
        }
    }
}

enum SessionOutcome {
    Stopped,
    Transcript,
    Failed(RecognitionError),
    Ended,
}

/// The always-restart listening loop
pub struct RecognitionLoop<R: SpeechRecognizer> {
    recognizer: Arc<R>,
    config: RecognitionConfig,
    classifier: WakePhraseClassifier,
    wake_tx: mpsc::Sender<WakeEvent>,
    state_tx: watch::Sender<RecognitionState>,
    sessions: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl<R: SpeechRecognizer> RecognitionLoop<R> {
    /// Start listening on the current runtime
    ///
    /// Wake events go to `wake_tx`. A full channel drops the event.
    pub fn spawn(
        recognizer: Arc<R>,
        config: RecognitionConfig,
        wake_tx: mpsc::Sender<WakeEvent>,
    ) -> RecognitionHandle {
        let (state_tx, state_rx) = watch::channel(RecognitionState::Idle);
        let sessions = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let this = Self {
            recognizer,
            classifier: WakePhraseClassifier::new(&config.wake_phrases),
            config,
            wake_tx,
            state_tx,
            sessions: Arc::clone(&sessions),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(this.run());

        RecognitionHandle {
            cancel,
            state: state_rx,
            sessions,
            task: Mutex::new(Some(task)),
        }
    }

    fn set_state(&self, state: RecognitionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::trace!(from = ?*current, to = ?state, "Recognition state");
                *current = state;
                true
            }
        });
    }

    async fn run(self) {
        tracing::info!(phrases = ?self.config.wake_phrases, "Recognition loop started");
        let mut attempt: u32 = 0;

        loop {
            let session = if self.recognizer.is_available() {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    result = self.recognizer.start_session() => result,
                }
            } else {
                Err(RecognitionError::Unavailable)
            };

            let mut session = match session {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Could not start listening");
                    if !self.back_off(attempt).await {
                        break;
                    }
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            self.sessions.fetch_add(1, Ordering::Relaxed);
            self.set_state(RecognitionState::Listening);

            let outcome = self.listen(session.as_mut(), &mut attempt).await;

            session.stop();
            session.cancel();
            session.release();
            drop(session);

            match outcome {
                SessionOutcome::Stopped => break,
                SessionOutcome::Transcript => {
                    // Restart at once; yield so a pending stop can land.
                    tokio::task::yield_now().await;
                }
                SessionOutcome::Failed(e) => {
                    tracing::warn!(error = %e, attempt, "Recognition failed, restarting");
                    if !self.back_off(attempt).await {
                        break;
                    }
                    attempt = attempt.saturating_add(1);
                }
                SessionOutcome::Ended => {
                    tracing::debug!(attempt, "Recognition session ended, restarting");
                    if !self.back_off(attempt).await {
                        break;
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }

        self.set_state(RecognitionState::Idle);
        tracing::info!("Recognition loop stopped");
    }

    async fn listen(
        &self,
        session: &mut dyn ListeningSession,
        attempt: &mut u32,
    ) -> SessionOutcome {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return SessionOutcome::Stopped,
                event = session.next_event() => event,
            };

            match event {
                None => return SessionOutcome::Ended,
                Some(RecognitionEvent::Partial(alternatives)) => {
                    *attempt = 0;
                    self.set_state(RecognitionState::Classifying);
                    self.classify(&alternatives);
                    self.set_state(RecognitionState::Listening);
                    tokio::task::yield_now().await;
                }
                Some(RecognitionEvent::Final(alternatives)) => {
                    *attempt = 0;
                    self.set_state(RecognitionState::Classifying);
                    self.classify(&alternatives);
                    return SessionOutcome::Transcript;
                }
                Some(RecognitionEvent::Error(e)) => return SessionOutcome::Failed(e),
            }
        }
    }

    fn classify(&self, alternatives: &[String]) {
        let Some(wake) = self.classifier.classify(alternatives) else {
            return;
        };
        tracing::info!(phrase = %wake.phrase, "Wake phrase detected");
        match self.wake_tx.try_send(wake) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Wake channel full, dropping wake event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Wake channel closed");
            }
        }
    }

    /// Wait `base << attempt` (capped) before the next restart; `false` if
    /// stopped meanwhile
    async fn back_off(&self, attempt: u32) -> bool {
        self.set_state(RecognitionState::Restarting);
        let delay = self.config.backoff_delay(attempt);
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// Recognizer fed by a channel of events
///
/// For hosts whose engine pushes callbacks: each callback is forwarded as a
/// [`RecognitionEvent`] on the sender returned by [`ChannelRecognizer::new`].
/// Events queue while no session is open and are delivered to the next one.
#[derive(Debug, Clone)]
pub struct ChannelRecognizer {
    events: Arc<tokio::sync::Mutex<mpsc::Receiver<RecognitionEvent>>>,
}

impl ChannelRecognizer {
    /// Create the recognizer and its event sender
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<RecognitionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                events: Arc::new(tokio::sync::Mutex::new(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl SpeechRecognizer for ChannelRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn start_session(&self) -> Result<Box<dyn ListeningSession>, RecognitionError> {
        let events = Arc::clone(&self.events).lock_owned().await;
        Ok(Box::new(ChannelSession { events }))
    }
}

struct ChannelSession {
    events: tokio::sync::OwnedMutexGuard<mpsc::Receiver<RecognitionEvent>>,
}

#[async_trait]
impl ListeningSession for ChannelSession {
    async fn next_event(&mut self) -> Option<RecognitionEvent> {
        self.events.recv().await
    }

    fn stop(&mut self) {}

    fn cancel(&mut self) {}

    fn release(&mut self) {
        tracing::trace!("Channel session released");
    }
}
