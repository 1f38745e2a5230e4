//! Speech Output Sink
//!
//! Speaks assistant replies through a text-to-speech engine. At most one
//! utterance is active: a new reply stops the one in progress (last reply
//! wins, nothing is queued).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Text-to-speech engine
///
/// `speak` resolves when the utterance has finished playing. The sink
/// aborts that future and calls `stop` when a newer reply arrives.
#[async_trait]
pub trait SpeechEngine: Send + Sync + 'static {
    /// Whether the engine has finished initializing
    fn is_ready(&self) -> bool;

    /// Play `text` to completion
    async fn speak(&self, text: &str);

    /// Stop whatever is playing
    fn stop(&self);

    /// Release engine resources
    fn shutdown(&self);
}

/// What the Conductor talks to
pub trait SpeechSink: Send + Sync {
    /// Start speaking `text`, interrupting any current utterance
    ///
    /// Returns immediately. Dropped silently (logged) when the engine is
    /// not ready.
    fn speak(&self, text: &str);

    /// Stop the current utterance and shut the engine down
    fn shutdown(&self);
}

/// Last-reply-wins sink over a [`SpeechEngine`]
pub struct SpeechOutput<E: SpeechEngine> {
    engine: Arc<E>,
    current: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<E: SpeechEngine> SpeechOutput<E> {
    /// Wrap `engine`
    pub fn new(engine: E) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    /// Wrap an engine that is shared with the host
    pub fn from_arc(engine: Arc<E>) -> Self {
        Self {
            engine,
            current: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Whether an utterance is still playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The wrapped engine
    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    fn interrupt(&self, current: &mut Option<JoinHandle<()>>) {
        if let Some(previous) = current.take() {
            if !previous.is_finished() {
                previous.abort();
                self.engine.stop();
                tracing::debug!("Interrupted previous utterance");
            }
        }
    }
}

impl<E: SpeechEngine> SpeechSink for SpeechOutput<E> {
    fn speak(&self, text: &str) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        if !self.engine.is_ready() {
            tracing::warn!("Speech engine not ready, dropping utterance");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime available for speech, dropping utterance");
            return;
        };

        let mut current = self.current.lock();
        self.interrupt(&mut current);

        let engine = Arc::clone(&self.engine);
        let text = text.to_string();
        *current = Some(runtime.spawn(async move {
            engine.speak(&text).await;
        }));
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut current = self.current.lock();
        self.interrupt(&mut current);
        self.engine.shutdown();
        tracing::debug!("Speech output shut down");
    }
}

impl<E: SpeechEngine> std::fmt::Debug for SpeechOutput<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechOutput")
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Engine that writes utterances to the log instead of a speaker
#[derive(Debug, Clone, Copy)]
pub struct LogSpeechEngine {
    enabled: bool,
}

impl LogSpeechEngine {
    /// A disabled engine reports not-ready, so every utterance is dropped
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl SpeechEngine for LogSpeechEngine {
    fn is_ready(&self) -> bool {
        self.enabled
    }

    async fn speak(&self, text: &str) {
        tracing::info!(text, "Speaking");
    }

    fn stop(&self) {}

    fn shutdown(&self) {
        tracing::debug!("Log speech engine shut down");
    }
}
