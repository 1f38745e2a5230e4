//! Conductor - The Conversation Orchestrator
//!
//! Owns the conversation and drives every submitted turn through the same
//! state machine:
//!
//! 1. **Admission**: blank input is rejected before anything happens
//! 2. **User turn**: allocate an id, append, publish, queue a durable write
//! 3. **Resolution**: local command if one matches, otherwise the remote
//!    service, otherwise the fixed apology
//! 4. **Assistant turn**: allocate an id, append, publish, queue a durable
//!    write, speak
//!
//! # Concurrency
//!
//! ```text
//!   ConductorHandle ──commands──▶ main task ──spawn──▶ resolution tasks (JoinSet)
//!                                   │  ▲                       │
//!                                   │  └──── resolved turn ────┘
//!                                   ├──▶ writer task ──▶ ConversationStore
//!                                   ├──▶ SpeechSink
//!                                   └──▶ watch<Conversation>, broadcast<Notice>
//! ```
//!
//! The main task is the only writer of the conversation and the id counter.
//! Resolution, persistence and speech run elsewhere and hand results back;
//! they never touch conversation state.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::commands::CommandMatcher;
use crate::messages::{Conversation, Message, MessageId, Notice, Origin};
use crate::remote::{QueryRequest, RemoteQuery};
use crate::speech::SpeechSink;
use crate::store::ConversationStore;
use crate::transcript::render_transcript;

/// Assistant reply used when the remote service cannot be reached
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't reach the server.";

/// Conductor configuration
#[derive(Clone, Debug)]
pub struct ConductorConfig {
    /// Language tag sent with remote queries
    pub language: Option<String>,
    /// Session id sent with remote queries
    pub session_id: Option<String>,
    /// Capacity of the command channel
    pub command_capacity: usize,
    /// Capacity of the operator notice channel
    pub notice_capacity: usize,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            language: None,
            session_id: None,
            command_capacity: 64,
            notice_capacity: 32,
        }
    }
}

/// Collaborators the Conductor drives
#[derive(Clone)]
pub struct ConductorDeps {
    /// Local command matcher
    pub matcher: CommandMatcher,
    /// Remote assistant service
    pub remote: Arc<dyn RemoteQuery>,
    /// Durable mirror
    pub store: Arc<dyn ConversationStore>,
    /// Reply speech
    pub speech: Arc<dyn SpeechSink>,
}

/// Why a submission produced no turn
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Blank or whitespace-only input
    #[error("input is blank")]
    InputRejected,

    /// The Conductor is shut down, or shut down before the turn resolved
    #[error("conductor is not running")]
    Closed,
}

/// How an assistant reply was produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Local command confirmation
    Local,
    /// Remote service reply
    Remote,
    /// Remote failed, apology substituted
    Fallback,
}

enum Command {
    Submit {
        text: String,
        committed: oneshot::Sender<Message>,
        reply: oneshot::Sender<Message>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

struct ResolvedTurn {
    text: String,
    resolution: Resolution,
    reply: oneshot::Sender<Message>,
}

/// The Conductor before it starts
///
/// Subscribe to conversation updates and notices here to observe history
/// loading; then call [`Conductor::start`].
pub struct Conductor {
    deps: ConductorDeps,
    config: ConductorConfig,
    conversation_tx: watch::Sender<Conversation>,
    notice_tx: broadcast::Sender<Notice>,
}

impl Conductor {
    /// Create a conductor
    #[must_use]
    pub fn new(deps: ConductorDeps, config: ConductorConfig) -> Self {
        let (conversation_tx, _) = watch::channel(Conversation::default());
        let (notice_tx, _) = broadcast::channel(config.notice_capacity.max(1));
        Self {
            deps,
            config,
            conversation_tx,
            notice_tx,
        }
    }

    /// Observe conversation snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.conversation_tx.subscribe()
    }

    /// Observe operator notices
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    /// Load history and start the main task
    ///
    /// A failed load starts with an empty conversation and raises a notice.
    pub async fn start(self) -> ConductorHandle {
        let history = match self.deps.store.read_all().await {
            Ok(mut messages) => {
                messages.sort_by_key(Message::id);
                messages
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load conversation history");
                let _ = self
                    .notice_tx
                    .send(Notice::error(format!("Could not load history: {e}")));
                Vec::new()
            }
        };

        let conversation = Conversation::from_messages(history);
        let next_id = conversation.next_id();
        tracing::info!(messages = conversation.len(), next_id = %next_id, "Conductor starting");
        self.conversation_tx.send_replace(conversation);

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(
            Arc::clone(&self.deps.store),
            writer_rx,
            self.notice_tx.clone(),
        ));

        let (command_tx, command_rx) = mpsc::channel(self.config.command_capacity.max(1));
        let conversation_rx = self.conversation_tx.subscribe();

        let main = MainContext {
            next_id,
            commands: command_rx,
            resolutions: JoinSet::new(),
            writer_tx: Some(writer_tx),
            writer: Some(writer),
            conversation_tx: self.conversation_tx,
            deps: self.deps,
            config: self.config,
        };
        let task = tokio::spawn(main.run());

        ConductorHandle {
            commands: command_tx,
            conversation: conversation_rx,
            notice_tx: self.notice_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Cloneable handle to a running Conductor
#[derive(Clone)]
pub struct ConductorHandle {
    commands: mpsc::Sender<Command>,
    conversation: watch::Receiver<Conversation>,
    notice_tx: broadcast::Sender<Notice>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConductorHandle {
    /// Submit one user utterance
    ///
    /// Returns once the user turn is committed and published. The assistant
    /// turn is awaited through [`PendingTurn::reply`].
    ///
    /// # Errors
    ///
    /// `InputRejected` for blank input (nothing is committed), `Closed`
    /// after shutdown.
    pub async fn submit(&self, text: impl Into<String>) -> Result<PendingTurn, SubmitError> {
        let text = text.into();
        if text.trim().is_empty() {
            tracing::debug!("Rejected blank input");
            return Err(SubmitError::InputRejected);
        }

        let (committed_tx, committed_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                text,
                committed: committed_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SubmitError::Closed)?;

        let user_message = committed_rx.await.map_err(|_| SubmitError::Closed)?;
        Ok(PendingTurn {
            user_message,
            reply: reply_rx,
        })
    }

    /// Current conversation
    #[must_use]
    pub fn snapshot(&self) -> Conversation {
        self.conversation.borrow().clone()
    }

    /// Observe conversation snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.conversation.clone()
    }

    /// Observe operator notices
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    /// Current conversation rendered as a plain-text transcript
    #[must_use]
    pub fn transcript(&self) -> String {
        render_transcript(self.snapshot().messages())
    }

    /// Whether the main task still accepts submissions
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop intake, abort in-flight resolutions, drain durable writes and
    /// shut speech down
    ///
    /// Idempotent; safe to call from any clone.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Shutdown { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Conductor task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ConductorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductorHandle")
            .field("running", &self.is_running())
            .field("messages", &self.conversation.borrow().len())
            .finish()
    }
}

/// A committed user turn awaiting its assistant reply
#[derive(Debug)]
pub struct PendingTurn {
    user_message: Message,
    reply: oneshot::Receiver<Message>,
}

impl PendingTurn {
    /// The committed user message
    #[must_use]
    pub fn user_message(&self) -> &Message {
        &self.user_message
    }

    /// Wait for the assistant message
    ///
    /// # Errors
    ///
    /// `Closed` if the Conductor shut down before the turn resolved.
    pub async fn reply(self) -> Result<Message, SubmitError> {
        self.reply.await.map_err(|_| SubmitError::Closed)
    }
}

/// State owned by the main task
struct MainContext {
    next_id: MessageId,
    commands: mpsc::Receiver<Command>,
    resolutions: JoinSet<ResolvedTurn>,
    writer_tx: Option<mpsc::UnboundedSender<Message>>,
    writer: Option<JoinHandle<()>>,
    conversation_tx: watch::Sender<Conversation>,
    deps: ConductorDeps,
    config: ConductorConfig,
}

impl MainContext {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Submit { text, committed, reply }) => {
                        self.handle_submit(text, committed, reply);
                    }
                    Some(Command::Shutdown { done }) => {
                        self.teardown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => break,
                },
                Some(joined) = self.resolutions.join_next(), if !self.resolutions.is_empty() => {
                    self.handle_resolved(joined);
                }
            }
        }

        self.teardown().await;
    }

    fn handle_submit(
        &mut self,
        text: String,
        committed: oneshot::Sender<Message>,
        reply: oneshot::Sender<Message>,
    ) {
        let user_message = self.commit(Origin::User, text.clone());
        let _ = committed.send(user_message);

        let matcher = self.deps.matcher.clone();
        let remote = Arc::clone(&self.deps.remote);
        let request = QueryRequest::new(text.clone())
            .with_language(self.config.language.clone())
            .with_session_id(self.config.session_id.clone());

        self.resolutions.spawn(async move {
            let (text, resolution) = resolve(&matcher, remote.as_ref(), &text, request).await;
            ResolvedTurn {
                text,
                resolution,
                reply,
            }
        });
    }

    fn handle_resolved(&mut self, joined: Result<ResolvedTurn, JoinError>) {
        let turn = match joined {
            Ok(turn) => turn,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::error!(error = %e, "Resolution task failed");
                return;
            }
        };

        tracing::debug!(resolution = ?turn.resolution, "Turn resolved");
        let assistant_message = self.commit(Origin::Assistant, turn.text);
        self.deps.speech.speak(assistant_message.text());
        let _ = turn.reply.send(assistant_message);
    }

    /// Allocate an id, append, publish and queue the durable write
    fn commit(&mut self, origin: Origin, text: String) -> Message {
        let id = self.next_id;
        self.next_id = id.next();

        let message = Message::new(id, origin, text);
        // In place unless an observer still holds an older snapshot.
        self.conversation_tx
            .send_modify(|conversation| conversation.push(message.clone()));

        if let Some(writer) = &self.writer_tx {
            if writer.send(message.clone()).is_err() {
                tracing::error!(id = %id, "Persistence writer is gone");
            }
        }

        tracing::debug!(id = %id, origin = ?origin, "Turn committed");
        message
    }

    async fn teardown(&mut self) {
        self.commands.close();

        let in_flight = self.resolutions.len();
        self.resolutions.abort_all();
        while self.resolutions.join_next().await.is_some() {}
        if in_flight > 0 {
            tracing::info!(in_flight, "Aborted in-flight resolutions");
        }

        self.writer_tx.take();
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                tracing::error!(error = %e, "Persistence writer ended abnormally");
            }
        }

        self.deps.speech.shutdown();
        let messages = self.conversation_tx.borrow().len();
        tracing::info!(messages, "Conductor stopped");
    }
}

/// Local command first, then remote, then the apology
async fn resolve(
    matcher: &CommandMatcher,
    remote: &dyn RemoteQuery,
    text: &str,
    request: QueryRequest,
) -> (String, Resolution) {
    if let Some(action) = matcher.try_match(text) {
        return (action.spoken_confirmation, Resolution::Local);
    }

    match remote.send(request).await {
        Ok(reply) => (reply, Resolution::Remote),
        Err(e) => {
            tracing::warn!(error = %e, "Remote query failed, using fallback reply");
            (FALLBACK_REPLY.to_string(), Resolution::Fallback)
        }
    }
}

/// Drain queued messages into the store, in order
async fn run_writer(
    store: Arc<dyn ConversationStore>,
    mut queue: mpsc::UnboundedReceiver<Message>,
    notice_tx: broadcast::Sender<Notice>,
) {
    while let Some(message) = queue.recv().await {
        if let Err(e) = store.append_or_replace(&message).await {
            tracing::error!(id = %message.id(), error = %e, "Failed to persist message");
            let _ = notice_tx.send(Notice::error(format!(
                "Could not save message {}: {e}",
                message.id()
            )));
        }
    }
}
