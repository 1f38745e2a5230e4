//! Conversation Messages
//!
//! The turn records the Conductor commits, the store mirrors and observers
//! render.
//!
//! # Ownership
//!
//! Messages are created only by the Conductor's main task. Once created they
//! are never mutated or deleted; observers receive immutable [`Conversation`]
//! snapshots, and the store receives copies for durable mirroring.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message identifier
///
/// Assigned by the Conductor from a single counter: strictly increasing,
/// unique, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    /// The id handed out when a conversation is empty
    pub const FIRST: Self = Self(1);

    /// The id that follows this one
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw integer value
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Typed or spoken user input
    User,
    /// Assistant reply (local confirmation, remote reply or fallback)
    Assistant,
}

/// A single committed turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    text: String,
    origin: Origin,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(id: MessageId, origin: Origin, text: impl Into<String>) -> Self {
        Self::with_timestamp(id, origin, text, Utc::now())
    }

    /// Create a message with an explicit creation time
    pub fn with_timestamp(
        id: MessageId,
        origin: Origin,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            text: text.into(),
            origin,
            created_at,
        }
    }

    /// Message id
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Message text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Who produced the message
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// When the message was committed
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

}

/// Immutable snapshot of the ordered message sequence
///
/// Insertion order is causal order is display order. Cloning is cheap;
/// appending never changes a snapshot someone else holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Arc<Vec<Message>>,
}

impl Conversation {
    /// Build a snapshot from messages already in display order
    #[must_use]
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(messages),
        }
    }

    /// All messages, oldest first
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of committed turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no turn has been committed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Iterate over messages, oldest first
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Id the next committed turn should receive: max + 1, or 1 when empty
    #[must_use]
    pub fn next_id(&self) -> MessageId {
        self.messages
            .iter()
            .map(Message::id)
            .max()
            .map_or(MessageId::FIRST, MessageId::next)
    }

    /// Append `message`
    ///
    /// Pushes in place when this is the only handle to the messages;
    /// otherwise copies first, leaving other snapshots untouched.
    pub(crate) fn push(&mut self, message: Message) {
        Arc::make_mut(&mut self.messages).push(message);
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Notification levels for the operator-facing channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
}

/// Operator-facing notice
///
/// Failures that must not reach the user as raw errors (persistence,
/// history load) are reported here instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Severity
    pub level: NotifyLevel,
    /// Human-readable description
    pub message: String,
}

impl Notice {
    /// Create an error notice
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotifyLevel::Error,
            message: message.into(),
        }
    }
}
