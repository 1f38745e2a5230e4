//! Conversation Store
//!
//! Durable mirror of the conversation, used to restore history at startup.
//!
//! Writes are idempotent by message id: writing the same id twice leaves one
//! record with the latest content. There is no delete.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::messages::{Message, MessageId};

/// Store failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed
    #[error("store I/O failed at {path}: {source}")]
    Io {
        /// Backing file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A message could not be encoded
    #[error("failed to encode message {id}: {source}")]
    Encode {
        /// Message that failed
        id: MessageId,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Durable message storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert `message`, replacing any record with the same id
    async fn append_or_replace(&self, message: &Message) -> Result<(), PersistenceError>;

    /// Every stored message, ascending id
    async fn read_all(&self) -> Result<Vec<Message>, PersistenceError>;
}

/// Volatile store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<BTreeMap<MessageId, Message>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `messages`
    #[must_use]
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let store = Self::new();
        {
            let mut map = store.messages.write();
            for message in messages {
                map.insert(message.id(), message);
            }
        }
        store
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_or_replace(&self, message: &Message) -> Result<(), PersistenceError> {
        self.messages.write().insert(message.id(), message.clone());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Message>, PersistenceError> {
        Ok(self.messages.read().values().cloned().collect())
    }
}

/// Append-only JSON-lines file
///
/// Every write appends one record. Replay keeps the last record per id,
/// which is what makes repeated writes act as replace.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlStore {
    /// Store backed by `path`; the file is created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Whether the file is empty or its last byte is `\n`
async fn ends_with_newline(file: &mut tokio::fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(std::io::SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

#[async_trait]
impl ConversationStore for JsonlStore {
    async fn append_or_replace(&self, message: &Message) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(message).map_err(|source| PersistenceError::Encode {
            id: message.id(),
            source,
        })?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        // A torn tail from an interrupted write must not swallow this record.
        if !ends_with_newline(&mut file)
            .await
            .map_err(|e| self.io_error(e))?
        {
            line.insert(0, '\n');
        }

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        tracing::trace!(id = %message.id(), "Message persisted");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Message>, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut latest = BTreeMap::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => {
                    latest.insert(message.id(), message);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping corrupt store record"
                    );
                }
            }
        }

        Ok(latest.into_values().collect())
    }
}
