//! Transcript export
//!
//! Plain-text rendering of a conversation, one line per message:
//!
//! ```text
//! You: turn wifi on
//! Lily: Turning Wi-Fi on
//! ```

use std::path::{Path, PathBuf};

use crate::messages::{Message, Origin};
use crate::store::PersistenceError;

/// Label for user lines
pub const USER_LABEL: &str = "You";

/// Label for assistant lines
pub const ASSISTANT_LABEL: &str = "Lily";

/// File name written by [`export_transcript`]
pub const TRANSCRIPT_FILE: &str = "lily_chat.txt";

/// Subdirectory of the export root
pub const EXPORT_DIR: &str = "exports";

/// One message as a transcript line, without the trailing newline
#[must_use]
pub fn transcript_line(message: &Message) -> String {
    let label = match message.origin() {
        Origin::User => USER_LABEL,
        Origin::Assistant => ASSISTANT_LABEL,
    };
    format!("{label}: {}", message.text())
}

/// Render messages sorted by id, each line terminated by `\n`
#[must_use]
pub fn render_transcript(messages: &[Message]) -> String {
    let mut sorted: Vec<&Message> = messages.iter().collect();
    sorted.sort_by_key(|m| m.id());

    let mut out = String::new();
    for message in sorted {
        out.push_str(&transcript_line(message));
        out.push('\n');
    }
    out
}

/// Write the transcript to `dir/exports/lily_chat.txt`
///
/// Returns the written path, or `None` for an empty conversation (nothing
/// is written).
///
/// # Errors
///
/// Directory creation or the write itself failed.
pub async fn export_transcript(
    dir: &Path,
    messages: &[Message],
) -> Result<Option<PathBuf>, PersistenceError> {
    if messages.is_empty() {
        return Ok(None);
    }

    let export_dir = dir.join(EXPORT_DIR);
    tokio::fs::create_dir_all(&export_dir)
        .await
        .map_err(|source| PersistenceError::Io {
            path: export_dir.clone(),
            source,
        })?;

    let path = export_dir.join(TRANSCRIPT_FILE);
    tokio::fs::write(&path, render_transcript(messages))
        .await
        .map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;

    tracing::info!(path = %path.display(), messages = messages.len(), "Transcript exported");
    Ok(Some(path))
}
