//! Lily Conductor - Headless Conversation Orchestration
//!
//! This crate provides the core of the Lily voice/text assistant, completely
//! independent of any UI. A surface (the `lily-daemon` text console, a
//! mobile shell, a test harness) submits utterances and renders the
//! conversation snapshots it is handed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Surfaces                                │
//! │     text console  ·  mobile shell  ·  tests                      │
//! │          │  submit(text)          ▲ watch<Conversation>          │
//! └──────────┼────────────────────────┼──────────────────────────────┘
//!            ▼                        │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       CONDUCTOR CORE                             │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                    Conductor (main task)                   │  │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐  │  │
//! │  │  │ Command  │  │  Remote  │  │  Store   │  │   Speech   │  │  │
//! │  │  │ Matcher  │  │  Query   │  │ (writer) │  │   Output   │  │  │
//! │  │  └──────────┘  └──────────┘  └──────────┘  └────────────┘  │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │        Recognition Loop  ──wake──▶  surface                │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`] / [`ConductorHandle`]: owns the conversation, resolves turns
//! - [`CommandMatcher`]: local device commands, first match wins
//! - [`remote::RemoteQueryService`]: HTTP query client with credential-keyed cache
//! - [`store::JsonlStore`]: durable append-only conversation mirror
//! - [`speech::SpeechOutput`]: last-reply-wins text-to-speech sink
//! - [`recognition::RecognitionLoop`]: always-restart wake-phrase listener
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use lily_conductor::{
//!     Conductor, ConductorConfig, ConductorDeps, CommandMatcher, LoggingPlatform,
//!     remote::{RemoteQueryService, SharedCredentials, Timeouts},
//!     speech::{LogSpeechEngine, SpeechOutput},
//!     store::MemoryStore,
//! };
//!
//! let deps = ConductorDeps {
//!     matcher: CommandMatcher::new(Arc::new(LoggingPlatform)),
//!     remote: Arc::new(RemoteQueryService::new(
//!         Arc::new(SharedCredentials::default()),
//!         Timeouts::default(),
//!     )),
//!     store: Arc::new(MemoryStore::new()),
//!     speech: Arc::new(SpeechOutput::new(LogSpeechEngine::new(true))),
//! };
//!
//! let handle = Conductor::new(deps, ConductorConfig::default()).start().await;
//! let reply = handle.submit("turn wifi on").await?.reply().await?;
//! assert_eq!(reply.text(), "Turning Wi-Fi on");
//! handle.shutdown().await;
//! ```

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod conductor;
pub mod config;
pub mod messages;
pub mod recognition;
pub mod remote;
pub mod speech;
pub mod store;
pub mod transcript;

// Re-exports for convenience
pub use commands::{ActionResult, CommandMatcher, LoggingPlatform, PlatformAction, PlatformActions};
pub use conductor::{
    Conductor, ConductorConfig, ConductorDeps, ConductorHandle, PendingTurn, Resolution,
    SubmitError, FALLBACK_REPLY,
};
pub use config::{load_config, ConfigError, ConfigOverrides, ConfigSource, LilyConfig};
pub use messages::{Conversation, Message, MessageId, Notice, NotifyLevel, Origin};
pub use recognition::{RecognitionError, RecognitionHandle, RecognitionLoop, RecognitionState, WakeEvent};
pub use remote::{RemoteQuery, TransportError};
pub use speech::{SpeechEngine, SpeechSink};
pub use store::{ConversationStore, PersistenceError};
pub use transcript::{export_transcript, render_transcript};
