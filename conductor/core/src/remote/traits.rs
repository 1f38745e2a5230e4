//! Remote Query Traits
//!
//! Wire types and the trait the Conductor uses to reach the remote
//! assistant service. Keeping the trait here lets tests and embedders swap
//! the HTTP client for a scripted one.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for establishing a connection
pub const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Upper bound for a whole request, including reading the reply
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URL used when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Why a remote query produced no reply
///
/// The Conductor never shows these to the user; any variant becomes the
/// fixed apology reply.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Base URL is not an absolute http(s) URL
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// Connect or request timeout elapsed
    #[error("request timed out")]
    Timeout,

    /// Connection refused, DNS failure and similar
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// Server answered with a non-success status
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Reply body was not the expected JSON
    #[error("failed to decode reply: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::ClientBuild(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Body of a query request
///
/// Serialized as `{"text": .., "language"?: .., "sessionId"?: ..}`; absent
/// optional fields are omitted rather than sent as `null`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// User utterance
    pub text: String,
    /// Language tag, e.g. `en-US`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub language: Option<String>,
    /// Server-side session identifier
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
}

impl QueryRequest {
    /// Create a request carrying only the utterance
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            session_id: None,
        }
    }

    /// Set the language tag
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Set the session id
    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Reply body
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct QueryReply {
    /// Assistant reply text
    pub reply: String,
    /// Optional server metadata
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Remote assistant service
#[async_trait]
pub trait RemoteQuery: Send + Sync {
    /// Send one utterance and return the reply text
    ///
    /// No retry happens here; one failed attempt is one error.
    async fn send(&self, request: QueryRequest) -> Result<String, TransportError>;
}

/// Where and how to reach the remote service
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Base URL; `/lily` is appended per request
    pub base_url: String,
    /// Sent as the `x-api-key` header, may be empty
    pub api_key: String,
}

impl RemoteEndpoint {
    /// Create an endpoint
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Full query URL: trimmed base without trailing slash, plus `/lily`
    #[must_use]
    pub fn query_url(&self) -> String {
        format!("{}/lily", self.base_url.trim().trim_end_matches('/'))
    }
}

impl Default for RemoteEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, "")
    }
}

impl std::fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Supplies the endpoint to use at call time
///
/// Read on every query so credentials can change while the process runs.
pub trait CredentialSource: Send + Sync {
    /// Current endpoint
    fn endpoint(&self) -> RemoteEndpoint;
}

/// Connection and request timeouts, clamped to the service ceilings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timeouts {
    connect: Duration,
    request: Duration,
}

impl Timeouts {
    /// Create timeouts; values above the ceilings are clamped down
    #[must_use]
    pub fn new(connect: Duration, request: Duration) -> Self {
        Self {
            connect: connect.min(MAX_CONNECT_TIMEOUT),
            request: request.min(MAX_REQUEST_TIMEOUT),
        }
    }

    /// Connect timeout
    #[must_use]
    pub fn connect(&self) -> Duration {
        self.connect
    }

    /// Whole-request timeout
    #[must_use]
    pub fn request(&self) -> Duration {
        self.request
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(MAX_CONNECT_TIMEOUT, MAX_REQUEST_TIMEOUT)
    }
}
