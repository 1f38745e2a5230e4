//! Remote Query Client
//!
//! Sends one user utterance to the remote assistant service and returns its
//! reply text.
//!
//! # Layers
//!
//! - [`RemoteQuery`]: the trait the Conductor depends on
//! - [`HttpQueryClient`]: a reqwest client bound to one endpoint
//! - [`ClientCache`]: keeps a single client, rebuilt when credentials change
//! - [`RemoteQueryService`]: reads credentials at call time and queries
//!   through the cache
//!
//! # Usage
//!
//! ```ignore
//! use lily_conductor::remote::{RemoteQueryService, SharedCredentials, Timeouts};
//!
//! let credentials = Arc::new(SharedCredentials::new(endpoint));
//! let remote = RemoteQueryService::new(credentials.clone(), Timeouts::default());
//! let reply = remote.send(QueryRequest::new("hello")).await?;
//! ```

mod cache;
mod http;
mod traits;

pub use cache::{ClientCache, RemoteQueryService, SharedCredentials};
pub use http::HttpQueryClient;
pub use traits::{
    CredentialSource, QueryReply, QueryRequest, RemoteEndpoint, RemoteQuery, Timeouts,
    TransportError, DEFAULT_BASE_URL, MAX_CONNECT_TIMEOUT, MAX_REQUEST_TIMEOUT,
};
