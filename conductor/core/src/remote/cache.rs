//! Client cache and the credential-aware query service

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::http::HttpQueryClient;
use super::traits::{
    CredentialSource, QueryRequest, RemoteEndpoint, RemoteQuery, Timeouts, TransportError,
};

/// In-memory credentials, settable at runtime
///
/// Clones share the same underlying endpoint.
#[derive(Clone, Debug, Default)]
pub struct SharedCredentials {
    inner: Arc<RwLock<RemoteEndpoint>>,
}

impl SharedCredentials {
    /// Seed with an initial endpoint
    #[must_use]
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self {
            inner: Arc::new(RwLock::new(endpoint)),
        }
    }

    /// Replace the base URL
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.inner.write().base_url = base_url.into();
    }

    /// Replace the API key
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.inner.write().api_key = api_key.into();
    }
}

impl CredentialSource for SharedCredentials {
    fn endpoint(&self) -> RemoteEndpoint {
        self.inner.read().clone()
    }
}

/// Single-slot cache of the HTTP client, keyed by endpoint
///
/// The slot is rebuilt only when the endpoint differs from the cached one.
/// Building happens under the slot lock, so concurrent callers with the
/// same key never build twice.
#[derive(Debug)]
pub struct ClientCache {
    timeouts: Timeouts,
    slot: Mutex<Option<(RemoteEndpoint, HttpQueryClient)>>,
    builds: AtomicU64,
}

impl ClientCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            slot: Mutex::new(None),
            builds: AtomicU64::new(0),
        }
    }

    /// Client for `endpoint`, building one if the key changed
    ///
    /// # Errors
    ///
    /// Propagates construction failures; the previous client is kept.
    pub fn get(&self, endpoint: &RemoteEndpoint) -> Result<HttpQueryClient, TransportError> {
        let mut slot = self.slot.lock();
        if let Some((key, client)) = slot.as_ref() {
            if key == endpoint {
                return Ok(client.clone());
            }
        }

        let client = HttpQueryClient::new(endpoint, self.timeouts)?;
        let builds = self.builds.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(url = %client.url(), builds, "Built remote client");

        *slot = Some((endpoint.clone(), client.clone()));
        Ok(client)
    }

    /// How many clients have been built so far
    #[must_use]
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

/// Remote query backed by a credential source and a client cache
pub struct RemoteQueryService {
    credentials: Arc<dyn CredentialSource>,
    cache: ClientCache,
}

impl RemoteQueryService {
    /// Create a service reading credentials from `credentials` on every call
    pub fn new(credentials: Arc<dyn CredentialSource>, timeouts: Timeouts) -> Self {
        Self {
            credentials,
            cache: ClientCache::new(timeouts),
        }
    }

    /// The underlying cache
    #[must_use]
    pub fn cache(&self) -> &ClientCache {
        &self.cache
    }
}

impl std::fmt::Debug for RemoteQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteQueryService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteQuery for RemoteQueryService {
    async fn send(&self, request: QueryRequest) -> Result<String, TransportError> {
        let endpoint = self.credentials.endpoint();
        let client = self.cache.get(&endpoint)?;
        client.send(request).await
    }
}
