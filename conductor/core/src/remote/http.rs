//! HTTP Query Client
//!
//! `POST {base_url}/lily` with the `x-api-key` header. One request per
//! call, no retry.

use async_trait::async_trait;

use super::traits::{
    QueryReply, QueryRequest, RemoteEndpoint, RemoteQuery, Timeouts, TransportError,
};

/// reqwest-backed client bound to a single endpoint
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Clone)]
pub struct HttpQueryClient {
    http_client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpQueryClient {
    /// Build a client for `endpoint`
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint` when the base URL is not absolute http(s),
    /// `ClientBuild` when reqwest rejects the configuration.
    pub fn new(endpoint: &RemoteEndpoint, timeouts: Timeouts) -> Result<Self, TransportError> {
        let url = endpoint.query_url();
        let parsed = reqwest::Url::parse(&url)
            .map_err(|_| TransportError::InvalidEndpoint(endpoint.base_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::InvalidEndpoint(endpoint.base_url.clone()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .timeout(timeouts.request())
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            api_key: endpoint.api_key.clone(),
        })
    }

    /// Full URL queries are posted to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpQueryClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteQuery for HttpQueryClient {
    async fn send(&self, request: QueryRequest) -> Result<String, TransportError> {
        tracing::debug!(url = %self.url, chars = request.text.len(), "Sending query");

        let response = self
            .http_client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: QueryReply = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        Ok(reply.reply)
    }
}
