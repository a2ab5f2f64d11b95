//! Streaming HTTP backend
//!
//! [`HttpBackend`] POSTs a [`SubmitRequest`] as JSON and hands back the
//! response body as a byte stream. Only connection establishment is
//! bounded here; gaps between body chunks are policed by the session
//! controller's idle timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::backend::{ByteStream, QaBackend, SubmitRequest};
use crate::error::{NotestreamError, Result};

/// `reqwest` based question-answering backend
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use notestream::backend::http::HttpBackend;
///
/// let backend = HttpBackend::new(
///     Url::parse("http://127.0.0.1:8001/api/stream").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(10),
/// )
/// .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// Underlying reqwest HTTP client.
    http_client: Arc<reqwest::Client>,
    /// Streaming endpoint URL (POST target).
    endpoint: url::Url,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
}

impl HttpBackend {
    /// Construct a new [`HttpBackend`] targeting `endpoint`.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The streaming endpoint (e.g. `http://host/api/stream`).
    /// * `headers` - Extra headers added to every request.
    /// * `connect_timeout` - Bound on establishing the connection.
    ///
    /// # Errors
    ///
    /// Returns [`NotestreamError::Transport`] if the HTTP client cannot be
    /// built (TLS initialisation failure).
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                NotestreamError::Transport(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client: Arc::new(http_client),
            endpoint,
            headers,
        })
    }

    /// The endpoint requests are sent to
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl QaBackend for HttpBackend {
    /// POST the request and return the body stream.
    ///
    /// Headers on every POST:
    ///
    /// - `Content-Type: application/json`
    /// - `Accept: text/event-stream, application/x-ndjson`
    /// - any configured extra headers
    ///
    /// # Errors
    ///
    /// Returns [`NotestreamError::Transport`] if the request fails or the
    /// status is not a success.
    async fn submit(&self, request: &SubmitRequest) -> Result<ByteStream> {
        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Accept", "text/event-stream, application/x-ndjson")
            .json(request);

        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        tracing::debug!(endpoint = %self.endpoint, chat_id = %request.chat_id, "POST stream request");

        let response = req.send().await.map_err(|e| {
            anyhow::anyhow!(NotestreamError::Transport(format!(
                "HTTP POST failed: {}",
                e
            )))
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown status");
            return Err(anyhow::anyhow!(NotestreamError::Transport(format!(
                "HTTP POST returned status {} ({})",
                status.as_u16(),
                reason
            ))));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                anyhow::anyhow!(NotestreamError::Transport(format!(
                    "response body aborted: {}",
                    e
                )))
            })
        });

        Ok(Box::pin(body))
    }
}
