//! Peer client.

use crate::error::TransportError;
use crate::protocol::{
    self, CONTENT_TYPE, EXECUTE_PATH, ExecuteRequest, ExecuteResponse, FINISH_PATH, FinishRequest,
    FinishResponse, HEALTH_PATH,
};
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde::de::DeserializeOwned;
use skiff_core::SessionId;
use std::time::Duration;

/// Default deadline for a single remote call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one remote peer.
///
/// Each call is attempted once; failures are reported, never retried.
#[derive(Debug, Clone)]
pub struct PeerClient {
    base_url: String,
    http: HttpClient,
    timeout: Duration,
}

impl PeerClient {
    /// Create a client for `peer`, given as `host:port` or a full `http://` URL
    ///
    /// # Errors
    ///
    /// Returns error if the address is empty or the HTTP client cannot be built
    pub fn new(peer: &str) -> Result<Self, TransportError> {
        Self::with_timeout(peer, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom per-call deadline
    ///
    /// # Errors
    ///
    /// Returns error if the address is empty or the HTTP client cannot be built
    pub fn with_timeout(peer: &str, timeout: Duration) -> Result<Self, TransportError> {
        let peer = peer.trim().trim_end_matches('/');
        if peer.is_empty() {
            return Err(TransportError::InvalidAddress(peer.to_string()));
        }
        let base_url = if peer.starts_with("http://") || peer.starts_with("https://") {
            peer.to_string()
        } else {
            format!("http://{peer}")
        };
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidAddress(format!("{base_url}: {e}")))?;
        Ok(Self {
            base_url,
            http,
            timeout,
        })
    }

    /// Peer base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-call deadline
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Hand a computation over to the peer
    ///
    /// # Errors
    ///
    /// Returns error on connection failure, timeout, non-success status or
    /// an undecodable response
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, TransportError> {
        tracing::debug!(
            peer = %self.base_url,
            session = %request.session_id,
            frames = request.snapshot.as_ref().map_or(0, |s| s.depth()),
            "sending execute"
        );
        self.post("execute", EXECUTE_PATH, request).await
    }

    /// Tell the peer the computation has completed
    ///
    /// # Errors
    ///
    /// Returns error on connection failure, timeout, non-success status or
    /// an undecodable response
    pub async fn finish(&self, session_id: SessionId) -> Result<FinishResponse, TransportError> {
        tracing::debug!(peer = %self.base_url, session = %session_id, "sending finish");
        self.post("finish", FINISH_PATH, &FinishRequest { session_id })
            .await
    }

    /// Probe the peer's liveness endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the peer is unreachable or unhealthy
    pub async fn health(&self) -> Result<(), TransportError> {
        let operation = "health";
        let response = self
            .http
            .get(self.url(HEALTH_PATH))
            .send()
            .await
            .map_err(|e| self.send_error(operation, &e))?;
        check_status(operation, response).await.map(|_| ())
    }

    async fn post<Req, Resp>(&self, operation: &str, path: &str, body: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = protocol::encode(operation, body)?;
        let response = self
            .http
            .post(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| self.send_error(operation, &e))?;

        let response = check_status(operation, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.send_error(operation, &e))?;
        protocol::decode(operation, &bytes)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send_error(&self, operation: &str, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                operation: operation.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            TransportError::Connection {
                operation: operation.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

async fn check_status(
    operation: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}
