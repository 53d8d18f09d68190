//! Peer server.

use crate::error::TransportError;
use crate::protocol::{
    self, CONTENT_TYPE, EXECUTE_PATH, ExecuteRequest, ExecuteResponse, FINISH_PATH, FinishRequest,
    FinishResponse, HEALTH_PATH, MAX_MESSAGE_BYTES,
};
use async_trait::async_trait;
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use http::{StatusCode, header};
use serde::Serialize;
use skiff_core::CoreResult;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// What a peer does with inbound requests
#[async_trait]
pub trait ExecutorService: Send + Sync + 'static {
    /// Take over (or start) a computation
    async fn execute(&self, request: ExecuteRequest) -> CoreResult<ExecuteResponse>;

    /// The other peer's computation has completed
    async fn finish(&self, request: FinishRequest) -> CoreResult<FinishResponse>;
}

/// HTTP server for one peer
pub struct PeerServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PeerServer {
    /// Bind to `address`
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::Server {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        Self::from_listener(listener)
    }

    /// Wrap an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the listener has no local address
    pub fn from_listener(listener: TcpListener) -> Result<Self, TransportError> {
        let local_addr = listener.local_addr().map_err(|e| TransportError::Server {
            address: "<listener>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Bound address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while accepting connections
    pub async fn serve<S: ExecutorService>(
        self,
        service: Arc<S>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let address = self.local_addr;
        tracing::info!(%address, "peer server listening");

        axum::serve(self.listener, router(service))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| TransportError::Server {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(%address, "peer server stopped");
        Ok(())
    }
}

/// Routes for a service
pub fn router<S: ExecutorService>(service: Arc<S>) -> Router {
    Router::new()
        .route(EXECUTE_PATH, post(execute::<S>))
        .route(FINISH_PATH, post(finish::<S>))
        .route(HEALTH_PATH, get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_MESSAGE_BYTES)),
        )
        .with_state(service)
}

async fn execute<S: ExecutorService>(State(service): State<Arc<S>>, body: Bytes) -> Response {
    let request: ExecuteRequest = match protocol::decode("execute", &body) {
        Ok(request) => request,
        Err(e) => return bad_request(e),
    };
    if let Err(e) = request.check() {
        return bad_request(TransportError::codec("execute", e));
    }
    match service.execute(request).await {
        Ok(response) => encoded("execute", &response),
        Err(e) => internal_error("execute", e),
    }
}

async fn finish<S: ExecutorService>(State(service): State<Arc<S>>, body: Bytes) -> Response {
    let request: FinishRequest = match protocol::decode("finish", &body) {
        Ok(request) => request,
        Err(e) => return bad_request(e),
    };
    match service.finish(request).await {
        Ok(response) => encoded("finish", &response),
        Err(e) => internal_error("finish", e),
    }
}

async fn health() -> &'static str {
    "ok"
}

fn encoded<T: Serialize>(operation: &str, message: &T) -> Response {
    match protocol::encode(operation, message) {
        Ok(bytes) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], bytes).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn bad_request(err: TransportError) -> Response {
    tracing::warn!(error = %err, "rejecting malformed request");
    (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

fn internal_error(operation: &str, err: skiff_core::CoreError) -> Response {
    tracing::error!(operation, kind = err.kind(), error = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PeerClient;
    use skiff_core::{CallFrame, CoreError, FunctionIndex, SessionId, Snapshot};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        executes: Mutex<Vec<ExecuteRequest>>,
        finishes: Mutex<Vec<FinishRequest>>,
        delay: Option<Duration>,
        fail: bool,
    }

    #[async_trait]
    impl ExecutorService for Recorder {
        async fn execute(&self, request: ExecuteRequest) -> CoreResult<ExecuteResponse> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(CoreError::EngineFault {
                    reason: "cannot resume".to_string(),
                });
            }
            self.executes.lock().unwrap().push(request);
            Ok(ExecuteResponse { ok: true })
        }

        async fn finish(&self, request: FinishRequest) -> CoreResult<FinishResponse> {
            self.finishes.lock().unwrap().push(request);
            Ok(FinishResponse {})
        }
    }

    async fn start(service: Arc<Recorder>) -> (PeerClient, CancellationToken, tokio::task::JoinHandle<()>) {
        let server = PeerServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.serve(service, token).await.unwrap();
        });
        let client = PeerClient::with_timeout(&addr.to_string(), Duration::from_secs(2)).unwrap();
        (client, shutdown, handle)
    }

    fn snapshot() -> Snapshot {
        Snapshot::capture(
            vec![CallFrame::new(FunctionIndex(0), 6).with_locals(vec![9])],
            FunctionIndex(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_finish() {
        let service = Arc::new(Recorder::default());
        let (client, shutdown, handle) = start(Arc::clone(&service)).await;
        let session = SessionId::new();

        client.health().await.unwrap();

        let response = client
            .execute(&ExecuteRequest::resume(session, "fib", snapshot()))
            .await
            .unwrap();
        assert!(response.ok);
        client.finish(session).await.unwrap();

        {
            let executes = service.executes.lock().unwrap();
            assert_eq!(executes.len(), 1);
            assert_eq!(executes[0].session_id, session);
            assert_eq!(executes[0].program, "fib");
            assert_eq!(executes[0].snapshot, Some(snapshot()));
        }
        assert_eq!(service.finishes.lock().unwrap().len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let service = Arc::new(Recorder::default());
        let (client, shutdown, handle) = start(service).await;

        let response = reqwest::Client::new()
            .post(format!("{}{}", client.base_url(), EXECUTE_PATH))
            .body(vec![0xffu8; 5])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_bad_request() {
        let service = Arc::new(Recorder::default());
        let (client, shutdown, handle) = start(Arc::clone(&service)).await;

        let empty = Snapshot {
            valid: true,
            frames: Vec::new(),
            entry_function_index: FunctionIndex(0),
        };
        let err = client
            .execute(&ExecuteRequest::resume(SessionId::new(), "fib", empty))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 400, .. }), "{err:?}");
        assert!(service.executes.lock().unwrap().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_service_error_is_500() {
        let service = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let (client, shutdown, handle) = start(service).await;

        let err = client
            .execute(&ExecuteRequest::start(SessionId::new(), "fib"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 500, .. }), "{err:?}");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_peer_times_out() {
        let service = Arc::new(Recorder {
            delay: Some(Duration::from_secs(2)),
            ..Recorder::default()
        });
        let server = PeerServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(service, shutdown.clone()));

        let client = PeerClient::with_timeout(&addr.to_string(), Duration::from_millis(100)).unwrap();
        let err = client
            .execute(&ExecuteRequest::start(SessionId::new(), "fib"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }), "{err:?}");

        shutdown.cancel();
        handle.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = PeerServer::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().to_string();
        let err = PeerServer::bind(&addr).await.err().unwrap();
        assert!(matches!(err, TransportError::Server { .. }));
    }
}
