//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status with the stream snapshot
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the firehose connection)
//! - `GET /status` - Raw stream snapshot as JSON
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::http::{StatusCode, header};
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::delivery::ErrorSink;
use crate::infrastructure::jetstream::{ConnectionState, StatusSnapshot, StreamStatus};
use crate::infrastructure::metrics::get_metrics_handle;

/// Prometheus text exposition format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Firehose stream status.
    pub stream: StatusSnapshot,
    /// Errors discarded because the error sink was full.
    pub errors_dropped: u64,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming.
    Healthy,
    /// Connecting or waiting to reconnect.
    Degraded,
    /// Stream has stopped.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Streaming => Self::Healthy,
            ConnectionState::Idle
            | ConnectionState::Connecting
            | ConnectionState::Disconnected
            | ConnectionState::Backoff => Self::Degraded,
            ConnectionState::Cancelled => Self::Unhealthy,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    status: Arc<StreamStatus>,
    errors: ErrorSink,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, status: Arc<StreamStatus>, errors: ErrorSink) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status,
            errors,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthServerError::Bind {
                port: self.port,
                source,
            })?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.status.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn status_handler(State(state): State<Arc<HealthServerState>>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

async fn metrics_handler() -> impl IntoResponse {
    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stream = state.status.snapshot();

    HealthResponse {
        status: HealthStatus::from(stream.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream,
        errors_dropped: state.errors.dropped(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind health server to port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("health server failed")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::delivery::error_sink;

    fn state(status: Arc<StreamStatus>) -> Arc<HealthServerState> {
        let (sink, _stream) = error_sink(4);
        Arc::new(HealthServerState::new("0.1.0".to_string(), status, sink))
    }

    async fn get_status(app: Router, path: &str) -> StatusCode {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(ConnectionState::Streaming, HealthStatus::Healthy)]
    #[test_case(ConnectionState::Idle, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Backoff, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Cancelled, HealthStatus::Unhealthy)]
    fn health_follows_connection_state(state: ConnectionState, expected: HealthStatus) {
        assert_eq!(HealthStatus::from(state), expected);
    }

    #[tokio::test]
    async fn readiness_requires_connection() {
        let status = Arc::new(StreamStatus::new());
        let app = router(state(Arc::clone(&status)));

        assert_eq!(
            get_status(app.clone(), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        status.mark_connecting("wss://example.test/subscribe");
        status.mark_connected();
        assert_eq!(get_status(app, "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let app = router(state(Arc::new(StreamStatus::new())));
        assert_eq!(get_status(app, "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn stopped_stream_is_unhealthy() {
        let status = Arc::new(StreamStatus::new());
        status.set_state(ConnectionState::Cancelled);
        let app = router(state(status));
        assert_eq!(
            get_status(app, "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn status_route_serves_snapshot() {
        let status = Arc::new(StreamStatus::new());
        status.record_frame();
        let app = router(state(status));

        let request = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["frames_received"], 1);
        assert_eq!(json["state"], "idle");
    }

    #[tokio::test]
    async fn bind_failure_reports_port() {
        let listener = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = HealthServer::new(
            port,
            state(Arc::new(StreamStatus::new())),
            CancellationToken::new(),
        );
        let err = server.run().await.unwrap_err();
        assert!(matches!(err, HealthServerError::Bind { port: p, .. } if p == port));
    }

    #[test]
    fn response_carries_snapshot() {
        let status = Arc::new(StreamStatus::new());
        status.record_frame();
        let response = build_health_response(&state(status));
        assert_eq!(response.stream.frames_received, 1);
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.errors_dropped, 0);
    }
}
