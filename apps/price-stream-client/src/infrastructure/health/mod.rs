//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (authenticated feed)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{ConnectionState, ConnectionStatus, StatusError};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::cache::PriceCache;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub feed: FeedInfo,
    /// Desired subscriptions.
    pub subscriptions: SubscriptionStatus,
    /// Price cache.
    pub cache: CacheStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Authenticated and streaming.
    Healthy,
    /// Connecting or recovering.
    Degraded,
    /// Down with no recovery in progress.
    Unhealthy,
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: &'static str,
    /// Whether the feed is authenticated.
    pub connected: bool,
    /// Whether a reconnect is scheduled.
    pub reconnecting: bool,
    /// Consecutive failed attempts.
    pub reconnect_attempts: u32,
    /// Most recent error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<StatusError>,
    /// When the current session was established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
}

impl From<&ConnectionStatus> for FeedInfo {
    fn from(status: &ConnectionStatus) -> Self {
        Self {
            state: status.state.as_str(),
            connected: status.is_authenticated(),
            reconnecting: status.reconnecting,
            reconnect_attempts: status.reconnect_attempts,
            last_error: status.last_error.clone(),
            connected_since: status.connected_since,
        }
    }
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Symbols the caller wants.
    pub desired: usize,
    /// Symbols subscribed on the current transport.
    pub on_wire: usize,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Symbols with a known price.
    pub symbols: usize,
    /// Live update observers.
    pub observers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    status: watch::Receiver<ConnectionStatus>,
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<PriceCache>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        status: watch::Receiver<ConnectionStatus>,
        registry: Arc<SubscriptionRegistry>,
        cache: Arc<PriceCache>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status,
            registry,
            cache,
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

    /// Build the HTTP routes.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
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
    if state.status.borrow().is_authenticated() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = FeedInfo::from(&*state.status.borrow());
    let subscriptions = state.registry.stats();

    HealthResponse {
        status: determine_health_status(&feed),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        subscriptions: SubscriptionStatus {
            desired: subscriptions.desired,
            on_wire: subscriptions.on_wire,
        },
        cache: CacheStatus {
            symbols: state.cache.len(),
            observers: state.cache.observer_count(),
        },
    }
}

fn determine_health_status(feed: &FeedInfo) -> HealthStatus {
    if feed.connected {
        return HealthStatus::Healthy;
    }
    if feed.last_error.as_ref().is_some_and(StatusError::is_auth) && !feed.reconnecting {
        return HealthStatus::Unhealthy;
    }
    if feed.reconnecting || feed.state != ConnectionState::Disconnected.as_str() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::persistence::MemorySnapshotStore;

    async fn state_with(
        status: ConnectionStatus,
    ) -> (Arc<HealthServerState>, watch::Sender<ConnectionStatus>) {
        let (tx, rx) = watch::channel(status);
        let cache = PriceCache::load(
            Arc::new(MemorySnapshotStore::new()),
            std::time::Duration::from_secs(60),
            16,
        )
        .await;
        let registry = Arc::new(SubscriptionRegistry::new());
        registry.subscribe(["AAPL", "MSFT"]);

        let state = HealthServerState::new("test".to_string(), rx, registry, Arc::new(cache));
        (Arc::new(state), tx)
    }

    fn authenticated() -> ConnectionStatus {
        ConnectionStatus {
            state: ConnectionState::Authenticated,
            connected_since: Some(Utc::now()),
            ..ConnectionStatus::default()
        }
    }

    async fn get_status(router: Router, path: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_authenticated() {
        let feed = FeedInfo::from(&authenticated());
        assert_eq!(determine_health_status(&feed), HealthStatus::Healthy);
    }

    #[test]
    fn determine_status_reconnecting() {
        let status = ConnectionStatus {
            reconnecting: true,
            reconnect_attempts: 3,
            last_error: Some(StatusError::Transport("refused".to_string())),
            ..ConnectionStatus::default()
        };
        let feed = FeedInfo::from(&status);
        assert_eq!(determine_health_status(&feed), HealthStatus::Degraded);
    }

    #[test]
    fn determine_status_idle() {
        let feed = FeedInfo::from(&ConnectionStatus::default());
        assert_eq!(determine_health_status(&feed), HealthStatus::Unhealthy);
    }

    #[test]
    fn determine_status_rejected() {
        let status = ConnectionStatus {
            last_error: Some(StatusError::AuthRejected("bad key".to_string())),
            ..ConnectionStatus::default()
        };
        let feed = FeedInfo::from(&status);
        assert_eq!(determine_health_status(&feed), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn readiness_follows_connection_state() {
        let (state, tx) = state_with(ConnectionStatus::default()).await;

        assert_eq!(
            get_status(HealthServer::router(Arc::clone(&state)), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        tx.send_replace(authenticated());
        assert_eq!(
            get_status(HealthServer::router(state), "/readyz").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let (state, _tx) = state_with(ConnectionStatus::default()).await;
        assert_eq!(
            get_status(HealthServer::router(state), "/healthz").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn health_reports_subscriptions() {
        let (state, _tx) = state_with(authenticated()).await;
        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.subscriptions.desired, 2);
        assert_eq!(response.subscriptions.on_wire, 0);
        assert_eq!(response.cache.symbols, 0);
        assert_eq!(response.feed.state, "authenticated");
    }
}
