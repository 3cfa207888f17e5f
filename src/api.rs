//! HTTP server for health, status and metrics endpoints

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Role;
use crate::shutdown::Shutdown;
use crate::store::SwapStore;
use crate::types::StatusCounts;

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SwapStore>,
    pub role: Role,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn SwapStore>, role: Role) -> Self {
        Self {
            store,
            role,
            started_at: Instant::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: &'static str,
    pub uptime_secs: u64,
}

/// Swap counts by status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub role: &'static str,
    pub uptime_secs: u64,
    pub swaps: StatusCounts,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        role: state.role.as_str(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> Response {
    match state.store.count_by_status().await {
        Ok(swaps) => Json(StatusResponse {
            role: state.role.as_str(),
            uptime_secs: state.started_at.elapsed().as_secs(),
            swaps,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to count swaps for status endpoint");
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable").into_response()
        }
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    match crate::metrics::gather_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` is triggered
pub async fn start_api_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: Shutdown,
) -> eyre::Result<()> {
    let app = router(state);

    info!("API server listening on {}", addr);
    info!("  /health  - Health status (JSON)");
    info!("  /status  - Swap counts by status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.stopped().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_fixtures::new_swap;
    use crate::store::MemorySwapStore;
    use crate::types::SwapStatus;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_counts() {
        let store = Arc::new(MemorySwapStore::new());
        store.insert_if_absent(&new_swap("0x1", 0)).await.unwrap();
        store.insert_if_absent(&new_swap("0x2", 1)).await.unwrap();
        store
            .update_swap_status("0x2", Some("0xabc"), SwapStatus::Submitted)
            .await
            .unwrap();

        let state = AppState::new(store, Role::Leader);
        let response = status(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["role"], "leader");
        assert_eq!(json["swaps"]["unsigned"], 1);
        assert_eq!(json["swaps"]["submitted"], 1);
        assert_eq!(json["swaps"]["confirmed"], 0);
    }

    #[tokio::test]
    async fn test_health() {
        let state = AppState::new(Arc::new(MemorySwapStore::new()), Role::Operator);
        let Json(health) = health_check(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.role, "operator");
        assert_eq!(liveness().await, "OK");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::metrics::record_swap_created();
        let response = prometheus_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
