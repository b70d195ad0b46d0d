//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use batchlog_core::health::{ComponentStatus, HealthCheck, HealthStatus};
use batchlog_core::metrics::CacheMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub cache_name: String,
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<CacheMetrics>,
}

/// Health response structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub cache: String,
    pub buffered_events: u64,
    pub flushes_in_flight: u64,
    pub components: HashMap<String, ComponentStatusResponse>,
}

/// Component status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentStatusResponse {
    fn from(status: &ComponentStatus) -> Self {
        let (status, message) = match status {
            ComponentStatus::Healthy => ("healthy", None),
            ComponentStatus::Degraded(msg) => ("degraded", Some(msg.clone())),
            ComponentStatus::Unhealthy(msg) => ("unhealthy", Some(msg.clone())),
            ComponentStatus::Unknown => ("unknown", None),
        };
        ComponentStatusResponse {
            status: status.to_string(),
            message,
        }
    }
}

fn health_routes() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
}

fn metrics_routes() -> Router<Arc<ServerState>> {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn bind(port: u16, what: &str) -> Option<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!(port, "{} server started", what);
            Some(listener)
        }
        Err(e) => {
            error!(error = %e, port, "Failed to bind {} server", what);
            None
        }
    }
}

/// Start the HTTP server for health and metrics.
///
/// Both route sets share one listener when the ports are equal.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if health_port == metrics_port {
        let Some(listener) = bind(health_port, "Health and metrics").await else {
            return;
        };
        let router = health_routes().merge(metrics_routes()).with_state(state);
        let server = async {
            axum::serve(listener, router)
                .await
                .map_err(|e| error!(error = %e, "HTTP server error"))
        };

        tokio::select! {
            _ = server => {}
            _ = shutdown_rx.recv() => {
                info!("HTTP server shutting down");
            }
        }
        return;
    }

    let Some(health_listener) = bind(health_port, "Health").await else {
        return;
    };
    let Some(metrics_listener) = bind(metrics_port, "Metrics").await else {
        return;
    };

    let health_server = async {
        axum::serve(health_listener, health_routes().with_state(Arc::clone(&state)))
            .await
            .map_err(|e| error!(error = %e, "Health server error"))
    };

    let metrics_server = async {
        axum::serve(metrics_listener, metrics_routes().with_state(Arc::clone(&state)))
            .await
            .map_err(|e| error!(error = %e, "Metrics server error"))
    };

    tokio::select! {
        _ = health_server => {}
        _ = metrics_server => {}
        _ = shutdown_rx.recv() => {
            info!("HTTP servers shutting down");
        }
    }
}

fn health_response(state: &ServerState) -> (StatusCode, HealthResponse) {
    let overall = state.health.overall_status();

    let components = state
        .health
        .get_all_statuses()
        .iter()
        .map(|(k, v)| (k.clone(), ComponentStatusResponse::from(v)))
        .collect();

    let status_str = match overall {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    };

    let status_code = match overall {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        HealthResponse {
            status: status_str.to_string(),
            cache: state.cache_name.clone(),
            buffered_events: state.metrics.buffer_event_count(),
            flushes_in_flight: state.metrics.flushes_in_flight(),
            components,
        },
    )
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let (status_code, response) = health_response(&state);
    (status_code, Json(response))
}

/// Liveness probe handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.overall_status() != HealthStatus::Unhealthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.export_prometheus_text(),
    )
}
