//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use rowcast_core::health::{ComponentStatus, HealthCheck, HealthStatus};
use rowcast_core::metrics::PublishMetrics;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<PublishMetrics>,
}

/// Health response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub job_running: bool,
    pub uptime_seconds: u64,
    pub components: HashMap<String, ComponentStatusResponse>,
}

/// Component status response.
#[derive(Debug, Serialize)]
pub struct ComponentStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentStatusResponse {
    fn from(status: &ComponentStatus) -> Self {
        ComponentStatusResponse {
            status: status.as_str().to_string(),
            message: status.message().map(str::to_string),
        }
    }
}

/// Routes served by the monitoring server.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve health and metrics on `port` until a shutdown signal arrives.
pub async fn start_server(
    state: Arc<ServerState>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "Failed to bind monitoring server");
            return;
        }
    };

    info!(port, "Monitoring server started");

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Monitoring server shutting down");
        })
        .await;

    if let Err(e) = result {
        error!(error = %e, "Monitoring server error");
    }
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let overall = state.health.overall_status();

    let components = state
        .health
        .get_all_statuses()
        .iter()
        .map(|(k, v)| (k.clone(), ComponentStatusResponse::from(v)))
        .collect();

    let response = HealthResponse {
        status: overall.as_str().to_string(),
        job_running: state.health.is_job_running(),
        uptime_seconds: state.health.uptime().as_secs(),
        components,
    };

    let status_code = match overall {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

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

#[cfg(test)]
mod tests {
    use super::*;
    use rowcast_core::health::{SINK_COMPONENT, SOURCE_COMPONENT};

    #[test]
    fn test_component_status_conversion() {
        let response: ComponentStatusResponse = (&ComponentStatus::Healthy).into();
        assert_eq!(response.status, "healthy");
        assert!(response.message.is_none());

        let response: ComponentStatusResponse =
            (&ComponentStatus::Degraded("undelivered".to_string())).into();
        assert_eq!(response.status, "degraded");
        assert_eq!(response.message, Some("undelivered".to_string()));

        let response: ComponentStatusResponse =
            (&ComponentStatus::Unhealthy("down".to_string())).into();
        assert_eq!(response.status, "unhealthy");
        assert_eq!(response.message, Some("down".to_string()));

        let response: ComponentStatusResponse = (&ComponentStatus::Unknown).into();
        assert_eq!(response.status, "unknown");
    }

    async fn serve(state: Arc<ServerState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_endpoints() {
        let health = Arc::new(HealthCheck::for_publisher());
        let metrics = Arc::new(PublishMetrics::new());
        metrics.record_row();
        health.mark_healthy(SOURCE_COMPONENT);

        let base = serve(Arc::new(ServerState {
            health: Arc::clone(&health),
            metrics: Arc::clone(&metrics),
        }))
        .await;
        let client = reqwest::Client::new();

        let response = client.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["source"]["status"], "healthy");
        assert_eq!(body["components"]["sink"]["status"], "unknown");

        let text = client
            .get(format!("{}/metrics", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("rowcast_rows_read_total 1"));

        health.mark_unhealthy(SINK_COMPONENT, "unreachable");
        let response = client.get(format!("{}/readyz", base)).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let response = client.get(format!("{}/healthz", base)).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }
}
