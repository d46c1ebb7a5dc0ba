//! Axum-based status server.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use foxden_core::config::Config;
use foxden_core::endpoint::rewrite_advertised;
use foxden_pool::PoolRegistry;

use crate::metrics::record_pool_gauges;

/// Shared state for all status handlers.
pub struct StatusState {
    pub config: Arc<Config>,
    pub registry: Arc<PoolRegistry>,
    pub metrics: PrometheusHandle,
}

/// Build the status router. Unknown paths fall through to axum's 404.
pub fn router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readiness", get(ready_handler))
        .route("/browsers", get(browsers_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the status server; runs until `shutdown` is cancelled.
pub async fn start_status_server(
    state: Arc<StatusState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bind_addr = state.config.status_bind();
    let port = state.config.status_port();
    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Status service listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Status service shutting down");
        })
        .await?;

    Ok(())
}

async fn health_handler(State(_state): State<Arc<StatusState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "foxden",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ready_handler(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    let counts = state.registry.counts().await;
    let launch_complete = state.registry.launch_complete().await;
    let ready = launch_complete && counts.ready > 0;

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        axum::Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "browsers_available": counts.ready,
            "browsers_total": counts.total,
            "pool_size": state.registry.pool_size(),
        })),
    )
}

async fn browsers_handler(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    let advertise = state.config.advertise_host();
    let snapshot = state.registry.snapshot().await;

    let browsers: Vec<_> = snapshot
        .iter()
        .map(|slot| {
            json!({
                "id": slot.id,
                "endpoint": advertised(slot.published_endpoint.as_deref(), advertise.as_deref()),
                "status": slot.status.to_string(),
                "started_at": slot.started_at.to_rfc3339(),
            })
        })
        .collect();

    let primary = state
        .registry
        .primary_endpoint()
        .await
        .and_then(|e| advertised(Some(&e), advertise.as_deref()));

    axum::Json(json!({
        "browsers": browsers,
        "primary_endpoint": primary,
    }))
}

async fn metrics_handler(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    let counts = state.registry.counts().await;
    record_pool_gauges(state.registry.pool_size(), &counts);
    state.metrics.render()
}

/// Apply the advertise-host rewrite to a published endpoint. An endpoint that
/// cannot be parsed is passed through unchanged rather than dropped.
fn advertised(endpoint: Option<&str>, advertise: Option<&str>) -> Option<String> {
    let endpoint = endpoint?;
    match advertise {
        Some(host) => {
            Some(rewrite_advertised(endpoint, host).unwrap_or_else(|| endpoint.to_string()))
        }
        None => Some(endpoint.to_string()),
    }
}
