//! Status service integration tests — start a real server and query it over HTTP.
//!
//! Run with: `cargo test -p foxden-status --test integration`

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use foxden_core::config::{Config, StatusConfig};
use foxden_pool::PoolRegistry;
use foxden_status::metrics::install_prometheus_recorder;
use foxden_status::{StatusState, start_status_server};

static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();

/// The Prometheus recorder can only be installed once per process.
fn metrics_handle() -> PrometheusHandle {
    METRICS.get_or_init(install_prometheus_recorder).clone()
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a status server over a fresh registry and wait until it answers.
async fn start_test_server(
    pool_size: usize,
    advertise_host: Option<&str>,
) -> (Arc<PoolRegistry>, u16, CancellationToken) {
    let port = find_free_port();

    let config = Config {
        status: Some(StatusConfig {
            port,
            bind: "127.0.0.1".into(),
            advertise_host: advertise_host.map(Into::into),
        }),
        ..Config::default()
    };

    let registry = Arc::new(PoolRegistry::new(pool_size));
    let state = Arc::new(StatusState {
        config: Arc::new(config),
        registry: registry.clone(),
        metrics: metrics_handle(),
    });

    let token = CancellationToken::new();
    let server_token = token.clone();
    tokio::spawn(async move {
        let _ = start_status_server(state, server_token).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (registry, port, token)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_registry, port, _token) = start_test_server(3, None).await;

    for path in ["health", "healthz"] {
        let resp = reqwest::get(format!("http://127.0.0.1:{port}/{path}"))
            .await
            .expect("health request failed");
        assert!(resp.status().is_success());

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "foxden");
        assert!(body["version"].is_string());
        assert!(body["timestamp"].is_string());
    }
}

#[tokio::test]
async fn test_readiness_tracks_ready_count() {
    let (registry, port, _token) = start_test_server(2, None).await;
    let url = format!("http://127.0.0.1:{port}/ready");

    // Nothing launched yet: 503.
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "not_ready");
    assert_eq!(body["browsers_available"], 0);
    assert_eq!(body["pool_size"], 2);

    // One ready slot but launch pass still running: still 503.
    registry.insert_starting(0).await;
    registry
        .mark_ready(
            0,
            "ws://127.0.0.1:40001/s0".into(),
            "ws://127.0.0.1:3001/s0".into(),
        )
        .await;
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    // Launch pass complete: 200 with at least one browser available.
    registry.set_launch_complete().await;
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["browsers_available"], 1);
    assert_eq!(body["browsers_total"], 1);
    assert_eq!(body["pool_size"], 2);
}

#[tokio::test]
async fn test_browsers_listing_rewrites_advertise_host() {
    let (registry, port, _token) = start_test_server(2, Some("example.com:9000")).await;

    registry.insert_starting(0).await;
    registry
        .mark_ready(
            0,
            "ws://127.0.0.1:40002/s1".into(),
            "ws://localhost:3001/s1".into(),
        )
        .await;
    registry.insert_starting(1).await;
    registry.mark_failed(1).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/browsers"))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();

    let browsers = body["browsers"].as_array().unwrap();
    assert_eq!(browsers.len(), 2);

    assert_eq!(browsers[0]["id"], "browser-0");
    assert_eq!(browsers[0]["endpoint"], "ws://example.com:9000/s1");
    assert_eq!(browsers[0]["status"], "ready");
    assert!(browsers[0]["started_at"].is_string());

    assert_eq!(browsers[1]["id"], "browser-1");
    assert_eq!(browsers[1]["status"], "failed");
    assert!(browsers[1]["endpoint"].is_null());

    assert_eq!(body["primary_endpoint"], "ws://example.com:9000/s1");
}

#[tokio::test]
async fn test_browsers_listing_bare_advertise_host_keeps_port() {
    let (registry, port, _token) = start_test_server(1, Some("example.com")).await;

    registry.insert_starting(0).await;
    registry
        .mark_ready(
            0,
            "ws://127.0.0.1:40003/s1".into(),
            "ws://localhost:3001/s1".into(),
        )
        .await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/browsers"))
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["browsers"][0]["endpoint"], "ws://example.com:3001/s1");
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (registry, port, _token) = start_test_server(3, None).await;

    registry.insert_starting(0).await;
    registry
        .mark_ready(
            0,
            "ws://127.0.0.1:40004/m".into(),
            "ws://127.0.0.1:3001/m".into(),
        )
        .await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/metrics"))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let text = resp.text().await.unwrap();

    for name in [
        "foxden_browsers_total",
        "foxden_browsers_ready",
        "foxden_browsers_busy",
        "foxden_pool_size",
    ] {
        assert!(text.contains(name), "missing gauge {name} in:\n{text}");
    }
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (_registry, port, _token) = start_test_server(1, None).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}
