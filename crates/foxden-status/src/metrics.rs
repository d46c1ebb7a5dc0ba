//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use foxden_pool::PoolCounts;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Set the pool gauges from a fresh registry snapshot.
pub fn record_pool_gauges(pool_size: usize, counts: &PoolCounts) {
    metrics::gauge!("foxden_browsers_total").set(counts.total as f64);
    metrics::gauge!("foxden_browsers_ready").set(counts.ready as f64);
    metrics::gauge!("foxden_browsers_busy").set(counts.busy as f64);
    metrics::gauge!("foxden_pool_size").set(pool_size as f64);
}
