//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, node
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_auth_outcomes_total` (counter): outcomes by scheme and result
//! - `proxy_backups_total` (counter): backups by compression and result
//! - `proxy_certificates_loaded` (gauge): size of the registry snapshot
//!
//! # Design Decisions
//! - The `metrics` facade drops updates until the exporter is installed
//! - Labels stay low-cardinality (no paths, no user names)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, node: &str, started: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "node" => node.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "node" => node.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_auth(scheme: &str, outcome: &str) {
    metrics::counter!(
        "proxy_auth_outcomes_total",
        "scheme" => scheme.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_backup(compression: &str, success: bool) {
    metrics::counter!(
        "proxy_backups_total",
        "compression" => compression.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

pub fn set_certificates_loaded(count: usize) {
    metrics::gauge!("proxy_certificates_loaded").set(count as f64);
}
