//! Metrics collection and exposition.
//!
//! # Metrics
//! - `enproxy_requests_total` (counter): tunnel requests by method, status
//! - `enproxy_bytes_total` (counter): tunneled bytes by direction
//! - `enproxy_active_connections` (gauge): live connection ids on this server
//! - `enproxy_evictions_total` (counter): connections removed for idleness
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16) {
    metrics::counter!(
        "enproxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_bytes(direction: &'static str, bytes: usize) {
    metrics::counter!("enproxy_bytes_total", "direction" => direction).increment(bytes as u64);
}

pub fn set_active_connections(count: usize) {
    metrics::gauge!("enproxy_active_connections").set(count as f64);
}

pub fn record_evictions(count: usize) {
    metrics::counter!("enproxy_evictions_total").increment(count as u64);
}
