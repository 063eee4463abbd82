//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, origin connections, tunnels, blocks)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by route, status
//! - `proxy_origin_connections_total` (counter): pooled connections by outcome
//! - `proxy_tunnel_bytes_total` (counter): CONNECT payload by direction
//! - `proxy_blocked_requests_total` (counter): block rule hits by action
//! - `proxy_active_connections` (gauge): current client connection count
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are static strings, except the status code

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// One finished request cycle.
pub fn record_request(route: &'static str, status: u16) {
    metrics::counter!(
        "proxy_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}

/// `outcome` is one of `reused`, `opened`, `evicted`.
pub fn record_origin_connection(outcome: &'static str) {
    metrics::counter!("proxy_origin_connections_total", "outcome" => outcome).increment(1);
}

pub fn record_tunnel_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("proxy_tunnel_bytes_total", "direction" => direction).increment(bytes);
}

pub fn record_blocked(action: &'static str) {
    metrics::counter!("proxy_blocked_requests_total", "action" => action).increment(1);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}
