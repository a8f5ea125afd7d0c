//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, upstream errors, signing failures)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, service
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upstream_errors_total` (counter): failed dispatches by error class
//! - `proxy_direct_responses_total` (counter): direct responses by service
//! - `proxy_signing_failures_total` (counter): signing failures by kind
//! - `proxy_buffer_pool_idle` (gauge): idle pooled copy buffers
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are low-cardinality: never paths or request ids

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one finished exchange.
pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "service" => service.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(class: &str) {
    ::metrics::counter!("proxy_upstream_errors_total", "class" => class.to_string()).increment(1);
}

pub fn record_direct_response(service: &str) {
    ::metrics::counter!("proxy_direct_responses_total", "service" => service.to_string()).increment(1);
}

pub fn record_signing_failure(kind: &str) {
    ::metrics::counter!("proxy_signing_failures_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_buffer_pool_idle(idle: usize) {
    ::metrics::gauge!("proxy_buffer_pool_idle").set(idle as f64);
}
