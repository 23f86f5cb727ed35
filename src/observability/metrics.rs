//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, script executions, held connections)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `scriptd_requests_total` (counter): requests by method, status
//! - `scriptd_request_duration_seconds` (histogram): dispatch latency
//! - `scriptd_script_executions_total` (counter): executions by outcome
//! - `scriptd_script_duration_seconds` (histogram): time inside the engine
//! - `scriptd_held_connections` (gauge): live held connections
//! - `scriptd_connections_closed_total` (counter): closes by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Label values come from fixed sets; unknown request methods are
//!   recorded as `OTHER`

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// The label for a request method. Extension methods share one label.
pub fn method_label(method: &str) -> &'static str {
    const KNOWN: [&str; 9] = [
        "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
    ];
    KNOWN
        .into_iter()
        .find(|known| known.eq_ignore_ascii_case(method))
        .unwrap_or("OTHER")
}

/// Record one dispatched request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "scriptd_requests_total",
        "method" => method_label(method),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("scriptd_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record one pass through the script engine.
pub fn record_execution(outcome: &'static str, start: Instant) {
    counter!("scriptd_script_executions_total", "outcome" => outcome).increment(1);
    histogram!("scriptd_script_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn set_held_connections(count: usize) {
    gauge!("scriptd_held_connections").set(count as f64);
}

pub fn record_connection_closed(reason: &'static str) {
    counter!("scriptd_connections_closed_total", "reason" => reason).increment(1);
}
