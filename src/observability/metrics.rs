//! Metrics collection and exposition.
//!
//! # Metrics
//! - `thrift_http_requests_total` (counter): requests by outcome
//! - `thrift_http_request_duration_seconds` (histogram): time from request head
//!   to response, body read included
//! - `thrift_http_active_connections` (gauge): current connection count
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "thrift_http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "thrift_http_request_duration_seconds";
pub const ACTIVE_CONNECTIONS: &str = "thrift_http_active_connections";

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished request; `start` is taken when its head arrives.
pub fn record_request(outcome: &'static str, start: Instant) {
    ::metrics::counter!(REQUESTS_TOTAL, "outcome" => outcome).increment(1);
    ::metrics::histogram!(REQUEST_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
}

pub fn set_active_connections(count: u64) {
    ::metrics::gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}
