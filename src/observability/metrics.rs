//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define engine metrics (requests, matches, zombies, backlog)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `server_requested_calls_total` (counter): application requests by kind
//! - `server_cqs_checked_total` (counter): queues probed before a fast match
//! - `server_slowpath_requests_queued_total` (counter): calls parked as pending
//! - `server_calls_published_total` (counter): matches by path (fast, slow, drain, allocated)
//! - `server_calls_zombied_total` (counter): discarded calls by reason
//! - `server_requests_failed_total` (counter): failed requests by reason
//! - `server_pending_calls` (gauge): pending list length per matcher
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are static strings except the matcher name

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Where a call was matched with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPath {
    Fast,
    Slow,
    Drain,
    Allocated,
}

impl PublishPath {
    fn as_str(self) -> &'static str {
        match self {
            PublishPath::Fast => "fast",
            PublishPath::Slow => "slow",
            PublishPath::Drain => "drain",
            PublishPath::Allocated => "allocated",
        }
    }
}

/// Initialize the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_requested_call(kind: &'static str) {
    ::metrics::counter!("server_requested_calls_total", "kind" => kind).increment(1);
}

pub fn record_cqs_checked(count: usize) {
    ::metrics::counter!("server_cqs_checked_total").increment(count as u64);
}

pub fn record_slowpath_queued() {
    ::metrics::counter!("server_slowpath_requests_queued_total").increment(1);
}

pub fn record_published(path: PublishPath) {
    ::metrics::counter!("server_calls_published_total", "path" => path.as_str()).increment(1);
}

pub fn record_zombied(reason: &'static str) {
    ::metrics::counter!("server_calls_zombied_total", "reason" => reason).increment(1);
}

pub fn record_request_failed(reason: &'static str) {
    ::metrics::counter!("server_requests_failed_total", "reason" => reason).increment(1);
}

pub fn record_pending_calls(matcher: &str, len: usize) {
    ::metrics::gauge!("server_pending_calls", "matcher" => matcher.to_string()).set(len as f64);
}
