//! Metrics collection.
//!
//! # Metrics
//! - `docstore_requests_total` (counter): physical and cached executions by method, status
//! - `docstore_request_duration_seconds` (histogram): execution latency
//! - `docstore_cache_hits_total` (counter): responses served from cache by kind
//! - `docstore_cache_evictions_total` (counter): LRU evictions
//! - `docstore_cache_entries` (gauge): current cache size
//! - `docstore_failover_total` (counter): failures reported per destination
//!
//! # Design Decisions
//! - Only the `metrics` facade is used; the embedding application installs an exporter
//! - Labels are low-cardinality (no URLs on request metrics)

use std::time::Duration;

use crate::observability::events::RequestStatus;

pub fn record_request(method: &str, status: RequestStatus, duration: Duration) {
    metrics::counter!(
        "docstore_requests_total",
        "method" => method.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
    metrics::histogram!("docstore_request_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_cache_hit(kind: RequestStatus) {
    metrics::counter!("docstore_cache_hits_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_cache_eviction() {
    metrics::counter!("docstore_cache_evictions_total").increment(1);
}

pub fn record_cache_size(size: usize) {
    metrics::gauge!("docstore_cache_entries").set(size as f64);
}

pub fn record_destination_failure(url: &str) {
    metrics::counter!("docstore_failover_total", "url" => url.to_string()).increment(1);
}
