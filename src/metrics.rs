//! Metrics instrumentation for the resource engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `resource_engine_` prefix for all metrics
//! - `_total` suffix for counters
//!
//! # Labels
//! - `kind`: the registered type name
//! - `operation`: create, get, update, delete, list
//! - `status`: success, error
//! - `event`: initial, update, add, remove, delete, heartbeat

use metrics::{counter, gauge};

/// Record an engine operation.
pub fn record_operation(kind: &str, operation: &str, status: &str) {
    counter!(
        "resource_engine_operations_total",
        "kind" => kind.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a server-sent event emitted to a stream.
pub fn record_stream_event(kind: &str, event: &str) {
    counter!(
        "resource_engine_stream_events_total",
        "kind" => kind.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record a subscription killed for falling behind.
pub fn record_slow_consumer(kind: &str) {
    counter!(
        "resource_engine_slow_consumers_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an idempotent replay served from the stored record.
pub fn record_idempotent_replay() {
    counter!("resource_engine_idempotent_replays_total").increment(1);
}

/// Set the number of live single-object subscribers.
pub fn set_key_subscribers(count: usize) {
    gauge!("resource_engine_key_subscribers").set(count as f64);
}

/// Set the number of live per-type subscribers.
pub fn set_kind_subscribers(count: usize) {
    gauge!("resource_engine_kind_subscribers").set(count as f64);
}
