//! Prometheus metrics for the chat relay.
//!
//! Delivery-path failures never reach the sender of a message, so these
//! counters (together with the logs) are the way to observe them:
//! - Send metrics (accepted, persistence failures)
//! - Live push metrics (pushed, failed, requeued)
//! - Offline queue metrics (enqueued, drained, restored, errors)
//! - Presence metrics (users online, stream duration)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "chat";

lazy_static! {
    // ============================================================================
    // Send Metrics
    // ============================================================================

    /// Messages accepted by the send operation
    pub static ref MESSAGES_ACCEPTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_accepted_total", METRIC_PREFIX),
        "Total messages persisted and accepted for delivery"
    ).unwrap();

    /// Sends rejected because the message could not be persisted
    pub static ref PERSIST_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_persist_failures_total", METRIC_PREFIX),
        "Total sends rejected by the durable message store"
    ).unwrap();

    /// Accepted messages by route taken
    pub static ref MESSAGES_ROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_routed_total", METRIC_PREFIX),
        "Accepted messages by delivery route",
        &["route"]
    ).unwrap();

    // ============================================================================
    // Live Push Metrics
    // ============================================================================

    /// Live pushes that reached the connection channel
    pub static ref PUSH_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_push_delivered_total", METRIC_PREFIX),
        "Total messages pushed to a live connection"
    ).unwrap();

    /// Live pushes that failed (connection already gone)
    pub static ref PUSH_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_push_failed_total", METRIC_PREFIX),
        "Total live pushes that failed"
    ).unwrap();

    /// Failed pushes that could not be requeued either
    pub static ref MESSAGES_LOST_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_lost_total", METRIC_PREFIX),
        "Total messages neither pushed nor queued"
    ).unwrap();

    // ============================================================================
    // Offline Queue Metrics
    // ============================================================================

    pub static ref QUEUE_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_enqueued_total", METRIC_PREFIX),
        "Total messages appended to offline queues"
    ).unwrap();

    pub static ref QUEUE_DRAINED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_drained_total", METRIC_PREFIX),
        "Total queued messages forwarded on reconnect"
    ).unwrap();

    pub static ref QUEUE_RESTORED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_restored_total", METRIC_PREFIX),
        "Total drained messages put back after an interrupted flush"
    ).unwrap();

    /// Offline queue storage failures by operation
    pub static ref QUEUE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_errors_total", METRIC_PREFIX),
        "Offline queue storage failures",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Presence Metrics
    // ============================================================================

    pub static ref USERS_ONLINE: IntGauge = register_int_gauge!(
        format!("{}_users_online", METRIC_PREFIX),
        "Number of users with a live delivery stream"
    ).unwrap();

    /// Delivery stream lifetime
    pub static ref DELIVERY_STREAM_DURATION: Histogram = register_histogram!(
        format!("{}_delivery_stream_duration_seconds", METRIC_PREFIX),
        "Lifetime of delivery streams in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Record the route taken by an accepted message
pub fn record_route(route: &str) {
    MESSAGES_ROUTED_TOTAL.with_label_values(&[route]).inc();
}

/// Record an offline queue storage failure
pub fn record_queue_error(operation: &str) {
    QUEUE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}
