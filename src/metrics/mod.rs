//! Prometheus metrics for the delivery core.
//!
//! This module exposes metrics for:
//! - Connections (active, added, removed, rejected at admission)
//! - Outbound buffer occupancy and drops
//! - Broadcast outcomes and per-connection delivery counts
//! - Process memory, pressure transitions and reclamation

mod helpers;

pub use helpers::{
    encode_metrics, BroadcastMetrics, BufferMetrics, ConnectionMetrics, MemoryMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "rtd";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections currently held by the registry
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Connections currently held by the registry"
    ).unwrap();

    /// Number of unique connected users
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique connected users"
    ).unwrap();

    pub static ref CONNECTIONS_ADDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_added_total", METRIC_PREFIX),
        "Total connections registered"
    ).unwrap();

    pub static ref CONNECTIONS_REMOVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_removed_total", METRIC_PREFIX),
        "Total connections explicitly unregistered"
    ).unwrap();

    /// Connections refused, by reason (memory, registry)
    pub static ref CONNECTIONS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total connections refused",
        &["reason"]
    ).unwrap();

    /// Dead connections evicted by sweeps or lazily on read
    pub static ref CONNECTIONS_STALE_REMOVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_stale_removed_total", METRIC_PREFIX),
        "Total dead connections evicted"
    ).unwrap();

    // ============================================================================
    // Buffer Metrics
    // ============================================================================

    pub static ref BUFFER_SIZE_BYTES: IntGauge = register_int_gauge!(
        format!("{}_buffer_size_bytes", METRIC_PREFIX),
        "Bytes currently staged in the outbound buffer"
    ).unwrap();

    pub static ref BUFFER_MESSAGES: IntGauge = register_int_gauge!(
        format!("{}_buffer_messages", METRIC_PREFIX),
        "Messages currently staged in the outbound buffer"
    ).unwrap();

    /// Messages refused by the buffer
    pub static ref BUFFER_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_buffer_dropped_total", METRIC_PREFIX),
        "Total messages refused by the outbound buffer"
    ).unwrap();

    /// Old messages evicted to make room for new ones
    pub static ref BUFFER_EVICTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_buffer_evicted_total", METRIC_PREFIX),
        "Total messages evicted from the outbound buffer"
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Broadcast calls by outcome
    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Total broadcast calls",
        &["status"]
    ).unwrap();

    /// Total messages delivered (connection count)
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages successfully delivered to connections"
    ).unwrap();

    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total per-connection delivery failures"
    ).unwrap();

    pub static ref BROADCAST_DURATION: Histogram = register_histogram!(
        format!("{}_broadcast_duration_seconds", METRIC_PREFIX),
        "Wall time of a broadcast fan-out in seconds",
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    pub static ref CLEANUP_CYCLES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_cleanup_cycles_total", METRIC_PREFIX),
        "Total periodic cleanup cycles run"
    ).unwrap();

    // ============================================================================
    // Memory Metrics
    // ============================================================================

    /// Process resident memory as last sampled
    pub static ref PROCESS_MEMORY_BYTES: IntGauge = register_int_gauge!(
        format!("{}_process_memory_bytes", METRIC_PREFIX),
        "Process resident memory in bytes"
    ).unwrap();

    /// 0 = normal, 1 = warning, 2 = critical
    pub static ref MEMORY_PRESSURE_LEVEL: IntGauge = register_int_gauge!(
        format!("{}_memory_pressure_level", METRIC_PREFIX),
        "Current memory pressure level (0=normal, 1=warning, 2=critical)"
    ).unwrap();

    pub static ref MEMORY_PRESSURE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_memory_pressure_events_total", METRIC_PREFIX),
        "Total pressure notifications dispatched",
        &["level"]
    ).unwrap();

    pub static ref MEMORY_SAMPLE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_memory_sample_failures_total", METRIC_PREFIX),
        "Total failed memory samples"
    ).unwrap();

    pub static ref PRESSURE_CALLBACK_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pressure_callback_failures_total", METRIC_PREFIX),
        "Total pressure callbacks that returned an error or panicked"
    ).unwrap();

    /// Reclamation runs by mode (normal, aggressive)
    pub static ref RECLAIM_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_reclaim_total", METRIC_PREFIX),
        "Total reclamation runs",
        &["mode"]
    ).unwrap();

    pub static ref RECLAIM_BYTES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reclaim_bytes_total", METRIC_PREFIX),
        "Estimated bytes released by reclamation"
    ).unwrap();

    pub static ref RECLAIM_DURATION: Histogram = register_histogram!(
        format!("{}_reclaim_duration_seconds", METRIC_PREFIX),
        "Reclamation duration in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered() {
        CONNECTIONS_ADDED_TOTAL.inc();
        BROADCASTS_TOTAL.with_label_values(&["delivered"]).inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("rtd_connections_added_total"));
        assert!(output.contains("rtd_broadcasts_total"));
    }
}
