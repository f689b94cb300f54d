//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCASTS_TOTAL, BROADCAST_DURATION, BUFFER_DROPPED_TOTAL, BUFFER_EVICTED_TOTAL,
    BUFFER_MESSAGES, BUFFER_SIZE_BYTES, CLEANUP_CYCLES_TOTAL, CONNECTIONS_ACTIVE,
    CONNECTIONS_ADDED_TOTAL, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_REMOVED_TOTAL,
    CONNECTIONS_STALE_REMOVED_TOTAL, MEMORY_PRESSURE_EVENTS_TOTAL, MEMORY_PRESSURE_LEVEL,
    MEMORY_SAMPLE_FAILURES_TOTAL, MESSAGES_DELIVERED_TOTAL, MESSAGES_FAILED_TOTAL,
    PRESSURE_CALLBACK_FAILURES_TOTAL, PROCESS_MEMORY_BYTES, RECLAIM_BYTES_TOTAL,
    RECLAIM_DURATION, RECLAIM_TOTAL, USERS_CONNECTED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

fn clamp_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Helper struct for recording connection registry metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_added() {
        CONNECTIONS_ADDED_TOTAL.inc();
    }

    pub fn record_removed() {
        CONNECTIONS_REMOVED_TOTAL.inc();
    }

    /// Record a refused connection (`memory` or `registry`)
    pub fn record_rejected(reason: &str) {
        CONNECTIONS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_stale_removed(count: u64) {
        CONNECTIONS_STALE_REMOVED_TOTAL.inc_by(count);
    }

    /// Update gauges from a registry snapshot
    pub fn set_active(connections: usize, users: usize) {
        CONNECTIONS_ACTIVE.set(clamp_i64(connections));
        USERS_CONNECTED.set(clamp_i64(users));
    }
}

/// Helper struct for recording buffer metrics
pub struct BufferMetrics;

impl BufferMetrics {
    pub fn record_dropped() {
        BUFFER_DROPPED_TOTAL.inc();
    }

    pub fn record_evicted(count: u64) {
        if count > 0 {
            BUFFER_EVICTED_TOTAL.inc_by(count);
        }
    }

    pub fn set_usage(size_bytes: usize, messages: usize) {
        BUFFER_SIZE_BYTES.set(clamp_i64(size_bytes));
        BUFFER_MESSAGES.set(clamp_i64(messages));
    }
}

/// Helper struct for recording broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    /// Record one broadcast call and its per-connection outcome
    pub fn record(status: &str, delivered: u64, failed: u64, elapsed: Duration) {
        BROADCASTS_TOTAL.with_label_values(&[status]).inc();
        if delivered > 0 {
            MESSAGES_DELIVERED_TOTAL.inc_by(delivered);
        }
        if failed > 0 {
            MESSAGES_FAILED_TOTAL.inc_by(failed);
        }
        BROADCAST_DURATION.observe(elapsed.as_secs_f64());
    }

    pub fn record_cleanup_cycle() {
        CLEANUP_CYCLES_TOTAL.inc();
    }
}

/// Helper struct for recording memory and pressure metrics
pub struct MemoryMetrics;

impl MemoryMetrics {
    pub fn set_process_memory(bytes: u64) {
        PROCESS_MEMORY_BYTES.set(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    /// 0 = normal, 1 = warning, 2 = critical
    pub fn set_pressure_level(level: i64) {
        MEMORY_PRESSURE_LEVEL.set(level);
    }

    pub fn record_pressure_event(level: &str) {
        MEMORY_PRESSURE_EVENTS_TOTAL.with_label_values(&[level]).inc();
    }

    pub fn record_sample_failure() {
        MEMORY_SAMPLE_FAILURES_TOTAL.inc();
    }

    pub fn record_callback_failure() {
        PRESSURE_CALLBACK_FAILURES_TOTAL.inc();
    }

    pub fn record_reclaim(aggressive: bool, bytes: u64, elapsed: Duration) {
        let mode = if aggressive { "aggressive" } else { "normal" };
        RECLAIM_TOTAL.with_label_values(&[mode]).inc();
        RECLAIM_BYTES_TOTAL.inc_by(bytes);
        RECLAIM_DURATION.observe(elapsed.as_secs_f64());
    }
}
