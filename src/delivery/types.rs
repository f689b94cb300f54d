use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::buffer::BufferUsage;
use crate::connection_manager::RegistryStats;
use crate::monitor::MonitorReport;

/// Outcome class of a broadcast call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    /// Staged and attempted on every recipient; see `failed` for per-send errors
    Delivered,
    NoRecipients,
    /// The buffer refused the message, nothing was sent
    BufferFull,
    SerializationFailed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Delivered => "delivered",
            BroadcastStatus::NoRecipients => "no_recipients",
            BroadcastStatus::BufferFull => "buffer_full",
            BroadcastStatus::SerializationFailed => "serialization_failed",
        }
    }
}

/// Result of a broadcast operation
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastResult {
    pub sent: usize,
    pub failed: usize,
    pub total_recipients: usize,
    pub duration_ms: f64,
    /// Buffer utilization after staging, in percent
    pub buffer_utilization: f64,
    pub status: BroadcastStatus,
}

/// Outcome of one cleanup cycle
#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub stale_removed: usize,
    /// Whether usage was high enough to trigger a preventive reclamation
    pub reclaimed: bool,
}

/// Statistics for the broadcast coordinator
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub connections_added: AtomicU64,
    pub connections_removed: AtomicU64,
    /// Refused by the registry (limits, duplicates, closed handles)
    pub connections_rejected: AtomicU64,
    /// Refused by memory admission control
    pub connections_rejected_memory: AtomicU64,
    pub broadcasts: AtomicU64,
    /// Messages accepted by the buffer
    pub messages_processed: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_failed: AtomicU64,
    pub cleanup_cycles: AtomicU64,
    pub forced_reclamations: AtomicU64,
    pub pressure_events: AtomicU64,
}

impl CoordinatorStats {
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            connections_added: self.connections_added.load(Ordering::Relaxed),
            connections_removed: self.connections_removed.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_rejected_memory: self.connections_rejected_memory.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            cleanup_cycles: self.cleanup_cycles.load(Ordering::Relaxed),
            forced_reclamations: self.forced_reclamations.load(Ordering::Relaxed),
            pressure_events: self.pressure_events.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of coordinator statistics
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatsSnapshot {
    pub connections_added: u64,
    pub connections_removed: u64,
    pub connections_rejected: u64,
    pub connections_rejected_memory: u64,
    pub broadcasts: u64,
    pub messages_processed: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub cleanup_cycles: u64,
    pub forced_reclamations: u64,
    pub pressure_events: u64,
}

/// Everything `get_comprehensive_stats` reports
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveStats {
    pub connections: RegistryStats,
    pub buffer: BufferUsage,
    pub memory: MonitorReport,
    pub coordinator: CoordinatorStatsSnapshot,
    pub cleanup_running: bool,
    pub shut_down: bool,
}
