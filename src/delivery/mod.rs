//! Broadcast coordination over the registry, buffer and resource monitor.

mod coordinator;
mod types;

pub use coordinator::BroadcastCoordinator;
pub use types::{
    BroadcastResult, BroadcastStatus, CleanupOutcome, ComprehensiveStats, CoordinatorStats,
    CoordinatorStatsSnapshot,
};
