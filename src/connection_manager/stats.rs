//! Registry statistics and info structures

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::ConnectionState;

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub avg_connections_per_user: f64,
    pub connections_added: u64,
    pub connections_removed: u64,
    pub stale_removed: u64,
    pub errors: u64,
}

/// Snapshot of a single registered connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub user_id: Option<String>,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub metadata: HashMap<String, String>,
}
