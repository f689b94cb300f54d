use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics::ConnectionMetrics;

use super::types::ConnectionEntry;
use super::{
    ConnectionError, ConnectionInfo, ConnectionLimits, ConnectionState, RegistryStats,
    TransportHandle,
};

/// Rough per-entry footprint used when reporting reclaimed bytes
const ESTIMATED_ENTRY_BYTES: usize = 500;

#[derive(Debug, Default)]
struct RegistryCounters {
    added: AtomicU64,
    removed: AtomicU64,
    stale_removed: AtomicU64,
    errors: AtomicU64,
}

/// Tracks live connections without owning their transport handles.
///
/// Entries hold a `Weak` to the handle, so a connection the transport has
/// dropped or closed stops being returned by the next read or sweep.
pub struct ConnectionRegistry {
    /// connection_id -> entry
    connections: DashMap<String, Arc<ConnectionEntry>>,
    /// user_id -> Set<connection_id> (supports multiple devices)
    user_index: DashMap<String, HashSet<String>>,
    limits: ConnectionLimits,
    counters: RegistryCounters,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_limits(ConnectionLimits::default())
    }

    pub fn with_limits(limits: ConnectionLimits) -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            limits,
            counters: RegistryCounters::default(),
        }
    }

    /// Register a connection. Returns false (and logs) instead of failing.
    pub fn add(
        &self,
        handle: &TransportHandle,
        user_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> bool {
        match self.try_add(handle, user_id, metadata) {
            Ok(()) => {
                self.counters.added.fetch_add(1, Ordering::Relaxed);
                ConnectionMetrics::record_added();
                tracing::info!(
                    connection_id = %handle.connection_id(),
                    user_id = ?user_id,
                    "Connection registered"
                );
                true
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                ConnectionMetrics::record_rejected("registry");
                tracing::warn!(
                    connection_id = %handle.connection_id(),
                    user_id = ?user_id,
                    error = %e,
                    "Connection not registered"
                );
                false
            }
        }
    }

    fn try_add(
        &self,
        handle: &TransportHandle,
        user_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<(), ConnectionError> {
        let connection_id = handle.connection_id();
        if connection_id.is_empty() {
            return Err(ConnectionError::InvalidHandle {
                reason: "empty connection id",
            });
        }
        if handle.state() != ConnectionState::Connected {
            return Err(ConnectionError::InvalidHandle {
                reason: "transport does not report connected",
            });
        }

        if self.connections.len() >= self.limits.max_connections {
            // Dead entries should not count against the limit
            self.sweep_stale();
            let current = self.connections.len();
            if current >= self.limits.max_connections {
                return Err(ConnectionError::TotalLimitExceeded {
                    current,
                    max: self.limits.max_connections,
                });
            }
        }

        if let Some(user_id) = user_id {
            let current = self.live_user_connection_count(user_id);
            if current >= self.limits.max_connections_per_user {
                return Err(ConnectionError::UserLimitExceeded {
                    user_id: user_id.to_string(),
                    current,
                    max: self.limits.max_connections_per_user,
                });
            }
        }

        let entry = Arc::new(ConnectionEntry::new(
            handle,
            user_id.map(str::to_string),
            metadata,
        ));

        let replaced = match self.connections.entry(connection_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().live_handle().is_some() {
                    return Err(ConnectionError::DuplicateConnection {
                        connection_id: connection_id.to_string(),
                    });
                }
                // A dead entry under the same id is overwritten
                Some(occupied.insert(entry))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                None
            }
        };

        if let Some(old_user) = replaced.as_ref().and_then(|old| old.user_id.as_deref()) {
            self.unindex(old_user, connection_id);
        }

        if let Some(user_id) = user_id {
            self.user_index
                .entry(user_id.to_string())
                .or_default()
                .insert(connection_id.to_string());
        }

        Ok(())
    }

    /// Remove a connection from the global set and its owner's set
    pub fn remove(&self, handle: &TransportHandle, user_id: Option<&str>) -> bool {
        self.remove_by_id(handle.connection_id(), user_id)
    }

    /// Remove a connection by id. Works after the handle itself is gone.
    pub fn remove_by_id(&self, connection_id: &str, user_id: Option<&str>) -> bool {
        let mut removed = false;

        if let Some((_, entry)) = self.connections.remove(connection_id) {
            if let Some(owner) = entry.user_id.as_deref() {
                self.unindex(owner, connection_id);
            }
            removed = true;
        }

        // The caller's view of the owner may differ from what was registered
        if let Some(user_id) = user_id {
            removed |= self.unindex(user_id, connection_id);
        }

        if removed {
            self.counters.removed.fetch_add(1, Ordering::Relaxed);
            ConnectionMetrics::record_removed();
            tracing::info!(connection_id = %connection_id, user_id = ?user_id, "Connection unregistered");
        }

        removed
    }

    /// All connections the transport still reports as connected.
    /// Dead entries found along the way are evicted.
    pub fn list_active(&self) -> Vec<TransportHandle> {
        let mut active = Vec::with_capacity(self.connections.len());
        let mut dead = Vec::new();

        for entry in self.connections.iter() {
            match entry.value().live_handle() {
                Some(handle) => active.push(handle),
                None => dead.push(entry.key().clone()),
            }
        }

        for connection_id in dead {
            self.evict_if_dead(&connection_id);
        }

        active
    }

    /// Live connections of one user, with the same lazy eviction
    pub fn list_active_for_user(&self, user_id: &str) -> Vec<TransportHandle> {
        let connection_ids: Vec<String> = match self.user_index.get(user_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };

        let mut active = Vec::with_capacity(connection_ids.len());
        for connection_id in connection_ids {
            let live = self
                .connections
                .get(&connection_id)
                .and_then(|entry| entry.live_handle());

            match live {
                Some(handle) => active.push(handle),
                None => {
                    if !self.evict_if_dead(&connection_id) {
                        // Index pointed at nothing
                        self.unindex(user_id, &connection_id);
                    }
                }
            }
        }

        self.user_index.remove_if(user_id, |_, ids| ids.is_empty());
        active
    }

    /// Remove every stored connection that is no longer connected.
    /// Returns the number of connections removed.
    pub fn sweep_stale(&self) -> usize {
        let dead: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| entry.value().live_handle().is_none())
            .map(|entry| entry.key().clone())
            .collect();

        let removed = dead
            .iter()
            .filter(|connection_id| self.evict_if_dead(connection_id))
            .count();

        // Drop index references that no longer resolve, and empty users
        self.user_index.retain(|_, ids| {
            ids.retain(|id| self.connections.contains_key(id));
            !ids.is_empty()
        });

        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = self.connections.len(),
                "Swept stale connections"
            );
        }

        removed
    }

    /// Update last-activity and message count after a successful send
    pub fn record_activity(&self, connection_id: &str) -> bool {
        match self.connections.get(connection_id) {
            Some(entry) => {
                entry.record_send();
                true
            }
            None => false,
        }
    }

    pub fn connection_info(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.connections.get(connection_id).map(|entry| ConnectionInfo {
            connection_id: entry.id.clone(),
            user_id: entry.user_id.clone(),
            state: entry.state(),
            connected_at: entry.connected_at,
            last_activity: entry.last_activity(),
            message_count: entry.message_count(),
            metadata: entry.metadata.clone(),
        })
    }

    /// Number of stored entries, including ones not yet found dead
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let total_connections = self.connections.len();
        let unique_users = self.user_index.len();
        let indexed: usize = self.user_index.iter().map(|ids| ids.len()).sum();
        let avg_connections_per_user = if unique_users > 0 {
            indexed as f64 / unique_users as f64
        } else {
            0.0
        };

        RegistryStats {
            total_connections,
            unique_users,
            avg_connections_per_user,
            connections_added: self.counters.added.load(Ordering::Relaxed),
            connections_removed: self.counters.removed.load(Ordering::Relaxed),
            stale_removed: self.counters.stale_removed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Sweep and release spare map capacity. Returns estimated bytes freed.
    pub fn reclaim(&self) -> usize {
        let swept = self.sweep_stale();
        self.connections.shrink_to_fit();
        self.user_index.shrink_to_fit();
        swept * ESTIMATED_ENTRY_BYTES
    }

    fn live_user_connection_count(&self, user_id: &str) -> usize {
        self.user_index
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.connections
                            .get(id.as_str())
                            .is_some_and(|entry| entry.live_handle().is_some())
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Remove an entry only if it is still dead at removal time
    fn evict_if_dead(&self, connection_id: &str) -> bool {
        let evicted = self
            .connections
            .remove_if(connection_id, |_, entry| entry.live_handle().is_none());

        match evicted {
            Some((_, entry)) => {
                if let Some(owner) = entry.user_id.as_deref() {
                    self.unindex(owner, connection_id);
                }
                self.counters.stale_removed.fetch_add(1, Ordering::Relaxed);
                ConnectionMetrics::record_stale_removed(1);
                tracing::debug!(connection_id = %connection_id, "Evicted dead connection");
                true
            }
            None => false,
        }
    }

    fn unindex(&self, user_id: &str, connection_id: &str) -> bool {
        let removed = self
            .user_index
            .get_mut(user_id)
            .map(|mut ids| ids.remove(connection_id))
            .unwrap_or(false);
        self.user_index.remove_if(user_id, |_, ids| ids.is_empty());
        removed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    fn handle(id: &str) -> (Arc<MockTransport>, TransportHandle) {
        let mock = Arc::new(MockTransport::new(id));
        let handle: TransportHandle = mock.clone();
        (mock, handle)
    }

    #[test]
    fn test_add_and_list() {
        let registry = ConnectionRegistry::new();
        let (_m1, h1) = handle("c1");
        let (_m2, h2) = handle("c2");

        assert!(registry.add(&h1, Some("u1"), HashMap::new()));
        assert!(registry.add(&h2, None, HashMap::new()));

        assert_eq!(registry.list_active().len(), 2);
        assert_eq!(registry.list_active_for_user("u1").len(), 1);
        assert!(registry.list_active_for_user("nobody").is_empty());

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.unique_users, 1);
        assert_eq!(stats.connections_added, 2);
    }

    #[test]
    fn test_remove_drops_empty_user_entry() {
        let registry = ConnectionRegistry::new();
        let (_m1, h1) = handle("c1");
        let (_m2, h2) = handle("c2");
        registry.add(&h1, Some("u1"), HashMap::new());
        registry.add(&h2, Some("u1"), HashMap::new());

        assert!(registry.remove(&h1, Some("u1")));
        assert_eq!(registry.stats().unique_users, 1);

        assert!(registry.remove(&h2, Some("u1")));
        assert_eq!(registry.stats().unique_users, 0);
        assert!(registry.is_empty());

        // Removing again is a no-op
        assert!(!registry.remove(&h2, Some("u1")));
    }

    #[test]
    fn test_duplicate_live_id_rejected() {
        let registry = ConnectionRegistry::new();
        let (_m1, h1) = handle("same");
        let (_m2, h2) = handle("same");

        assert!(registry.add(&h1, Some("u1"), HashMap::new()));
        assert!(!registry.add(&h2, Some("u1"), HashMap::new()));
        assert_eq!(registry.stats().errors, 1);
    }

    #[test]
    fn test_closed_handle_is_filtered_lazily() {
        let registry = ConnectionRegistry::new();
        let (m1, h1) = handle("c1");
        let (_m2, h2) = handle("c2");
        registry.add(&h1, Some("u1"), HashMap::new());
        registry.add(&h2, Some("u1"), HashMap::new());

        m1.set_state(ConnectionState::Closed);

        let active = registry.list_active_for_user("u1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].connection_id(), "c2");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().stale_removed, 1);
    }

    #[test]
    fn test_dropped_handle_is_not_retained() {
        let registry = ConnectionRegistry::new();
        let (mock, h1) = handle("c1");
        registry.add(&h1, Some("u1"), HashMap::new());

        let weak = Arc::downgrade(&mock);
        drop(h1);
        drop(mock);

        // The registry held no strong reference
        assert!(weak.upgrade().is_none());
        assert!(registry.list_active().is_empty());
        assert!(registry.is_empty());
        assert_eq!(registry.stats().unique_users, 0);
    }

    #[test]
    fn test_sweep_stale_counts_removed() {
        let registry = ConnectionRegistry::new();
        let (m1, h1) = handle("c1");
        let (m2, h2) = handle("c2");
        let (_m3, h3) = handle("c3");
        registry.add(&h1, Some("u1"), HashMap::new());
        registry.add(&h2, Some("u2"), HashMap::new());
        registry.add(&h3, Some("u2"), HashMap::new());

        m1.set_state(ConnectionState::Closing);
        m2.set_state(ConnectionState::Closed);

        assert_eq!(registry.sweep_stale(), 2);
        assert_eq!(registry.len(), 1);
        let stats = registry.stats();
        assert_eq!(stats.unique_users, 1);
        assert_eq!(stats.avg_connections_per_user, 1.0);
        assert_eq!(registry.sweep_stale(), 0);
    }

    #[test]
    fn test_user_limit_counts_live_connections_only() {
        let registry = ConnectionRegistry::with_limits(ConnectionLimits {
            max_connections: 100,
            max_connections_per_user: 1,
        });
        let (m1, h1) = handle("c1");
        let (_m2, h2) = handle("c2");

        assert!(registry.add(&h1, Some("u1"), HashMap::new()));
        assert!(!registry.add(&h2, Some("u1"), HashMap::new()));

        m1.set_state(ConnectionState::Closed);
        assert!(registry.add(&h2, Some("u1"), HashMap::new()));
    }

    #[test]
    fn test_total_limit_sweeps_before_rejecting() {
        let registry = ConnectionRegistry::with_limits(ConnectionLimits {
            max_connections: 1,
            max_connections_per_user: 5,
        });
        let (m1, h1) = handle("c1");
        let (_m2, h2) = handle("c2");

        assert!(registry.add(&h1, None, HashMap::new()));
        assert!(!registry.add(&h2, None, HashMap::new()));

        m1.set_state(ConnectionState::Closed);
        assert!(registry.add(&h2, None, HashMap::new()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejects_handle_not_connected() {
        let registry = ConnectionRegistry::new();
        let (m1, h1) = handle("c1");
        m1.set_state(ConnectionState::Closing);
        assert!(!registry.add(&h1, None, HashMap::new()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_record_activity_and_info() {
        let registry = ConnectionRegistry::new();
        let (_m1, h1) = handle("c1");
        let metadata = HashMap::from([("agent".to_string(), "web".to_string())]);
        registry.add(&h1, Some("u1"), metadata);

        assert!(registry.record_activity("c1"));
        assert!(registry.record_activity("c1"));
        assert!(!registry.record_activity("missing"));

        let info = registry.connection_info("c1").unwrap();
        assert_eq!(info.message_count, 2);
        assert_eq!(info.user_id.as_deref(), Some("u1"));
        assert_eq!(info.state, ConnectionState::Connected);
        assert_eq!(info.metadata.get("agent").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_reclaim_reports_swept_entries() {
        let registry = ConnectionRegistry::new();
        let (m1, h1) = handle("c1");
        registry.add(&h1, None, HashMap::new());
        m1.set_state(ConnectionState::Closed);

        assert_eq!(registry.reclaim(), ESTIMATED_ENTRY_BYTES);
        assert_eq!(registry.reclaim(), 0);
    }
}
