//! Connection handle abstraction and registry record types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::config::ConnectionLimitsConfig;

/// Transport-reported state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Closing,
    Closed,
}

/// Error returned by a transport write
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,
    #[error("send timed out after {0}ms")]
    Timeout(u64),
    #[error("send failed: {0}")]
    Send(String),
}

/// The capability a transport hands to the core for each accepted socket.
///
/// The transport owns the value; the registry only keeps a `Weak` to it.
#[async_trait]
pub trait ConnectionTransport: Send + Sync {
    /// Unique, stable identifier of this connection
    fn connection_id(&self) -> &str;

    /// Current transport-level state
    fn state(&self) -> ConnectionState;

    /// Attempt to write one payload to the connection
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;
}

/// Shared, transport-owned connection handle
pub type TransportHandle = Arc<dyn ConnectionTransport>;

/// Registry record for one connection. Holds the handle weakly.
pub(crate) struct ConnectionEntry {
    pub id: String,
    pub user_id: Option<String>,
    handle: Weak<dyn ConnectionTransport>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    message_count: AtomicU64,
    pub metadata: HashMap<String, String>,
}

impl ConnectionEntry {
    pub fn new(
        handle: &TransportHandle,
        user_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: handle.connection_id().to_string(),
            user_id,
            handle: Arc::downgrade(handle),
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            message_count: AtomicU64::new(0),
            metadata,
        }
    }

    /// State as seen through the weak handle; a dropped handle is `Closed`
    pub fn state(&self) -> ConnectionState {
        match self.handle.upgrade() {
            Some(handle) => handle.state(),
            None => ConnectionState::Closed,
        }
    }

    /// Strong handle if the transport still holds it and reports it connected
    pub fn live_handle(&self) -> Option<TransportHandle> {
        self.handle
            .upgrade()
            .filter(|handle| handle.state() == ConnectionState::Connected)
    }

    /// Record a successful send
    pub fn record_send(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }
}

/// Error returned when connection limits are exceeded
#[derive(Debug, Clone)]
pub enum ConnectionError {
    TotalLimitExceeded { current: usize, max: usize },
    UserLimitExceeded { user_id: String, current: usize, max: usize },
    DuplicateConnection { connection_id: String },
    InvalidHandle { reason: &'static str },
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TotalLimitExceeded { current, max } => {
                write!(f, "Total connection limit exceeded ({}/{})", current, max)
            }
            Self::UserLimitExceeded {
                user_id,
                current,
                max,
            } => {
                write!(
                    f,
                    "User {} connection limit exceeded ({}/{})",
                    user_id, current, max
                )
            }
            Self::DuplicateConnection { connection_id } => {
                write!(f, "Connection {} is already registered", connection_id)
            }
            Self::InvalidHandle { reason } => write!(f, "Invalid connection handle: {}", reason),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub max_connections_per_user: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10000,
            max_connections_per_user: 5,
        }
    }
}

impl From<ConnectionLimitsConfig> for ConnectionLimits {
    fn from(config: ConnectionLimitsConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            max_connections_per_user: config.max_connections_per_user,
        }
    }
}
