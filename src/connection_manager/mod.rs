//! Connection tracking for transport-owned WebSocket handles
//!
//! This module provides:
//! - The `ConnectionTransport` capability supplied by the transport layer
//! - A registry that indexes connections globally and per user
//! - Lazy and periodic eviction of connections the transport has closed
//! - Connection statistics

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::{ConnectionInfo, RegistryStats};
pub use types::{
    ConnectionError, ConnectionLimits, ConnectionState, ConnectionTransport, TransportError,
    TransportHandle,
};
