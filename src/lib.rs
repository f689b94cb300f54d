// Core components
pub mod buffer;
pub mod connection_manager;
pub mod delivery;
pub mod monitor;

// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod tasks;
pub mod telemetry;

// Reference transport & HTTP surface
pub mod api;
pub mod server;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;
