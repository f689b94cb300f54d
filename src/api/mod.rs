//! API layer - HTTP endpoint handlers.

mod broadcast;
mod health;
mod metrics;
mod routes;

pub use broadcast::{broadcast_message, drain_buffer, BroadcastRequest, DrainResponse};
pub use health::{health, stats, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
