use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::broadcast::{broadcast_message, drain_buffer};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/broadcast", post(broadcast_message))
                .route("/buffer/messages", get(drain_buffer)),
        )
}
