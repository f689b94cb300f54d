//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::delivery::ComprehensiveStats;
use crate::monitor::PressureLevel;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: usize,
    pub pressure_level: PressureLevel,
    pub monitoring_active: bool,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let monitor = state.coordinator.monitor();
    let pressure_level = monitor.pressure_level();

    let status = if state.coordinator.is_shut_down() {
        "shutting_down"
    } else if pressure_level == PressureLevel::Critical {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        connections: state.coordinator.registry().len(),
        pressure_level,
        monitoring_active: monitor.is_monitoring(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<ComprehensiveStats> {
    Json(state.coordinator.get_comprehensive_stats())
}
