use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::delivery::BroadcastCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub coordinator: Arc<BroadcastCoordinator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, coordinator: Arc<BroadcastCoordinator>) -> Self {
        Self {
            settings: Arc::new(settings),
            coordinator,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
