//! Graceful shutdown handling.
//!
//! The sequence is:
//! 1. Notify connected clients about the impending shutdown
//! 2. Stop the coordinator (monitor, cleanup loop, buffer, final reclaim)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::timeout;

use crate::delivery::BroadcastCoordinator;
use crate::websocket::ServerMessage;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for clients to be notified (default: 5 seconds)
    pub client_notification_timeout: Duration,
    /// Time to wait for the coordinator to stop (default: 10 seconds)
    pub coordinator_timeout: Duration,
    /// Suggested reconnect delay to send to clients (default: 5 seconds)
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            coordinator_timeout: Duration::from_secs(10),
            reconnect_after_seconds: 5,
        }
    }
}

/// Handles graceful shutdown of the delivery service
pub struct GracefulShutdown {
    coordinator: Arc<BroadcastCoordinator>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(coordinator: Arc<BroadcastCoordinator>) -> Self {
        Self::with_config(coordinator, ShutdownConfig::default())
    }

    pub fn with_config(coordinator: Arc<BroadcastCoordinator>, config: ShutdownConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.coordinator.registry().len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        tracing::info!("Phase 2: Stopping broadcast coordinator");
        result.coordinator_stopped = timeout(self.config.coordinator_timeout, self.coordinator.shutdown())
            .await
            .is_ok();
        if !result.coordinator_stopped {
            tracing::warn!(
                timeout_ms = self.config.coordinator_timeout.as_millis() as u64,
                "Coordinator shutdown timed out"
            );
        }

        result.duration = start.elapsed();
        result.success = result.coordinator_stopped;

        tracing::info!(
            clients_notified = result.clients_notified,
            coordinator_stopped = result.coordinator_stopped,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    async fn notify_clients(&self, reason: &str) -> usize {
        if self.coordinator.is_shut_down() || self.coordinator.registry().is_empty() {
            return 0;
        }

        let message = ServerMessage::shutdown(reason, Some(self.config.reconnect_after_seconds));
        match timeout(
            self.config.client_notification_timeout,
            self.coordinator.broadcast(&message, None),
        )
        .await
        {
            Ok(outcome) => {
                tracing::info!(
                    notified = outcome.sent,
                    failed = outcome.failed,
                    "Shutdown notifications sent"
                );
                outcome.sent
            }
            Err(_) => {
                tracing::warn!("Timed out sending shutdown notifications");
                0
            }
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    pub clients_notified: usize,
    pub coordinator_stopped: bool,
    pub duration: Duration,
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
