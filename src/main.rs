use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use realtime_delivery_core::config::Settings;
use realtime_delivery_core::delivery::BroadcastCoordinator;
use realtime_delivery_core::monitor::ProcessMemorySampler;
use realtime_delivery_core::server::{create_app, AppState};
use realtime_delivery_core::shutdown::{shutdown_signal, GracefulShutdown};
use realtime_delivery_core::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing (guard must outlive the server)
    let _telemetry_guard = init_telemetry(&settings.logging, &settings.otel)?;
    tracing::info!(
        memory_limit_bytes = settings.memory.limit_bytes,
        buffer_max_bytes = settings.buffer.max_size_bytes,
        "Configuration loaded"
    );

    let sampler = Arc::new(ProcessMemorySampler::new()?);
    let coordinator = BroadcastCoordinator::new(&settings, sampler)?;
    coordinator.start();

    let state = AppState::new(settings.clone(), coordinator.clone());
    let app = create_app(state);

    let addr = settings.server_addr();
    let served = serve(&addr, app).await;

    // Runs whether the server exited cleanly or not
    let outcome = GracefulShutdown::new(coordinator).execute("server shutdown").await;
    if !outcome.success {
        tracing::warn!("Graceful shutdown did not complete in time");
    }

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn serve(addr: &str, app: axum::Router) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
