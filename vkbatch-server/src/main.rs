//! VK Batch Server - REST API for batch photo publishing to VK
//!
//! Exposes the vkbatch-core job lifecycle over HTTP:
//! - POST /api/jobs - Create a job from config, manifest and photos
//! - POST /api/jobs/{id}/rows/{index} - Process one manifest row
//! - POST /api/jobs/{id}/finalize - Summarize the job

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vkbatch_core::VkClient;
use vkbatch_server::{create_router_with_config, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("vkbatch_server=info,vkbatch_core=info,tower_http=info")
        }))
        .init();

    let config = Config::from_env();

    let host = VkClient::with_config(config.vk_client_config())?;
    let state = AppState::new(Arc::new(host), &config);

    spawn_session_sweeper(state.clone(), &config);

    let app = create_router_with_config(state, &config);

    let addr = config.socket_addr();
    tracing::info!("vkbatch-server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    // The rate limiter keys on the peer address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Periodically drop sessions that outlived `SESSION_MAX_AGE_SECS`.
fn spawn_session_sweeper(state: AppState, config: &Config) {
    let max_age = config.session_max_age();
    let mut interval = tokio::time::interval(config.session_sweep_interval());

    tokio::spawn(async move {
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match state.jobs.sweep(max_age) {
                Ok(0) => tracing::debug!("Session sweep: nothing to remove"),
                Ok(removed) => tracing::info!(removed, "Session sweep removed expired jobs"),
                Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
