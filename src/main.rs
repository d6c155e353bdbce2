use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use projello_terminal::{
    build_router, config::Config, AppState, ProjectCatalog, SessionManager,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let manager = SessionManager::new(config.manager_config());
    let projects = Arc::new(ProjectCatalog::from_file(&config.projects));
    let app = build_router(AppState::new(manager.clone(), projects));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Terminal server running on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(manager))
        .await
        .context("Server error")
}

/// Killing the sessions ends every open viewer stream, which lets the
/// graceful shutdown finish.
async fn shutdown_signal(manager: SessionManager) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown signal received");
    manager.shutdown();
}
