/// Server setup and initialization
///
/// Wires together all components: tenant databases, view cache, integration
/// adapters, the reminder scheduler and the HTTP routes.

use crate::{
    api::{create_router, AppState},
    config::Config,
    runtime::ReminderScheduler,
};
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Also starts the appointment reminder scheduler, returned so the caller can
/// stop it on shutdown.
pub async fn create_app(config: Config) -> Result<(Router, Arc<ReminderScheduler>)> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .with_context(|| format!("Failed to create data directory '{}'", config.database.data_dir))?;

    tracing::info!("🏗️ Initializing application state");
    let state = AppState::new(&config)?;

    tracing::info!("⏰ Initializing appointment reminder scheduler");
    let reminders = Arc::new(
        ReminderScheduler::new(
            Arc::clone(&state.tenants),
            Arc::clone(&state.cache),
            config.reminders.clone(),
        )
        .await
        .context("Failed to initialize reminder scheduler")?,
    );

    if let Err(e) = reminders.start().await {
        tracing::error!("❌ Failed to start reminder scheduler: {}", e);
    }

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(state);

    tracing::info!("✅ Application initialized successfully");

    Ok((app, reminders))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Leadway server...");

    let (app, reminders) = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = reminders.stop().await {
        tracing::warn!("⚠️ Reminder scheduler did not stop cleanly: {}", e);
    }

    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
