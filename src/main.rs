/// Leadway: multi-tenant CRM backend
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server.

use leadway::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Tenant CRM API at /api/tenants/{tenant}/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
