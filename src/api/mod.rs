/// HTTP API Layer
///
/// This module provides the tenant-scoped REST API. It handles:
/// - Lead CRUD and the lead-to-client conversion
/// - Client, activity and dashboard listings (cached fragments)
/// - Appointments
/// - Integration credentials and the chat/messaging adapters
/// - Tenant provisioning
///
/// Every route lives under /api/tenants/{tenant}/...

pub mod error;

// Explicit tenant provisioning
pub mod tenants;

// Lead management and conversion
pub mod leads;

// Clients, activities and the dashboard summary
pub mod clients;

pub mod appointments;

// Integration credentials plus chat and messaging proxies
pub mod integrations;

use crate::{
    config::Config,
    crm::ViewCache,
    integrations::{ChatAdapter, MessagingAdapter},
    tenant::{TenantDatabaseManager, TenantSlug},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

pub use error::ApiError;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Per-tenant database pools
    pub tenants: Arc<TenantDatabaseManager>,
    /// Cached listing fragments
    pub cache: Arc<ViewCache>,
    pub chat: ChatAdapter,
    pub messaging: MessagingAdapter,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            tenants: Arc::new(TenantDatabaseManager::new(&config.database.data_dir)),
            cache: Arc::new(ViewCache::new(config.cache.ttl())),
            chat: ChatAdapter::new(&config.integrations)?,
            messaging: MessagingAdapter::new(&config.integrations)?,
        })
    }

    /// Validate the tenant slug and resolve an existing tenant's database
    ///
    /// Unknown tenants are a 404; nothing is created on disk.
    pub async fn tenant_pool(&self, raw: &str) -> Result<(TenantSlug, SqlitePool), ApiError> {
        let tenant = TenantSlug::parse(raw)?;
        let pool = self
            .tenants
            .existing_pool(&tenant)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("tenant {}", tenant)))?;
        Ok((tenant, pool))
    }

    /// Like `tenant_pool`, but creates the tenant's database on first write
    pub async fn provision_tenant(&self, raw: &str) -> Result<(TenantSlug, SqlitePool), ApiError> {
        let tenant = TenantSlug::parse(raw)?;
        let pool = self.tenants.get_pool(&tenant).await?;
        Ok((tenant, pool))
    }
}

/// Build the complete router: health check plus every tenant route
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(tenants::create_tenant_routes())
        .merge(leads::create_lead_routes())
        .merge(clients::create_client_routes())
        .merge(appointments::create_appointment_routes())
        .merge(integrations::create_integration_routes())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

/// Reject missing or blank text fields
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("'{}' must not be empty", field)));
    }
    Ok(())
}
