/// Tenant provisioning endpoint
///
/// PUT /api/tenants/{tenant} creates the tenant's database if needed.
/// Lead creation, appointment creation and integration setup also provision;
/// every other route answers 404 for unknown tenants.

use crate::api::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::put,
    Router,
};
use serde_json::{json, Value};

pub fn create_tenant_routes() -> Router<AppState> {
    Router::new().route("/api/tenants/{tenant}", put(provision_tenant))
}

async fn provision_tenant(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant, _) = state.provision_tenant(&tenant).await?;
    tracing::info!("🏢 Tenant {} is ready", tenant);
    Ok(Json(json!({ "tenant": tenant })))
}
