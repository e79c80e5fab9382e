/// Client, activity and dashboard endpoints
///
/// Read-only views. The clients list and dashboard are served from the view
/// cache while fresh; conversions and lead writes invalidate them.

use crate::{
    api::{ApiError, AppState},
    crm::{Activity, Client, CrmStorage, View},
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct ActivityFilter {
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
}

pub fn create_client_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tenants/{tenant}/clientes", get(list_clients))
        .route("/api/tenants/{tenant}/clientes/{id}", get(get_client))
        .route("/api/tenants/{tenant}/actividades", get(list_activities))
        .route("/api/tenants/{tenant}/dashboard", get(dashboard))
}

/// GET /api/tenants/{tenant}/clientes
async fn list_clients(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant, pool) = state.tenant_pool(&tenant).await?;
    if let Some(cached) = state.cache.get(&tenant, View::Clientes) {
        return Ok(Json(Value::clone(&cached)));
    }

    let generation = state.cache.generation(&tenant, View::Clientes);
    let fragment = json!({ "clientes": CrmStorage::new(pool).list_clients().await? });
    state.cache.put(&tenant, View::Clientes, generation, fragment.clone());
    Ok(Json(fragment))
}

/// GET /api/tenants/{tenant}/clientes/{id}
async fn get_client(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<Client>, ApiError> {
    let (_, pool) = state.tenant_pool(&tenant).await?;
    CrmStorage::new(pool)
        .get_client(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("cliente {}", id)))
}

/// GET /api/tenants/{tenant}/actividades?lead_id=...&cliente_id=...
async fn list_activities(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(filter): Query<ActivityFilter>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let (_, pool) = state.tenant_pool(&tenant).await?;
    let activities = CrmStorage::new(pool)
        .list_activities(filter.lead_id.as_deref(), filter.cliente_id.as_deref())
        .await?;
    Ok(Json(activities))
}

/// GET /api/tenants/{tenant}/dashboard
async fn dashboard(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant, pool) = state.tenant_pool(&tenant).await?;
    if let Some(cached) = state.cache.get(&tenant, View::Dashboard) {
        return Ok(Json(Value::clone(&cached)));
    }

    let generation = state.cache.generation(&tenant, View::Dashboard);
    let summary = CrmStorage::new(pool).dashboard_summary().await?;
    let fragment = serde_json::to_value(summary).map_err(anyhow::Error::from)?;
    state.cache.put(&tenant, View::Dashboard, generation, fragment.clone());
    Ok(Json(fragment))
}
