/// Lead management REST API endpoints
///
/// Pass-through CRUD over a tenant's leads plus the conversion endpoint.
/// A lead only reaches estado "convertido" through the conversion workflow.

use crate::{
    api::{require_text, ApiError, AppState},
    crm::{
        types::{NewLead, ESTADO_CONVERTIDO},
        ConversionOutcome, CrmStorage, Lead, LeadConverter, View,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct LeadFilter {
    pub estado: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EstadoUpdate {
    pub estado: String,
}

pub fn create_lead_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tenants/{tenant}/leads", post(create_lead).get(list_leads))
        .route("/api/tenants/{tenant}/leads/{id}", get(get_lead).delete(delete_lead))
        .route("/api/tenants/{tenant}/leads/{id}/estado", put(update_estado))
        .route("/api/tenants/{tenant}/leads/{id}/convert", post(convert_lead))
}

fn reject_manual_conversion(estado: &str) -> Result<(), ApiError> {
    if estado.trim().eq_ignore_ascii_case(ESTADO_CONVERTIDO) {
        return Err(ApiError::BadRequest(
            "estado 'convertido' is set only by converting the lead".to_string(),
        ));
    }
    Ok(())
}

/// Create a lead (form submission or ingestion)
///
/// POST /api/tenants/{tenant}/leads
async fn create_lead(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(payload): Json<NewLead>,
) -> Result<(StatusCode, Json<Lead>), ApiError> {
    require_text("nombre", &payload.nombre)?;
    if let Some(estado) = &payload.estado {
        require_text("estado", estado)?;
        reject_manual_conversion(estado)?;
    }

    let (tenant, pool) = state.provision_tenant(&tenant).await?;
    let lead = CrmStorage::new(pool).create_lead(&payload).await?;
    state.cache.invalidate(&tenant, &[View::Leads, View::Dashboard]);

    tracing::info!("📝 Created lead {} for tenant {}", lead.id, tenant);

    Ok((StatusCode::CREATED, Json(lead)))
}

/// List leads, newest first
///
/// GET /api/tenants/{tenant}/leads?estado=contactado
/// The unfiltered listing is served from the view cache when fresh.
async fn list_leads(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(filter): Query<LeadFilter>,
) -> Result<Json<Value>, ApiError> {
    let (tenant, pool) = state.tenant_pool(&tenant).await?;
    let storage = CrmStorage::new(pool);

    if let Some(estado) = filter.estado.as_deref() {
        let leads = storage.list_leads(Some(estado)).await?;
        return Ok(Json(json!({ "leads": leads })));
    }

    if let Some(cached) = state.cache.get(&tenant, View::Leads) {
        return Ok(Json(Value::clone(&cached)));
    }

    let generation = state.cache.generation(&tenant, View::Leads);
    let fragment = json!({ "leads": storage.list_leads(None).await? });
    state.cache.put(&tenant, View::Leads, generation, fragment.clone());
    Ok(Json(fragment))
}

/// GET /api/tenants/{tenant}/leads/{id}
async fn get_lead(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<Lead>, ApiError> {
    let (_, pool) = state.tenant_pool(&tenant).await?;
    CrmStorage::new(pool)
        .get_lead(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("lead {}", id)))
}

/// Change the estado label of an unconverted lead
///
/// PUT /api/tenants/{tenant}/leads/{id}/estado
/// Body: { "estado": "contactado" }
async fn update_estado(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
    Json(payload): Json<EstadoUpdate>,
) -> Result<Json<Lead>, ApiError> {
    require_text("estado", &payload.estado)?;
    reject_manual_conversion(&payload.estado)?;

    let (tenant, pool) = state.tenant_pool(&tenant).await?;
    let storage = CrmStorage::new(pool);

    if !storage.update_lead_estado(&id, payload.estado.trim()).await? {
        return Err(unchanged_lead_error(&storage, &id).await);
    }
    state.cache.invalidate(&tenant, &[View::Leads, View::Dashboard]);

    storage
        .get_lead(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("lead {}", id)))
}

/// DELETE /api/tenants/{tenant}/leads/{id}
async fn delete_lead(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let (tenant, pool) = state.tenant_pool(&tenant).await?;
    let storage = CrmStorage::new(pool);

    if !storage.delete_lead(&id).await? {
        return Err(unchanged_lead_error(&storage, &id).await);
    }
    state.cache.invalidate(&tenant, &[View::Leads, View::Dashboard]);

    tracing::info!("🗑️ Deleted lead {} for tenant {}", id, tenant);

    Ok(Json(json!({ "message": "Lead deleted successfully" })))
}

/// Why a guarded lead write affected no rows
async fn unchanged_lead_error(storage: &CrmStorage, id: &str) -> ApiError {
    match storage.get_lead(id).await {
        Ok(Some(lead)) if lead.is_converted() => {
            ApiError::Conflict(format!("lead {} is converted and can no longer change", id))
        }
        Ok(_) => ApiError::NotFound(format!("lead {}", id)),
        Err(e) => ApiError::from(e),
    }
}

/// Promote a lead to a client
///
/// POST /api/tenants/{tenant}/leads/{id}/convert
/// Returns: { "success": true, "lead_id": "...", "cliente_id": "...", "activity_recorded": true }
async fn convert_lead(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<ConversionOutcome>, ApiError> {
    let (tenant, pool) = state.tenant_pool(&tenant).await?;
    let converter = LeadConverter::new(pool, Arc::clone(&state.cache), tenant);
    let outcome = converter.convert(&id).await?;
    Ok(Json(outcome))
}
