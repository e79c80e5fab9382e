/// Appointment endpoints
///
/// POST /api/tenants/{tenant}/citas
/// GET  /api/tenants/{tenant}/citas   (upcoming, soonest first)

use crate::{
    api::{require_text, ApiError, AppState},
    crm::{types::NewAppointment, Appointment, CrmStorage},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::Utc;

pub fn create_appointment_routes() -> Router<AppState> {
    Router::new().route(
        "/api/tenants/{tenant}/citas",
        post(create_appointment).get(list_appointments),
    )
}

async fn create_appointment(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(payload): Json<NewAppointment>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    require_text("titulo", &payload.titulo)?;

    let (tenant, pool) = state.provision_tenant(&tenant).await?;
    let storage = CrmStorage::new(pool);

    if let Some(lead_id) = &payload.lead_id {
        if storage.get_lead(lead_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("lead {}", lead_id)));
        }
    }
    if let Some(cliente_id) = &payload.cliente_id {
        if storage.get_client(cliente_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("cliente {}", cliente_id)));
        }
    }

    let cita = storage.create_appointment(&payload).await?;
    tracing::info!("📅 Scheduled cita {} at {} for tenant {}", cita.id, cita.fecha_inicio, tenant);

    Ok((StatusCode::CREATED, Json(cita)))
}

async fn list_appointments(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let (_, pool) = state.tenant_pool(&tenant).await?;
    let citas = CrmStorage::new(pool).list_upcoming_appointments(Utc::now()).await?;
    Ok(Json(citas))
}
