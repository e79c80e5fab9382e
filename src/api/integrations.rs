/// Integration endpoints
///
/// Credential management and the two provider proxies:
/// - GET  /api/tenants/{tenant}/integraciones
/// - PUT  /api/tenants/{tenant}/integraciones/{proveedor}
/// - POST /api/tenants/{tenant}/chat
/// - POST /api/tenants/{tenant}/mensajes

use crate::{
    api::{require_text, ApiError, AppState},
    integrations::{
        ChatReply, ChatRequest, IntegrationStorage, IntegrationSummary, IntegrationUpdate,
        MessageReceipt, OutboundMessage,
    },
    tenant::TenantSlug,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post, put},
    Router,
};

pub fn create_integration_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tenants/{tenant}/integraciones", get(list_integrations))
        .route("/api/tenants/{tenant}/integraciones/{proveedor}", put(upsert_integration))
        .route("/api/tenants/{tenant}/chat", post(chat))
        .route("/api/tenants/{tenant}/mensajes", post(send_message))
}

async fn list_integrations(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<IntegrationSummary>>, ApiError> {
    let (_, pool) = state.tenant_pool(&tenant).await?;
    let integrations = IntegrationStorage::new(pool).list().await?;
    Ok(Json(integrations.iter().map(IntegrationSummary::from).collect()))
}

/// Store a provider's credentials
///
/// Body: { "config": { "api_key": "...", "base_url": "..." }, "activo": true }
async fn upsert_integration(
    State(state): State<AppState>,
    Path((tenant, proveedor)): Path<(String, String)>,
    Json(payload): Json<IntegrationUpdate>,
) -> Result<Json<IntegrationSummary>, ApiError> {
    // Provider keys follow the same character rules as tenant slugs
    TenantSlug::parse(&proveedor)
        .map_err(|_| ApiError::BadRequest(format!("invalid provider key '{}'", proveedor)))?;
    if !payload.config.is_object() {
        return Err(ApiError::BadRequest("'config' must be a JSON object".to_string()));
    }

    let (tenant, pool) = state.provision_tenant(&tenant).await?;
    let stored = IntegrationStorage::new(pool)
        .upsert(&proveedor, &payload.config, payload.activo)
        .await?;

    tracing::info!("🔑 Updated integration {} for tenant {} (activo: {})", proveedor, tenant, stored.activo);

    Ok(Json(IntegrationSummary::from(&stored)))
}

/// Proxy a message to the AI chat provider
///
/// Body: { "mensaje": "...", "conversacion_id": "...", "lead_id": "...", "system": "..." }
async fn chat(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    require_text("mensaje", &payload.mensaje)?;

    let (_, pool) = state.tenant_pool(&tenant).await?;
    let reply = state.chat.send(&pool, &payload).await?;
    Ok(Json(reply))
}

/// Send a text through the messaging provider
///
/// Body: { "to": "+34600000000", "texto": "...", "cliente_id": "..." }
async fn send_message(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(payload): Json<OutboundMessage>,
) -> Result<Json<MessageReceipt>, ApiError> {
    require_text("to", &payload.to)?;
    require_text("texto", &payload.texto)?;

    let (_, pool) = state.tenant_pool(&tenant).await?;
    let receipt = state.messaging.send(&pool, &payload).await?;
    Ok(Json(receipt))
}
