/// Lead-to-client conversion workflow
///
/// Promotes a lead to a client:
/// 1. fetch the lead with the tenant's service-level pool
/// 2. build the client from the lead's contact fields
/// 3. claim the lead (conditional update) and insert the client, in one transaction
/// 4. record a `lead_convertido` activity (best-effort)
/// 5. invalidate the cached leads, clients and dashboard views
///
/// The conditional update `... WHERE convertido_a_cliente_id IS NULL` is the
/// authoritative double-conversion guard: the early check in step 1 only avoids
/// opening a transaction for requests that are bound to fail.

use crate::crm::{
    cache::{View, ViewCache},
    storage::insert_activity,
    types::{
        timestamp_now, Lead, NewActivity, TipoCliente, ACTIVIDAD_LEAD_CONVERTIDO,
        CLIENTE_ACTIVO, ESTADO_CONVERTIDO,
    },
};
use crate::tenant::TenantSlug;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("lead not found: {0}")]
    NotFound(String),
    #[error("lead {lead_id} was already converted to client {cliente_id}")]
    AlreadyConverted { lead_id: String, cliente_id: String },
    #[error("lead conversion failed while {step}: {source}")]
    Database {
        step: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

fn failed(step: &'static str) -> impl FnOnce(sqlx::Error) -> ConversionError {
    move |source| ConversionError::Database { step, source }
}

/// Result of a successful conversion
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversionOutcome {
    pub success: bool,
    pub lead_id: String,
    pub cliente_id: String,
    /// False when the audit activity could not be written
    pub activity_recorded: bool,
}

/// Client fields derived from a lead at conversion time
#[derive(Debug, Clone, PartialEq)]
struct ClientDraft {
    nombre: String,
    email: Option<String>,
    telefono: Option<String>,
    empresa: Option<String>,
    tipo_cliente: TipoCliente,
    metadata: Value,
}

impl ClientDraft {
    fn from_lead(lead: &Lead) -> Self {
        Self {
            nombre: lead.nombre.clone(),
            email: lead.email.clone(),
            telefono: lead.telefono.clone(),
            empresa: lead.empresa.clone(),
            tipo_cliente: TipoCliente::from_empresa(lead.empresa.as_deref()),
            metadata: json!({
                "lead_id": lead.id,
                "origen": "conversion_lead",
                "lead_origen": lead.origen,
            }),
        }
    }
}

/// Runs conversions against one tenant's database
#[derive(Debug, Clone)]
pub struct LeadConverter {
    pool: SqlitePool,
    cache: Arc<ViewCache>,
    tenant: TenantSlug,
}

impl LeadConverter {
    pub fn new(pool: SqlitePool, cache: Arc<ViewCache>, tenant: TenantSlug) -> Self {
        Self { pool, cache, tenant }
    }

    pub async fn convert(&self, lead_id: &str) -> Result<ConversionOutcome, ConversionError> {
        tracing::info!("🔄 Converting lead {} (tenant: {})", lead_id, self.tenant);

        // Step 1: fetch and guard, no writes on failure
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = ?")
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(failed("fetching the lead"))?
            .ok_or_else(|| ConversionError::NotFound(lead_id.to_string()))?;

        if let Some(cliente_id) = &lead.convertido_a_cliente_id {
            tracing::warn!("⛔ Lead {} already converted to {}", lead_id, cliente_id);
            return Err(ConversionError::AlreadyConverted {
                lead_id: lead_id.to_string(),
                cliente_id: cliente_id.clone(),
            });
        }

        // Step 2
        let draft = ClientDraft::from_lead(&lead);
        let cliente_id = Uuid::new_v4().to_string();
        let converted_at = timestamp_now();

        // Step 3: claim the lead first so the transaction's first statement takes
        // the write lock, then insert the client. The FK on the back-reference is
        // deferred to commit.
        let mut tx = self.pool.begin().await.map_err(failed("opening the transaction"))?;

        let claimed = sqlx::query(
            r#"
            UPDATE leads
            SET estado = ?, fecha_conversion = ?, convertido_a_cliente_id = ?, updated_at = ?
            WHERE id = ? AND convertido_a_cliente_id IS NULL
            "#,
        )
        .bind(ESTADO_CONVERTIDO)
        .bind(&converted_at)
        .bind(&cliente_id)
        .bind(&converted_at)
        .bind(lead_id)
        .execute(&mut *tx)
        .await
        .map_err(failed("updating the lead"))?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await.map_err(failed("rolling back"))?;
            return Err(self.explain_lost_claim(lead_id).await);
        }

        sqlx::query(
            r#"
            INSERT INTO clientes (id, nombre, email, telefono, empresa, tipo_cliente, estado, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cliente_id)
        .bind(&draft.nombre)
        .bind(&draft.email)
        .bind(&draft.telefono)
        .bind(&draft.empresa)
        .bind(draft.tipo_cliente.as_str())
        .bind(CLIENTE_ACTIVO)
        .bind(draft.metadata.to_string())
        .bind(&converted_at)
        .execute(&mut *tx)
        .await
        .map_err(failed("inserting the client"))?;

        tx.commit().await.map_err(failed("committing the conversion"))?;

        tracing::info!("✅ Lead {} converted to client {} ({})", lead_id, cliente_id, draft.tipo_cliente.as_str());

        // Step 4: best-effort, the conversion is already committed
        let activity = NewActivity {
            tipo: ACTIVIDAD_LEAD_CONVERTIDO.to_string(),
            descripcion: format!("Lead {} convertido a cliente", lead.nombre),
            lead_id: Some(lead_id.to_string()),
            cliente_id: Some(cliente_id.clone()),
            metadata: json!({ "fecha_conversion": converted_at }),
        };
        let activity_recorded = match insert_activity(&self.pool, &activity).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("⚠️ Conversion activity not recorded for lead {}: {}", lead_id, e);
                false
            }
        };

        // Step 5
        self.cache.invalidate(&self.tenant, &View::CONVERSION);

        Ok(ConversionOutcome {
            success: true,
            lead_id: lead_id.to_string(),
            cliente_id,
            activity_recorded,
        })
    }

    /// Another conversion won the race, or the lead was deleted meanwhile
    async fn explain_lost_claim(&self, lead_id: &str) -> ConversionError {
        let current: Result<Option<Option<String>>, sqlx::Error> =
            sqlx::query_scalar("SELECT convertido_a_cliente_id FROM leads WHERE id = ?")
                .bind(lead_id)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(Some(Some(cliente_id))) => ConversionError::AlreadyConverted {
                lead_id: lead_id.to_string(),
                cliente_id,
            },
            Ok(Some(None)) | Ok(None) => ConversionError::NotFound(lead_id.to_string()),
            Err(source) => ConversionError::Database {
                step: "re-reading the lead",
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::{storage::CrmStorage, types::NewLead};
    use crate::tenant::TenantDatabaseManager;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: CrmStorage,
        cache: Arc<ViewCache>,
        converter: LeadConverter,
        tenant: TenantSlug,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let manager = TenantDatabaseManager::new(dir.path());
        let tenant = TenantSlug::parse("acme").unwrap();
        let pool = manager.get_pool(&tenant).await.unwrap();
        let cache = Arc::new(ViewCache::new(Duration::from_secs(60)));
        Fixture {
            _dir: dir,
            storage: CrmStorage::new(pool.clone()),
            converter: LeadConverter::new(pool, Arc::clone(&cache), tenant.clone()),
            cache,
            tenant,
        }
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn new_lead(empresa: Option<&str>) -> NewLead {
        NewLead {
            nombre: "Lucía Pérez".to_string(),
            email: Some("lucia@example.com".to_string()),
            telefono: Some("+34 600 000 000".to_string()),
            empresa: empresa.map(str::to_string),
            estado: Some("contactado".to_string()),
            ..NewLead::default()
        }
    }

    #[tokio::test]
    async fn converts_lead_into_client() {
        let fx = fixture().await;
        let lead = fx.storage.create_lead(&new_lead(Some("Acme SA"))).await.unwrap();

        let outcome = fx.converter.convert(&lead.id).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.activity_recorded);

        let updated = fx.storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(updated.estado, ESTADO_CONVERTIDO);
        assert_eq!(updated.convertido_a_cliente_id.as_deref(), Some(outcome.cliente_id.as_str()));
        assert!(updated.fecha_conversion.is_some());

        let client = fx.storage.get_client(&outcome.cliente_id).await.unwrap().unwrap();
        assert_eq!(client.nombre, lead.nombre);
        assert_eq!(client.email, lead.email);
        assert_eq!(client.telefono, lead.telefono);
        assert_eq!(client.empresa, lead.empresa);
        assert_eq!(client.tipo_cliente, "empresa");
        assert_eq!(client.estado, CLIENTE_ACTIVO);
        assert_eq!(client.metadata["lead_id"], json!(lead.id));

        let activities = fx.storage.list_activities(Some(&lead.id), None).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].tipo, ACTIVIDAD_LEAD_CONVERTIDO);
        assert_eq!(activities[0].cliente_id.as_deref(), Some(outcome.cliente_id.as_str()));
    }

    #[tokio::test]
    async fn lead_without_company_becomes_individual() {
        let fx = fixture().await;
        let lead = fx.storage.create_lead(&new_lead(Some("  "))).await.unwrap();

        let outcome = fx.converter.convert(&lead.id).await.unwrap();
        let client = fx.storage.get_client(&outcome.cliente_id).await.unwrap().unwrap();
        assert_eq!(client.tipo_cliente, "individual");
    }

    #[tokio::test]
    async fn second_conversion_is_rejected_without_writes() {
        let fx = fixture().await;
        let lead = fx.storage.create_lead(&new_lead(None)).await.unwrap();
        let first = fx.converter.convert(&lead.id).await.unwrap();
        let before = fx.storage.get_lead(&lead.id).await.unwrap().unwrap();

        let err = fx.converter.convert(&lead.id).await.unwrap_err();
        match err {
            ConversionError::AlreadyConverted { cliente_id, .. } => assert_eq!(cliente_id, first.cliente_id),
            other => panic!("unexpected error: {other}"),
        }

        let pool = fx.storage.pool();
        assert_eq!(count(pool, "clientes").await, 1);
        assert_eq!(count(pool, "actividades").await, 1);
        assert_eq!(fx.storage.get_lead(&lead.id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn missing_lead_is_not_found_without_writes() {
        let fx = fixture().await;

        let err = fx.converter.convert("does-not-exist").await.unwrap_err();
        assert!(matches!(err, ConversionError::NotFound(ref id) if id == "does-not-exist"));

        let pool = fx.storage.pool();
        assert_eq!(count(pool, "clientes").await, 0);
        assert_eq!(count(pool, "actividades").await, 0);
    }

    #[tokio::test]
    async fn activity_failure_keeps_committed_conversion() {
        let fx = fixture().await;
        let lead = fx.storage.create_lead(&new_lead(None)).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_actividades BEFORE INSERT ON actividades \
             BEGIN SELECT RAISE(ABORT, 'actividades unavailable'); END",
        )
        .execute(fx.storage.pool())
        .await
        .unwrap();

        let outcome = fx.converter.convert(&lead.id).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.activity_recorded);

        let updated = fx.storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(updated.estado, ESTADO_CONVERTIDO);
        assert!(fx.storage.get_client(&outcome.cliente_id).await.unwrap().is_some());
        assert_eq!(count(fx.storage.pool(), "actividades").await, 0);
    }

    #[tokio::test]
    async fn concurrent_conversions_produce_a_single_client() {
        let fx = fixture().await;
        let lead = fx.storage.create_lead(&new_lead(Some("Acme SA"))).await.unwrap();
        let other = fx.converter.clone();

        let (a, b) = tokio::join!(fx.converter.convert(&lead.id), other.convert(&lead.id));
        let successes: Vec<&ConversionOutcome> = [&a, &b].into_iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(successes.len(), 1, "exactly one conversion must win: {a:?} / {b:?}");

        assert_eq!(count(fx.storage.pool(), "clientes").await, 1);
        let updated = fx.storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(updated.convertido_a_cliente_id.as_deref(), Some(successes[0].cliente_id.as_str()));
    }

    #[tokio::test]
    async fn conversion_invalidates_cached_views() {
        let fx = fixture().await;
        let lead = fx.storage.create_lead(&new_lead(None)).await.unwrap();
        for view in View::CONVERSION {
            let generation = fx.cache.generation(&fx.tenant, view);
            fx.cache.put(&fx.tenant, view, generation, json!({"stale": true}));
        }

        fx.converter.convert(&lead.id).await.unwrap();

        for view in View::CONVERSION {
            assert!(fx.cache.get(&fx.tenant, view).is_none(), "{view:?} still cached");
        }
    }

    #[tokio::test]
    async fn failed_conversion_leaves_cache_untouched() {
        let fx = fixture().await;
        let generation = fx.cache.generation(&fx.tenant, View::Leads);
        fx.cache.put(&fx.tenant, View::Leads, generation, json!({"leads": []}));

        fx.converter.convert("missing").await.unwrap_err();

        assert!(fx.cache.get(&fx.tenant, View::Leads).is_some());
    }

    #[tokio::test]
    async fn listing_read_before_conversion_is_not_cached() {
        let fx = fixture().await;
        let lead = fx.storage.create_lead(&new_lead(None)).await.unwrap();

        let generation = fx.cache.generation(&fx.tenant, View::Clientes);
        let snapshot = json!({ "clientes": fx.storage.list_clients().await.unwrap() });

        fx.converter.convert(&lead.id).await.unwrap();

        assert!(!fx.cache.put(&fx.tenant, View::Clientes, generation, snapshot));
        assert!(fx.cache.get(&fx.tenant, View::Clientes).is_none());
    }
}
