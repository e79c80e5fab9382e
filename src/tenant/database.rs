/// Tenant database manager for isolated multi-tenant storage
///
/// Manages one SQLite database per tenant: {data_dir}/{slug}/crm.db
///
/// Pools are opened lazily on first access and cached for the process lifetime.
/// A tenant's database is created only by `get_pool`, never by a read.
/// No query ever crosses tenants: every handler resolves its pool from the slug.

use crate::tenant::types::TenantSlug;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;

const DATABASE_FILE: &str = "crm.db";

/// Tenant database manager with isolated connection pools
#[derive(Debug)]
pub struct TenantDatabaseManager {
    /// Connection pools keyed by tenant slug
    pools: RwLock<HashMap<TenantSlug, SqlitePool>>,
    /// Base directory for database files
    data_dir: PathBuf,
}

impl TenantDatabaseManager {
    /// Create new tenant database manager
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            data_dir: data_dir.into(),
        }
    }

    /// Get or create the tenant's database pool
    ///
    /// PROVISIONING: creates {data_dir}/{slug}/crm.db on first access.
    /// Only write paths call this; reads go through `existing_pool`.
    pub async fn get_pool(&self, tenant: &TenantSlug) -> Result<SqlitePool> {
        if let Some(pool) = self.cached_pool(tenant).await {
            return Ok(pool);
        }
        self.open_pool(tenant, true).await
    }

    /// Pool for a tenant that already has a database, without creating one
    pub async fn existing_pool(&self, tenant: &TenantSlug) -> Result<Option<SqlitePool>> {
        if let Some(pool) = self.cached_pool(tenant).await {
            return Ok(Some(pool));
        }
        if !self.database_path(tenant).is_file() {
            return Ok(None);
        }
        self.open_pool(tenant, false).await.map(Some)
    }

    // Fast path for pools that are already open
    async fn cached_pool(&self, tenant: &TenantSlug) -> Option<SqlitePool> {
        self.pools.read().await.get(tenant).cloned()
    }

    fn database_path(&self, tenant: &TenantSlug) -> PathBuf {
        self.data_dir.join(tenant.as_str()).join(DATABASE_FILE)
    }

    async fn open_pool(&self, tenant: &TenantSlug, create: bool) -> Result<SqlitePool> {
        let mut pools = self.pools.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(pool) = pools.get(tenant) {
            return Ok(pool.clone());
        }

        let db_path = self.database_path(tenant);
        if create {
            let tenant_dir = self.data_dir.join(tenant.as_str());
            std::fs::create_dir_all(&tenant_dir).with_context(|| {
                format!("Failed to create tenant directory '{}'", tenant_dir.display())
            })?;
            tracing::info!("🆕 Provisioning tenant database: {}", db_path.display());
        } else {
            tracing::info!("🗄️ Opening tenant database pool: {}", db_path.display());
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open database for tenant '{}'", tenant))?;

        init_tenant_schema(&pool).await?;

        pools.insert(tenant.clone(), pool.clone());

        tracing::info!("✅ Tenant database ready: {}/{}", tenant, DATABASE_FILE);

        Ok(pool)
    }

    /// Tenants that have a database on disk, whether or not a pool is open yet
    pub async fn known_tenants(&self) -> Result<Vec<TenantSlug>> {
        let mut tenants: Vec<TenantSlug> = self.pools.read().await.keys().cloned().collect();

        if self.data_dir.is_dir() {
            let entries = std::fs::read_dir(&self.data_dir).with_context(|| {
                format!("Failed to read data directory '{}'", self.data_dir.display())
            })?;
            for entry in entries.flatten() {
                if !entry.path().join(DATABASE_FILE).is_file() {
                    continue;
                }
                let name = entry.file_name();
                match name.to_str().map(TenantSlug::parse) {
                    Some(Ok(slug)) if !tenants.contains(&slug) => tenants.push(slug),
                    Some(Ok(_)) => {}
                    _ => tracing::debug!("Skipping non-tenant directory: {:?}", name),
                }
            }
        }

        tenants.sort();
        Ok(tenants)
    }

    /// Number of open tenant pools, for monitoring
    pub async fn open_pool_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

/// Initialize a tenant database schema
///
/// Safe to call multiple times (uses IF NOT EXISTS).
async fn init_tenant_schema(pool: &SqlitePool) -> Result<()> {
    // The lead -> client back-reference is checked at commit time so the
    // conversion can claim the lead before inserting the client.
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS clientes (
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL,
            email TEXT,
            telefono TEXT,
            empresa TEXT,
            tipo_cliente TEXT NOT NULL,
            estado TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL,
            email TEXT,
            telefono TEXT,
            empresa TEXT,
            origen TEXT,
            notas TEXT,
            estado TEXT NOT NULL DEFAULT 'nuevo',
            fecha_conversion TEXT,
            convertido_a_cliente_id TEXT
                REFERENCES clientes(id) DEFERRABLE INITIALLY DEFERRED,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS actividades (
            id TEXT PRIMARY KEY,
            tipo TEXT NOT NULL,
            descripcion TEXT NOT NULL,
            lead_id TEXT REFERENCES leads(id) ON DELETE SET NULL,
            cliente_id TEXT REFERENCES clientes(id) ON DELETE SET NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS citas (
            id TEXT PRIMARY KEY,
            titulo TEXT NOT NULL,
            fecha_inicio TEXT NOT NULL,
            lead_id TEXT REFERENCES leads(id) ON DELETE SET NULL,
            cliente_id TEXT REFERENCES clientes(id) ON DELETE SET NULL,
            notas TEXT,
            recordatorio_enviado INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS conversaciones (
            id TEXT PRIMARY KEY,
            canal TEXT NOT NULL,
            contacto TEXT,
            lead_id TEXT REFERENCES leads(id) ON DELETE SET NULL,
            cliente_id TEXT REFERENCES clientes(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS mensajes (
            id TEXT PRIMARY KEY,
            conversacion_id TEXT NOT NULL REFERENCES conversaciones(id) ON DELETE CASCADE,
            rol TEXT NOT NULL,
            contenido TEXT NOT NULL,
            proveedor_id TEXT,
            estado TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS integraciones (
            proveedor TEXT PRIMARY KEY,
            config TEXT NOT NULL,
            activo INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS usuarios (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            nombre TEXT,
            rol TEXT NOT NULL DEFAULT 'agente',
            created_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_leads_estado ON leads(estado)",
        "CREATE INDEX IF NOT EXISTS idx_actividades_lead ON actividades(lead_id)",
        "CREATE INDEX IF NOT EXISTS idx_actividades_cliente ON actividades(cliente_id)",
        "CREATE INDEX IF NOT EXISTS idx_citas_fecha ON citas(fecha_inicio)",
        "CREATE INDEX IF NOT EXISTS idx_mensajes_conversacion ON mensajes(conversacion_id, created_at)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to initialize tenant schema")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pools_are_isolated_and_cached_per_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TenantDatabaseManager::new(dir.path());
        let acme = TenantSlug::parse("acme").unwrap();
        let globex = TenantSlug::parse("globex").unwrap();

        let pool = manager.get_pool(&acme).await.unwrap();
        sqlx::query(
            "INSERT INTO leads (id, nombre, estado, created_at, updated_at) VALUES ('l1', 'Ana', 'nuevo', '', '')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let other = manager.get_pool(&globex).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
            .fetch_one(&other)
            .await
            .unwrap();
        assert_eq!(count, 0);

        manager.get_pool(&acme).await.unwrap();
        assert_eq!(manager.open_pool_count().await, 2);
        assert!(dir.path().join("acme").join(DATABASE_FILE).is_file());
    }

    #[tokio::test]
    async fn known_tenants_includes_databases_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = TenantDatabaseManager::new(dir.path());
            manager.get_pool(&TenantSlug::parse("acme").unwrap()).await.unwrap();
        }
        std::fs::create_dir_all(dir.path().join("Not A Tenant")).unwrap();

        let fresh = TenantDatabaseManager::new(dir.path());
        let tenants = fresh.known_tenants().await.unwrap();
        assert_eq!(tenants, vec![TenantSlug::parse("acme").unwrap()]);
    }

    #[tokio::test]
    async fn reads_never_provision_a_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TenantDatabaseManager::new(dir.path());
        let ghost = TenantSlug::parse("ghost").unwrap();

        assert!(manager.existing_pool(&ghost).await.unwrap().is_none());
        assert!(!dir.path().join("ghost").exists());
        assert_eq!(manager.open_pool_count().await, 0);
        assert!(manager.known_tenants().await.unwrap().is_empty());

        manager.get_pool(&ghost).await.unwrap();

        let fresh = TenantDatabaseManager::new(dir.path());
        assert!(fresh.existing_pool(&ghost).await.unwrap().is_some());
    }
}
