/// SQLite persistence layer for CRM records
///
/// Pass-through CRUD over a tenant's leads, clients, activities and
/// appointments. The conversion workflow lives in `crm::conversion`; this
/// module only refuses writes that would bypass it.

use crate::crm::types::{
    timestamp_now, Activity, Appointment, Client, DashboardSummary, Lead, NewActivity,
    NewAppointment, NewLead, ESTADO_NUEVO, format_timestamp,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Executor, Sqlite};
use std::collections::BTreeMap;
use uuid::Uuid;

const LEAD_COLUMNS: &str = "id, nombre, email, telefono, empresa, origen, notas, estado, \
    fecha_conversion, convertido_a_cliente_id, created_at, updated_at";

const RECENT_ACTIVITY_LIMIT: i64 = 10;

/// Tenant-scoped CRM storage
///
/// Cheap to construct per request: it only wraps a pool handle.
#[derive(Debug, Clone)]
pub struct CrmStorage {
    pool: SqlitePool,
}

impl CrmStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store a new lead; `estado` defaults to "nuevo"
    pub async fn create_lead(&self, lead: &NewLead) -> Result<Lead> {
        let id = Uuid::new_v4().to_string();
        let now = timestamp_now();
        let estado = lead.estado.as_deref().unwrap_or(ESTADO_NUEVO);

        sqlx::query(
            r#"
            INSERT INTO leads (id, nombre, email, telefono, empresa, origen, notas, estado, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(lead.nombre.trim())
        .bind(&lead.email)
        .bind(&lead.telefono)
        .bind(&lead.empresa)
        .bind(&lead.origen)
        .bind(&lead.notas)
        .bind(estado)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_lead(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Lead {} vanished right after insert", id))
    }

    pub async fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        let lead = sqlx::query_as::<_, Lead>(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lead)
    }

    /// List leads newest first, optionally filtered by estado
    pub async fn list_leads(&self, estado: Option<&str>) -> Result<Vec<Lead>> {
        let leads = match estado {
            Some(estado) => {
                sqlx::query_as::<_, Lead>(&format!(
                    "SELECT {LEAD_COLUMNS} FROM leads WHERE estado = ? ORDER BY created_at DESC, rowid DESC"
                ))
                .bind(estado)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Lead>(&format!(
                    "SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at DESC, rowid DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(leads)
    }

    /// Change the estado label of an unconverted lead
    ///
    /// Returns false when no unconverted lead with this id exists.
    pub async fn update_lead_estado(&self, id: &str, estado: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE leads SET estado = ?, updated_at = ? WHERE id = ? AND convertido_a_cliente_id IS NULL",
        )
        .bind(estado)
        .bind(timestamp_now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete an unconverted lead; converted leads are kept for the audit trail
    pub async fn delete_lead(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM leads WHERE id = ? AND convertido_a_cliente_id IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_client(&self, id: &str) -> Result<Option<Client>> {
        let client = sqlx::query_as::<_, Client>("SELECT * FROM clientes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(client)
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>> {
        let clients =
            sqlx::query_as::<_, Client>("SELECT * FROM clientes ORDER BY created_at DESC, rowid DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(clients)
    }

    pub async fn insert_activity(&self, activity: &NewActivity) -> Result<Activity> {
        insert_activity(&self.pool, activity).await
    }

    /// List activities newest first, narrowed to a lead and/or client
    pub async fn list_activities(
        &self,
        lead_id: Option<&str>,
        cliente_id: Option<&str>,
    ) -> Result<Vec<Activity>> {
        let activities = sqlx::query_as::<_, Activity>(
            r#"
            SELECT * FROM actividades
            WHERE (?1 IS NULL OR lead_id = ?1)
              AND (?2 IS NULL OR cliente_id = ?2)
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(lead_id)
        .bind(cliente_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }

    pub async fn create_appointment(&self, appointment: &NewAppointment) -> Result<Appointment> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO citas (id, titulo, fecha_inicio, lead_id, cliente_id, notas, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(appointment.titulo.trim())
        .bind(format_timestamp(appointment.fecha_inicio))
        .bind(&appointment.lead_id)
        .bind(&appointment.cliente_id)
        .bind(&appointment.notas)
        .bind(timestamp_now())
        .execute(&self.pool)
        .await?;

        let stored = sqlx::query_as::<_, Appointment>("SELECT * FROM citas WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    /// Appointments starting at or after `from`, soonest first
    pub async fn list_upcoming_appointments(&self, from: DateTime<Utc>) -> Result<Vec<Appointment>> {
        let appointments = sqlx::query_as::<_, Appointment>(
            "SELECT * FROM citas WHERE fecha_inicio >= ? ORDER BY fecha_inicio ASC",
        )
        .bind(format_timestamp(from))
        .fetch_all(&self.pool)
        .await?;
        Ok(appointments)
    }

    pub async fn dashboard_summary(&self) -> Result<DashboardSummary> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT estado, COUNT(*) FROM leads GROUP BY estado")
                .fetch_all(&self.pool)
                .await?;
        let leads_por_estado: BTreeMap<String, i64> = rows.into_iter().collect();

        let total_clientes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clientes")
            .fetch_one(&self.pool)
            .await?;

        let actividades_recientes = sqlx::query_as::<_, Activity>(
            "SELECT * FROM actividades ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(RECENT_ACTIVITY_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(DashboardSummary {
            total_leads: leads_por_estado.values().sum(),
            leads_por_estado,
            total_clientes,
            actividades_recientes,
        })
    }
}

/// Insert an activity row through any executor (pool or open transaction)
pub async fn insert_activity<'e, E>(executor: E, activity: &NewActivity) -> Result<Activity>
where
    E: Executor<'e, Database = Sqlite>,
{
    let stored = sqlx::query_as::<_, Activity>(
        r#"
        INSERT INTO actividades (id, tipo, descripcion, lead_id, cliente_id, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&activity.tipo)
    .bind(&activity.descripcion)
    .bind(&activity.lead_id)
    .bind(&activity.cliente_id)
    .bind(serde_json::to_string(&activity.metadata)?)
    .bind(timestamp_now())
    .fetch_one(executor)
    .await?;

    Ok(stored)
}
