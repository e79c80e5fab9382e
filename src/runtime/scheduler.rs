/// Background appointment reminder service
///
/// Runs a tokio-cron-scheduler job that sweeps every known tenant for
/// appointments starting within the reminder window and records a
/// `recordatorio_cita` activity for each of them, once.

use crate::{
    config::ReminderConfig,
    crm::{
        cache::{View, ViewCache},
        storage::insert_activity,
        types::{format_timestamp, Appointment, NewActivity, ACTIVIDAD_RECORDATORIO_CITA},
    },
    tenant::{TenantDatabaseManager, TenantSlug},
};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct ReminderScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    tenants: Arc<TenantDatabaseManager>,
    cache: Arc<ViewCache>,
    config: ReminderConfig,
}

impl ReminderScheduler {
    pub async fn new(
        tenants: Arc<TenantDatabaseManager>,
        cache: Arc<ViewCache>,
        config: ReminderConfig,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            tenants,
            cache,
            config,
        })
    }

    /// Register the sweep job and start the scheduler
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting appointment reminders ({})", self.config.schedule);

        let tenants = Arc::clone(&self.tenants);
        let cache = Arc::clone(&self.cache);
        let window = Duration::hours(self.config.window_hours);

        let job = Job::new_async(self.config.schedule.as_str(), move |_uuid, _l| {
            let tenants = Arc::clone(&tenants);
            let cache = Arc::clone(&cache);

            Box::pin(async move {
                tracing::debug!("🔔 Reminder sweep triggered");
                match sweep_all_tenants(&tenants, &cache, Utc::now(), window).await {
                    Ok(0) => {}
                    Ok(sent) => tracing::info!("✅ Recorded {} appointment reminders", sent),
                    Err(e) => tracing::error!("❌ Reminder sweep failed: {}", e),
                }
            })
        })?;

        {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?;
            scheduler.start().await?;
        }

        tracing::info!("✅ Appointment reminder scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping appointment reminder scheduler");
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        Ok(())
    }
}

/// Sweep every tenant; one tenant failing does not stop the others
pub async fn sweep_all_tenants(
    tenants: &TenantDatabaseManager,
    cache: &ViewCache,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<usize> {
    let mut total = 0;
    for tenant in tenants.known_tenants().await? {
        let pool = match tenants.existing_pool(&tenant).await {
            Ok(Some(pool)) => pool,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("⚠️ Skipping reminders for tenant {}: {}", tenant, e);
                continue;
            }
        };
        match sweep_tenant(&pool, cache, &tenant, now, window).await {
            Ok(sent) => total += sent,
            Err(e) => tracing::warn!("⚠️ Reminder sweep failed for tenant {}: {}", tenant, e),
        }
    }
    Ok(total)
}

/// Record reminders for the tenant's appointments starting in `(now, now + window]`
///
/// Each appointment is claimed with a conditional update inside the same
/// transaction as its activity, so overlapping sweeps never double-remind.
pub async fn sweep_tenant(
    pool: &SqlitePool,
    cache: &ViewCache,
    tenant: &TenantSlug,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<usize> {
    let due = sqlx::query_as::<_, Appointment>(
        r#"
        SELECT * FROM citas
        WHERE recordatorio_enviado = 0 AND fecha_inicio > ? AND fecha_inicio <= ?
        ORDER BY fecha_inicio ASC
        "#,
    )
    .bind(format_timestamp(now))
    .bind(format_timestamp(now + window))
    .fetch_all(pool)
    .await?;

    let mut sent = 0;
    for cita in due {
        let mut tx = pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE citas SET recordatorio_enviado = 1 WHERE id = ? AND recordatorio_enviado = 0",
        )
        .bind(&cita.id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            continue;
        }

        insert_activity(
            &mut *tx,
            &NewActivity {
                tipo: ACTIVIDAD_RECORDATORIO_CITA.to_string(),
                descripcion: format!("Recordatorio: {} ({})", cita.titulo, cita.fecha_inicio),
                lead_id: cita.lead_id.clone(),
                cliente_id: cita.cliente_id.clone(),
                metadata: json!({ "cita_id": cita.id, "fecha_inicio": cita.fecha_inicio }),
            },
        )
        .await?;

        tx.commit().await?;
        sent += 1;
    }

    if sent > 0 {
        tracing::info!("🔔 Tenant {}: {} appointment reminders recorded", tenant, sent);
        cache.invalidate(tenant, &[View::Dashboard]);
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::{storage::CrmStorage, types::NewAppointment};

    #[tokio::test]
    async fn reminds_each_upcoming_appointment_once() {
        let dir = tempfile::tempdir().unwrap();
        let tenants = TenantDatabaseManager::new(dir.path());
        let tenant = TenantSlug::parse("acme").unwrap();
        let storage = CrmStorage::new(tenants.get_pool(&tenant).await.unwrap());
        let cache = ViewCache::new(std::time::Duration::from_secs(60));
        let now = Utc::now();

        for (titulo, hours) in [("pasada", -1), ("pronto", 2), ("lejana", 72)] {
            storage
                .create_appointment(&NewAppointment {
                    titulo: titulo.to_string(),
                    fecha_inicio: now + Duration::hours(hours),
                    lead_id: None,
                    cliente_id: None,
                    notas: None,
                })
                .await
                .unwrap();
        }

        let window = Duration::hours(24);
        assert_eq!(sweep_all_tenants(&tenants, &cache, now, window).await.unwrap(), 1);
        assert_eq!(sweep_all_tenants(&tenants, &cache, now, window).await.unwrap(), 0);

        let reminders = storage.list_activities(None, None).await.unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].tipo, ACTIVIDAD_RECORDATORIO_CITA);
        assert!(reminders[0].descripcion.contains("pronto"));
    }
}
