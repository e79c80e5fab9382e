/// SQLite persistence for integration credentials and conversation logs
///
/// Credentials live in `integraciones`; every adapter exchange is written to
/// `conversaciones`/`mensajes` in a single transaction.

use crate::crm::types::timestamp_now;
use crate::integrations::types::{ConversationTarget, Integration, NewMessage, StoredMessage};
use anyhow::Result;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IntegrationStorage {
    pool: SqlitePool,
}

impl IntegrationStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create or replace a provider's credentials
    pub async fn upsert(&self, proveedor: &str, config: &Value, activo: bool) -> Result<Integration> {
        let stored = sqlx::query_as::<_, Integration>(
            r#"
            INSERT INTO integraciones (proveedor, config, activo, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(proveedor) DO UPDATE SET
                config = excluded.config,
                activo = excluded.activo,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(proveedor)
        .bind(serde_json::to_string(config)?)
        .bind(activo)
        .bind(timestamp_now())
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Credentials for an active provider
    pub async fn get_active(&self, proveedor: &str) -> Result<Option<Integration>> {
        let integration = sqlx::query_as::<_, Integration>(
            "SELECT * FROM integraciones WHERE proveedor = ? AND activo = 1",
        )
        .bind(proveedor)
        .fetch_optional(&self.pool)
        .await?;
        Ok(integration)
    }

    pub async fn list(&self) -> Result<Vec<Integration>> {
        let integrations =
            sqlx::query_as::<_, Integration>("SELECT * FROM integraciones ORDER BY proveedor")
                .fetch_all(&self.pool)
                .await?;
        Ok(integrations)
    }
}

#[derive(Debug, Clone)]
pub struct ConversationStorage {
    pool: SqlitePool,
}

impl ConversationStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Channel of a conversation, if it exists
    pub async fn channel_of(&self, conversacion_id: &str) -> Result<Option<String>> {
        let canal = sqlx::query_scalar("SELECT canal FROM conversaciones WHERE id = ?")
            .bind(conversacion_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(canal)
    }

    /// First referenced lead or client that does not exist, as "lead {id}" or "cliente {id}"
    ///
    /// Adapters check this before calling a provider so the exchange can
    /// always be recorded afterwards.
    pub async fn missing_link(&self, lead_id: Option<&str>, cliente_id: Option<&str>) -> Result<Option<String>> {
        if let Some(id) = lead_id {
            let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM leads WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if found.is_none() {
                return Ok(Some(format!("lead {}", id)));
            }
        }
        if let Some(id) = cliente_id {
            let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM clientes WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if found.is_none() {
                return Ok(Some(format!("cliente {}", id)));
            }
        }
        Ok(None)
    }

    /// Most recent conversation on a channel with a given contact
    pub async fn find_by_contact(&self, canal: &str, contacto: &str) -> Result<Option<String>> {
        let found = sqlx::query_scalar(
            "SELECT id FROM conversaciones WHERE canal = ? AND contacto = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(canal)
        .bind(contacto)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found)
    }

    /// Messages of a conversation in the order they were written
    pub async fn history(&self, conversacion_id: &str) -> Result<Vec<StoredMessage>> {
        let messages = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM mensajes WHERE conversacion_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversacion_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    /// Write an exchange, creating the conversation when the target names none
    ///
    /// An existing conversation picks up the target's lead and client links
    /// when given; links it already has are only replaced by new values.
    /// Returns the conversation id and the ids of the inserted messages.
    pub async fn record_exchange(
        &self,
        target: &ConversationTarget,
        messages: &[NewMessage],
    ) -> Result<(String, Vec<String>)> {
        let mut tx = self.pool.begin().await?;

        let conversacion_id = match &target.conversacion_id {
            Some(id) => {
                if target.lead_id.is_some() || target.cliente_id.is_some() {
                    sqlx::query(
                        r#"
                        UPDATE conversaciones
                        SET lead_id = COALESCE(?, lead_id), cliente_id = COALESCE(?, cliente_id)
                        WHERE id = ?
                        "#,
                    )
                    .bind(&target.lead_id)
                    .bind(&target.cliente_id)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }
                id.clone()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO conversaciones (id, canal, contacto, lead_id, cliente_id, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(target.canal)
                .bind(&target.contacto)
                .bind(&target.lead_id)
                .bind(&target.cliente_id)
                .bind(timestamp_now())
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        let mut message_ids = Vec::with_capacity(messages.len());
        for message in messages {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO mensajes (id, conversacion_id, rol, contenido, proveedor_id, estado, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&conversacion_id)
            .bind(message.rol)
            .bind(&message.contenido)
            .bind(&message.proveedor_id)
            .bind(&message.estado)
            .bind(timestamp_now())
            .execute(&mut *tx)
            .await?;
            message_ids.push(id);
        }

        tx.commit().await?;

        tracing::debug!("💬 Recorded {} messages in conversation {}", message_ids.len(), conversacion_id);

        Ok((conversacion_id, message_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::types::{CANAL_CHAT, PROVEEDOR_CHAT, ROL_ASSISTANT, ROL_USER};
    use crate::tenant::{TenantDatabaseManager, TenantSlug};
    use serde_json::json;

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        TenantDatabaseManager::new(dir.path())
            .get_pool(&TenantSlug::parse("acme").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn inactive_integrations_are_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let storage = IntegrationStorage::new(pool(&dir).await);

        storage.upsert(PROVEEDOR_CHAT, &json!({"api_key": "k1"}), true).await.unwrap();
        let active = storage.get_active(PROVEEDOR_CHAT).await.unwrap().unwrap();
        assert_eq!(active.setting("api_key"), Some("k1"));

        storage.upsert(PROVEEDOR_CHAT, &json!({"api_key": "k2"}), false).await.unwrap();
        assert!(storage.get_active(PROVEEDOR_CHAT).await.unwrap().is_none());
        assert_eq!(storage.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exchanges_append_to_existing_conversations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConversationStorage::new(pool(&dir).await);
        let mut target = ConversationTarget {
            conversacion_id: None,
            canal: CANAL_CHAT,
            contacto: None,
            lead_id: None,
            cliente_id: None,
        };
        let turn = |rol, texto: &str| NewMessage {
            rol,
            contenido: texto.to_string(),
            proveedor_id: None,
            estado: None,
        };

        let (id, ids) = storage
            .record_exchange(&target, &[turn(ROL_USER, "hola"), turn(ROL_ASSISTANT, "buenas")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(storage.channel_of(&id).await.unwrap().as_deref(), Some(CANAL_CHAT));
        assert!(storage.channel_of("nope").await.unwrap().is_none());

        target.conversacion_id = Some(id.clone());
        storage.record_exchange(&target, &[turn(ROL_USER, "precio?")]).await.unwrap();

        let history = storage.history(&id).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.contenido.as_str()).collect();
        assert_eq!(contents, vec!["hola", "buenas", "precio?"]);
    }

    #[tokio::test]
    async fn missing_links_are_reported_before_recording() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;
        sqlx::query(
            "INSERT INTO leads (id, nombre, estado, created_at, updated_at) VALUES ('l1', 'Ana', 'nuevo', '', '')",
        )
        .execute(&pool)
        .await
        .unwrap();
        let storage = ConversationStorage::new(pool);

        assert_eq!(storage.missing_link(Some("l1"), None).await.unwrap(), None);
        assert_eq!(storage.missing_link(None, None).await.unwrap(), None);
        assert_eq!(
            storage.missing_link(Some("l2"), None).await.unwrap().as_deref(),
            Some("lead l2")
        );
        assert_eq!(
            storage.missing_link(Some("l1"), Some("c9")).await.unwrap().as_deref(),
            Some("cliente c9")
        );
    }
}
