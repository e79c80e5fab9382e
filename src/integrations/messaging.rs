/// Messaging adapter
///
/// Sends a text message through a WhatsApp Cloud-style API using the tenant's
/// `whatsapp` credentials and records it as an outbound message in the
/// contact's conversation. A send that names a lead or client links the
/// contact's conversation to it, existing conversations included.

use crate::config::IntegrationsConfig;
use crate::integrations::{
    http::{build_client, join_url, post_json},
    storage::{ConversationStorage, IntegrationStorage},
    types::{
        ConversationTarget, IntegrationError, NewMessage, CANAL_WHATSAPP, PROVEEDOR_MENSAJERIA,
        ROL_OUTBOUND,
    },
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::sqlite::SqlitePool;

const ESTADO_ENVIADO: &str = "enviado";

#[derive(Debug, Clone, Deserialize)]
pub struct OutboundMessage {
    /// Recipient phone number in international format
    pub to: String,
    pub texto: String,
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageReceipt {
    pub conversacion_id: String,
    pub mensaje_id: String,
    pub proveedor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Clone)]
pub struct MessagingAdapter {
    http: Client,
    default_base_url: String,
}

impl MessagingAdapter {
    pub fn new(config: &IntegrationsConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            http: build_client(config.http_timeout())?,
            default_base_url: config.messaging_api_url.clone(),
        })
    }

    pub async fn send(
        &self,
        pool: &SqlitePool,
        message: &OutboundMessage,
    ) -> Result<MessageReceipt, IntegrationError> {
        let integration = IntegrationStorage::new(pool.clone())
            .get_active(PROVEEDOR_MENSAJERIA)
            .await?
            .ok_or_else(|| IntegrationError::NotConfigured(PROVEEDOR_MENSAJERIA.to_string()))?;

        let api_key = integration.credential("api_key")?;
        let phone_number_id = integration.credential("phone_number_id")?;
        let base_url = integration.setting("base_url").unwrap_or(&self.default_base_url);

        let conversations = ConversationStorage::new(pool.clone());
        if let Some(missing) = conversations
            .missing_link(message.lead_id.as_deref(), message.cliente_id.as_deref())
            .await?
        {
            return Err(IntegrationError::NotFound(missing));
        }

        let body = json!({
            "messaging_product": "whatsapp",
            "to": message.to,
            "type": "text",
            "text": { "body": message.texto },
        });

        tracing::info!("📨 Sending {} message to {}", PROVEEDOR_MENSAJERIA, message.to);

        let url = join_url(base_url, &format!("{}/messages", phone_number_id));
        let response: SendResponse =
            post_json(&self.http, &url, api_key, PROVEEDOR_MENSAJERIA, &body).await?;
        let proveedor_id = response.messages.into_iter().next().map(|m| m.id);

        let target = ConversationTarget {
            conversacion_id: conversations.find_by_contact(CANAL_WHATSAPP, &message.to).await?,
            canal: CANAL_WHATSAPP,
            contacto: Some(message.to.clone()),
            lead_id: message.lead_id.clone(),
            cliente_id: message.cliente_id.clone(),
        };
        let (conversacion_id, mut ids) = conversations
            .record_exchange(
                &target,
                &[NewMessage {
                    rol: ROL_OUTBOUND,
                    contenido: message.texto.clone(),
                    proveedor_id: proveedor_id.clone(),
                    estado: Some(ESTADO_ENVIADO.to_string()),
                }],
            )
            .await?;
        let mensaje_id = ids
            .pop()
            .ok_or_else(|| IntegrationError::Storage(anyhow::anyhow!("outbound message was not recorded")))?;

        Ok(MessageReceipt {
            conversacion_id,
            mensaje_id,
            proveedor_id,
        })
    }
}
