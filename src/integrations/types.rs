/// Integration credentials, adapter errors and stored conversation records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use thiserror::Error;

/// Provider key of the chat-completion integration
pub const PROVEEDOR_CHAT: &str = "openai";
/// Provider key of the messaging integration
pub const PROVEEDOR_MENSAJERIA: &str = "whatsapp";

pub const CANAL_CHAT: &str = "chat";
pub const CANAL_WHATSAPP: &str = "whatsapp";

pub const ROL_USER: &str = "user";
pub const ROL_ASSISTANT: &str = "assistant";
pub const ROL_OUTBOUND: &str = "outbound";

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("integration '{0}' is not configured or inactive")]
    NotConfigured(String),
    #[error("integration '{proveedor}' is missing '{field}'")]
    MissingCredential {
        proveedor: String,
        field: &'static str,
    },
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    /// A lead or client referenced by the request does not exist
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid credentials for '{0}'")]
    InvalidCredentials(String),
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A tenant's stored credentials for one provider
#[derive(Debug, Clone)]
pub struct Integration {
    pub proveedor: String,
    /// Provider settings: `api_key`, optional `base_url`, `model`, `phone_number_id`...
    pub config: Value,
    pub activo: bool,
    pub updated_at: String,
}

impl Integration {
    pub fn credential(&self, field: &'static str) -> Result<&str, IntegrationError> {
        self.setting(field)
            .ok_or_else(|| IntegrationError::MissingCredential {
                proveedor: self.proveedor.clone(),
                field,
            })
    }

    /// Non-empty string setting, if present
    pub fn setting(&self, field: &str) -> Option<&str> {
        self.config
            .get(field)
            .and_then(Value::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

impl<'r> FromRow<'r, SqliteRow> for Integration {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let raw: String = row.try_get("config")?;
        let config = serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
            index: "config".to_string(),
            source: Box::new(e),
        })?;
        Ok(Self {
            proveedor: row.try_get("proveedor")?,
            config,
            activo: row.try_get("activo")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Integration listing entry; credential values are never exposed
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationSummary {
    pub proveedor: String,
    pub activo: bool,
    pub campos: Vec<String>,
    pub updated_at: String,
}

impl From<&Integration> for IntegrationSummary {
    fn from(integration: &Integration) -> Self {
        let mut campos: Vec<String> = integration
            .config
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        campos.sort();
        Self {
            proveedor: integration.proveedor.clone(),
            activo: integration.activo,
            campos,
            updated_at: integration.updated_at.clone(),
        }
    }
}

/// Request body for storing a provider's credentials
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationUpdate {
    pub config: Value,
    #[serde(default = "default_activo")]
    pub activo: bool,
}

fn default_activo() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub conversacion_id: String,
    pub rol: String,
    pub contenido: String,
    pub proveedor_id: Option<String>,
    pub estado: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub rol: &'static str,
    pub contenido: String,
    pub proveedor_id: Option<String>,
    pub estado: Option<String>,
}

/// Where an exchange is recorded: an existing conversation or a new one
#[derive(Debug, Clone)]
pub struct ConversationTarget {
    pub conversacion_id: Option<String>,
    pub canal: &'static str,
    pub contacto: Option<String>,
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
}
