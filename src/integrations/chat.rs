/// AI chat adapter
///
/// Proxies a user message to an OpenAI-compatible chat-completion API using the
/// tenant's stored `openai` credentials, then records the user turn and the
/// assistant reply. No retry: a failed upstream call records nothing.

use crate::config::IntegrationsConfig;
use crate::integrations::{
    http::{build_client, join_url, post_json},
    storage::{ConversationStorage, IntegrationStorage},
    types::{
        ConversationTarget, IntegrationError, NewMessage, CANAL_CHAT, PROVEEDOR_CHAT,
        ROL_ASSISTANT, ROL_USER,
    },
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const COMPLETIONS_PATH: &str = "v1/chat/completions";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub mensaje: String,
    pub conversacion_id: Option<String>,
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
    /// Overrides the integration's `system_prompt`
    pub system: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatReply {
    pub conversacion_id: String,
    pub respuesta: String,
    pub modelo: String,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionReply,
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatAdapter {
    http: Client,
    default_base_url: String,
}

impl ChatAdapter {
    pub fn new(config: &IntegrationsConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            http: build_client(config.http_timeout())?,
            default_base_url: config.chat_api_url.clone(),
        })
    }

    pub async fn send(&self, pool: &SqlitePool, request: &ChatRequest) -> Result<ChatReply, IntegrationError> {
        let integration = IntegrationStorage::new(pool.clone())
            .get_active(PROVEEDOR_CHAT)
            .await?
            .ok_or_else(|| IntegrationError::NotConfigured(PROVEEDOR_CHAT.to_string()))?;

        let api_key = integration.credential("api_key")?;
        let base_url = integration.setting("base_url").unwrap_or(&self.default_base_url);
        let model = integration.setting("model").unwrap_or(DEFAULT_MODEL);
        let system = request
            .system
            .as_deref()
            .or_else(|| integration.setting("system_prompt"));

        let conversations = ConversationStorage::new(pool.clone());
        if let Some(missing) = conversations
            .missing_link(request.lead_id.as_deref(), request.cliente_id.as_deref())
            .await?
        {
            return Err(IntegrationError::NotFound(missing));
        }

        let history = match &request.conversacion_id {
            Some(id) => {
                // Only chat conversations can serve as completion history
                match conversations.channel_of(id).await? {
                    Some(canal) if canal == CANAL_CHAT => {}
                    _ => return Err(IntegrationError::ConversationNotFound(id.clone())),
                }
                conversations.history(id).await?
            }
            None => Vec::new(),
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system {
            messages.push(CompletionMessage { role: "system", content: system });
        }
        messages.extend(
            history
                .iter()
                .filter(|m| m.rol == ROL_USER || m.rol == ROL_ASSISTANT)
                .map(|m| CompletionMessage { role: &m.rol, content: &m.contenido }),
        );
        messages.push(CompletionMessage { role: ROL_USER, content: &request.mensaje });

        tracing::info!("🤖 Chat completion: model {} with {} messages", model, messages.len());

        let url = join_url(base_url, COMPLETIONS_PATH);
        let response: CompletionResponse = post_json(
            &self.http,
            &url,
            api_key,
            PROVEEDOR_CHAT,
            &CompletionRequest { model, messages },
        )
        .await?;

        let respuesta = response
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| IntegrationError::Decode("no message content in completion".to_string()))?;
        let modelo = response.model.unwrap_or_else(|| model.to_string());

        let target = ConversationTarget {
            conversacion_id: request.conversacion_id.clone(),
            canal: CANAL_CHAT,
            contacto: None,
            lead_id: request.lead_id.clone(),
            cliente_id: request.cliente_id.clone(),
        };
        let (conversacion_id, _) = conversations
            .record_exchange(
                &target,
                &[
                    NewMessage {
                        rol: ROL_USER,
                        contenido: request.mensaje.clone(),
                        proveedor_id: None,
                        estado: None,
                    },
                    NewMessage {
                        rol: ROL_ASSISTANT,
                        contenido: respuesta.clone(),
                        proveedor_id: None,
                        estado: None,
                    },
                ],
            )
            .await?;

        Ok(ChatReply {
            conversacion_id,
            respuesta,
            modelo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::test_support::{adapter_config, spawn_upstream, tenant_pool};
    use crate::integrations::types::CANAL_WHATSAPP;
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    #[tokio::test]
    async fn unconfigured_integration_is_reported() {
        let (_dir, pool) = tenant_pool().await;
        let adapter = ChatAdapter::new(&adapter_config("http://127.0.0.1:9")).unwrap();
        let request = ChatRequest {
            mensaje: "hola".to_string(),
            conversacion_id: None,
            lead_id: None,
            cliente_id: None,
            system: None,
        };

        let err = adapter.send(&pool, &request).await.unwrap_err();
        assert!(matches!(err, IntegrationError::NotConfigured(ref p) if p == PROVEEDOR_CHAT));
    }

    #[tokio::test]
    async fn sends_history_and_records_the_exchange() {
        let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::default();
        let captured = Arc::clone(&seen);
        let upstream = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = Arc::clone(&captured);
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let turns = body["messages"].as_array().map(Vec::len).unwrap_or(0);
                    captured.lock().unwrap().push((auth, body));
                    Json(json!({
                        "model": "gpt-test",
                        "choices": [{"message": {"role": "assistant", "content": format!("respuesta {turns}")}}]
                    }))
                }
            }),
        );
        let base_url = spawn_upstream(upstream).await;

        let (_dir, pool) = tenant_pool().await;
        IntegrationStorage::new(pool.clone())
            .upsert(PROVEEDOR_CHAT, &json!({"api_key": "sk-test", "base_url": base_url}), true)
            .await
            .unwrap();
        let adapter = ChatAdapter::new(&adapter_config("http://127.0.0.1:9")).unwrap();

        let first = adapter
            .send(
                &pool,
                &ChatRequest {
                    mensaje: "hola".to_string(),
                    conversacion_id: None,
                    lead_id: None,
                    cliente_id: None,
                    system: Some("Eres un asistente de ventas".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(first.respuesta, "respuesta 2");
        assert_eq!(first.modelo, "gpt-test");

        let second = adapter
            .send(
                &pool,
                &ChatRequest {
                    mensaje: "precio?".to_string(),
                    conversacion_id: Some(first.conversacion_id.clone()),
                    lead_id: None,
                    cliente_id: None,
                    system: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.conversacion_id, first.conversacion_id);
        assert_eq!(second.respuesta, "respuesta 3");

        let calls = seen.lock().unwrap();
        assert_eq!(calls[0].0.as_deref(), Some("Bearer sk-test"));
        assert_eq!(calls[0].1["model"], json!(DEFAULT_MODEL));
        assert_eq!(calls[0].1["messages"][0]["role"], json!("system"));
        assert_eq!(calls[1].1["messages"][1]["content"], json!("respuesta 2"));

        let history = ConversationStorage::new(pool).history(&first.conversacion_id).await.unwrap();
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn upstream_failure_records_nothing() {
        let upstream = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "overloaded") }),
        );
        let base_url = spawn_upstream(upstream).await;

        let (_dir, pool) = tenant_pool().await;
        IntegrationStorage::new(pool.clone())
            .upsert(PROVEEDOR_CHAT, &json!({"api_key": "sk-test", "base_url": base_url}), true)
            .await
            .unwrap();
        let adapter = ChatAdapter::new(&adapter_config("http://127.0.0.1:9")).unwrap();

        let err = adapter
            .send(
                &pool,
                &ChatRequest {
                    mensaje: "hola".to_string(),
                    conversacion_id: None,
                    lead_id: None,
                    cliente_id: None,
                    system: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Http { status: 500, ref body } if body == "overloaded"));

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mensajes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }

    async fn configured_pool(base_url: &str) -> (tempfile::TempDir, SqlitePool) {
        let (dir, pool) = tenant_pool().await;
        IntegrationStorage::new(pool.clone())
            .upsert(PROVEEDOR_CHAT, &json!({"api_key": "sk-test", "base_url": base_url}), true)
            .await
            .unwrap();
        (dir, pool)
    }

    fn counting_upstream(hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"choices": [{"message": {"content": "ok"}}]}))
                }
            }),
        )
    }

    #[tokio::test]
    async fn unknown_lead_is_rejected_before_calling_the_provider() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base_url = spawn_upstream(counting_upstream(Arc::clone(&hits))).await;
        let (_dir, pool) = configured_pool(&base_url).await;
        let adapter = ChatAdapter::new(&adapter_config("http://127.0.0.1:9")).unwrap();

        let err = adapter
            .send(
                &pool,
                &ChatRequest {
                    mensaje: "hola".to_string(),
                    conversacion_id: None,
                    lead_id: Some("no-such-lead".to_string()),
                    cliente_id: None,
                    system: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, IntegrationError::NotFound(ref what) if what == "lead no-such-lead"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn messaging_conversation_is_not_chat_history() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base_url = spawn_upstream(counting_upstream(Arc::clone(&hits))).await;
        let (_dir, pool) = configured_pool(&base_url).await;
        let (whatsapp_id, _) = ConversationStorage::new(pool.clone())
            .record_exchange(
                &ConversationTarget {
                    conversacion_id: None,
                    canal: CANAL_WHATSAPP,
                    contacto: Some("+34600000000".to_string()),
                    lead_id: None,
                    cliente_id: None,
                },
                &[],
            )
            .await
            .unwrap();
        let adapter = ChatAdapter::new(&adapter_config("http://127.0.0.1:9")).unwrap();

        let err = adapter
            .send(
                &pool,
                &ChatRequest {
                    mensaje: "hola".to_string(),
                    conversacion_id: Some(whatsapp_id.clone()),
                    lead_id: None,
                    cliente_id: None,
                    system: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, IntegrationError::ConversationNotFound(ref id) if id == &whatsapp_id));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
