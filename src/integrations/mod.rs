/// Third-party integrations
///
/// Thin request/response adapters that look up a tenant's credentials in
/// `integraciones`, call the provider and persist the exchange:
/// - AI chat completions (`openai`)
/// - Outbound messaging (`whatsapp`)

pub mod types;

pub mod storage;

mod http;

pub mod chat;

pub mod messaging;

pub use chat::{ChatAdapter, ChatReply, ChatRequest};
pub use messaging::{MessageReceipt, MessagingAdapter, OutboundMessage};
pub use storage::{ConversationStorage, IntegrationStorage};
pub use types::{IntegrationError, IntegrationSummary, IntegrationUpdate};
