/// Configuration management for the Leadway CRM backend
///
/// Handles server binding, per-tenant database location, third-party API
/// endpoints, the reminder schedule and view cache lifetime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Third-party chat and messaging endpoints
    pub integrations: IntegrationsConfig,
    /// Appointment reminder sweep
    pub reminders: ReminderConfig,
    /// Cached listing fragments
    pub cache: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for tenant-isolated storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base directory for all tenant databases (default: "data")
    /// Creates: {data_dir}/{tenant_slug}/crm.db
    pub data_dir: String,
}

/// Default endpoints for the chat-completion and messaging providers.
/// A `base_url` stored in a tenant's integration row takes precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    pub chat_api_url: String,
    pub messaging_api_url: String,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Six-field cron expression (seconds first), as tokio-cron-scheduler expects
    pub schedule: String,
    /// How far ahead an appointment must be to get a reminder
    pub window_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl IntegrationsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("LEADWAY_HOST", "0.0.0.0"),
                port: env_parse("LEADWAY_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("LEADWAY_DATA_DIR", "data"),
            },
            integrations: IntegrationsConfig {
                chat_api_url: env_or("LEADWAY_CHAT_API_URL", "https://api.openai.com"),
                messaging_api_url: env_or(
                    "LEADWAY_MESSAGING_API_URL",
                    "https://graph.facebook.com/v19.0",
                ),
                http_timeout_secs: env_parse("LEADWAY_HTTP_TIMEOUT_SECS", 30),
            },
            reminders: ReminderConfig {
                schedule: env_or("LEADWAY_REMINDER_CRON", "0 */5 * * * *"),
                window_hours: env_parse("LEADWAY_REMINDER_WINDOW_HOURS", 24),
            },
            cache: CacheConfig {
                ttl_secs: env_parse("LEADWAY_CACHE_TTL_SECS", 60),
            },
        }
    }
}
