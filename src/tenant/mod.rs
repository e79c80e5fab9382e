/// Tenant management module
///
/// Handles tenant identity and database isolation. Each tenant gets its own
/// SQLite database: {data_dir}/{slug}/crm.db

pub mod database;
pub mod types;

pub use database::TenantDatabaseManager;
pub use types::{TenantError, TenantSlug};
