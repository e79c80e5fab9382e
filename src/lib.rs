/// Leadway: multi-tenant CRM backend
///
/// Leads, clients, activities, appointments and the lead-to-client conversion,
/// with AI chat and messaging adapters, served over a JSON HTTP API.

// Core configuration and setup
pub mod config;

// Tenant isolation - one SQLite database per tenant
pub mod tenant;

// CRM records, storage, the conversion workflow and cached views
pub mod crm;

// Third-party chat and messaging adapters
pub mod integrations;

// Background jobs (appointment reminders)
pub mod runtime;

// HTTP API layer - tenant-scoped REST endpoints
pub mod api;

// Server setup and initialization
pub mod server;

pub use api::{create_router, AppState};
pub use crm::{ConversionError, ConversionOutcome, LeadConverter};
pub use server::start_server;
pub use tenant::{TenantDatabaseManager, TenantSlug};
