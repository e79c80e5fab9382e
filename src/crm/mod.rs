/// CRM domain layer
///
/// This module handles the tenant's customer records and their lifecycle:
/// - Record definitions (Lead, Client, Activity, Appointment)
/// - SQLite persistence with sqlx
/// - The lead-to-client conversion workflow
/// - Lock-free cache of listing fragments using ArcSwap

pub mod types;

pub mod storage;

pub mod conversion;

pub mod cache;

pub use cache::{View, ViewCache};
pub use conversion::{ConversionError, ConversionOutcome, LeadConverter};
pub use storage::CrmStorage;
pub use types::{Activity, Appointment, Client, Lead};
