/// Core CRM record definitions
///
/// Leads, clients, activities and appointments as stored in each tenant's
/// database. Timestamps are RFC 3339 UTC strings with millisecond precision so
/// that they sort lexicographically in SQL.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::collections::BTreeMap;

pub const ESTADO_NUEVO: &str = "nuevo";
pub const ESTADO_CONVERTIDO: &str = "convertido";
pub const CLIENTE_ACTIVO: &str = "activo";

pub const ACTIVIDAD_LEAD_CONVERTIDO: &str = "lead_convertido";
pub const ACTIVIDAD_RECORDATORIO_CITA: &str = "recordatorio_cita";

/// Format a UTC instant the way every timestamp column stores it
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// A prospective customer prior to conversion
///
/// `estado` is a free-text label; the known values are nuevo, contactado,
/// calificado, convertido and perdido, but unknown labels are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Lead {
    pub id: String,
    pub nombre: String,
    pub email: Option<String>,
    pub telefono: Option<String>,
    pub empresa: Option<String>,
    /// Ingestion source (web form, import, campaign...)
    pub origen: Option<String>,
    pub notas: Option<String>,
    pub estado: String,
    pub fecha_conversion: Option<String>,
    /// Set exactly once, by the conversion workflow
    pub convertido_a_cliente_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Lead {
    pub fn is_converted(&self) -> bool {
        self.convertido_a_cliente_id.is_some()
    }
}

/// Request body for lead creation (form submission or ingestion)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLead {
    pub nombre: String,
    pub email: Option<String>,
    pub telefono: Option<String>,
    pub empresa: Option<String>,
    pub origen: Option<String>,
    pub notas: Option<String>,
    pub estado: Option<String>,
}

/// Client classification derived from the originating lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipoCliente {
    Empresa,
    Individual,
}

impl TipoCliente {
    /// "empresa" when a company name is present, "individual" otherwise
    pub fn from_empresa(empresa: Option<&str>) -> Self {
        match empresa {
            Some(name) if !name.trim().is_empty() => Self::Empresa,
            _ => Self::Individual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empresa => "empresa",
            Self::Individual => "individual",
        }
    }
}

/// A confirmed customer record
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Client {
    pub id: String,
    pub nombre: String,
    pub email: Option<String>,
    pub telefono: Option<String>,
    pub empresa: Option<String>,
    pub tipo_cliente: String,
    pub estado: String,
    /// Back-reference to the originating lead, among other annotations
    pub metadata: Value,
    pub created_at: String,
}

impl<'r> FromRow<'r, SqliteRow> for Client {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            nombre: row.try_get("nombre")?,
            email: row.try_get("email")?,
            telefono: row.try_get("telefono")?,
            empresa: row.try_get("empresa")?,
            tipo_cliente: row.try_get("tipo_cliente")?,
            estado: row.try_get("estado")?,
            metadata: json_column(row, "metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Audit entry for one event on a lead and/or client
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Activity {
    pub id: String,
    pub tipo: String,
    pub descripcion: String,
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
    pub metadata: Value,
    pub created_at: String,
}

impl<'r> FromRow<'r, SqliteRow> for Activity {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tipo: row.try_get("tipo")?,
            descripcion: row.try_get("descripcion")?,
            lead_id: row.try_get("lead_id")?,
            cliente_id: row.try_get("cliente_id")?,
            metadata: json_column(row, "metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub tipo: String,
    pub descripcion: String,
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
    pub metadata: Value,
}

/// A scheduled meeting with a lead or client
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub titulo: String,
    pub fecha_inicio: String,
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
    pub notas: Option<String>,
    pub recordatorio_enviado: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAppointment {
    pub titulo: String,
    pub fecha_inicio: DateTime<Utc>,
    pub lead_id: Option<String>,
    pub cliente_id: Option<String>,
    pub notas: Option<String>,
}

/// Summary backing the dashboard view
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub total_leads: i64,
    pub leads_por_estado: BTreeMap<String, i64>,
    pub total_clientes: i64,
    pub actividades_recientes: Vec<Activity>,
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Value, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tipo_cliente_follows_company_name() {
        assert_eq!(TipoCliente::from_empresa(Some("Acme SA")), TipoCliente::Empresa);
        assert_eq!(TipoCliente::from_empresa(Some("   ")), TipoCliente::Individual);
        assert_eq!(TipoCliente::from_empresa(Some("")), TipoCliente::Individual);
        assert_eq!(TipoCliente::from_empresa(None), TipoCliente::Individual);
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let earlier = format_timestamp("2026-01-02T03:04:05Z".parse().unwrap());
        let later = format_timestamp("2026-01-02T03:04:05.250Z".parse().unwrap());
        assert_eq!(earlier, "2026-01-02T03:04:05.000Z");
        assert!(earlier < later);
    }
}
