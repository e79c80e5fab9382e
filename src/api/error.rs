/// HTTP error mapping
///
/// Every handler returns `ApiError`, which renders as `{ "code", "message" }`
/// with a matching status code and logs once at the mapping point.

use crate::crm::ConversionError;
use crate::integrations::IntegrationError;
use crate::tenant::TenantError;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already converted: {0}")]
    AlreadyConverted(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("upstream error: {0}")]
    BadGateway(String),
    #[error("upstream timeout")]
    GatewayTimeout,
    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::AlreadyConverted(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::AlreadyConverted(_) => "already_converted",
            Self::PreconditionFailed(_) => "integration_not_configured",
            Self::BadGateway(_) => "upstream_error",
            Self::GatewayTimeout => "upstream_timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, status = %status, error = %self, "api_error");
        } else {
            tracing::warn!(code, status = %status, error = %self, "api_error");
        }

        let body = Json(ErrorResponse {
            code,
            message: self.public_message(),
        });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", e))
    }
}

impl From<TenantError> for ApiError {
    fn from(e: TenantError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<ConversionError> for ApiError {
    fn from(e: ConversionError) -> Self {
        match e {
            ConversionError::NotFound(id) => Self::NotFound(format!("lead {}", id)),
            e @ ConversionError::AlreadyConverted { .. } => Self::AlreadyConverted(e.to_string()),
            e @ ConversionError::Database { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl From<IntegrationError> for ApiError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::NotConfigured(_) | IntegrationError::MissingCredential { .. } => {
                Self::PreconditionFailed(e.to_string())
            }
            IntegrationError::ConversationNotFound(id) => Self::NotFound(format!("conversation {}", id)),
            IntegrationError::NotFound(what) => Self::NotFound(what),
            IntegrationError::Timeout => Self::GatewayTimeout,
            IntegrationError::InvalidCredentials(_)
            | IntegrationError::Transport(_)
            | IntegrationError::Http { .. }
            | IntegrationError::Decode(_) => Self::BadGateway(e.to_string()),
            IntegrationError::Storage(inner) => Self::from(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_errors_map_to_statuses() {
        let not_found = ApiError::from(ConversionError::NotFound("l1".to_string()));
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let converted = ApiError::from(ConversionError::AlreadyConverted {
            lead_id: "l1".to_string(),
            cliente_id: "c1".to_string(),
        });
        assert_eq!(converted.status_code(), StatusCode::CONFLICT);
        assert_eq!(converted.code(), "already_converted");
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::from(anyhow::anyhow!("disk I/O error at /var/lib/leadway"));
        assert_eq!(err.public_message(), "internal server error");
    }

    #[test]
    fn upstream_failures_are_bad_gateway() {
        let err = ApiError::from(IntegrationError::Http { status: 503, body: String::new() });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::from(IntegrationError::Timeout).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn unknown_linked_record_is_not_found() {
        let err = ApiError::from(IntegrationError::NotFound("lead l9".to_string()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "not found: lead l9");
    }
}
