use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum SsoError {
    /// Provider is disabled by config or failed to initialize
    #[error("SSO provider is not enabled")]
    NotEnabled,

    /// IdP metadata could not be fetched, parsed, or lacks a usable endpoint
    #[error("Failed to resolve IdP trust metadata: {0}")]
    TrustResolution(String),

    /// RelayState was never issued, already consumed, or expired
    #[error("Unknown or already used state")]
    UnknownState,

    /// Response failed parsing, signature, or correlation checks
    #[error("Invalid SAML response: {0}")]
    InvalidResponse(String),

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// Provider config is well-formed but unusable (e.g., unparseable URL)
    #[error("Invalid SSO configuration: {0}")]
    Configuration(String),

    #[error("User account is inactive")]
    InactiveUser,

    /// A mapped attribute needed to provision a user was not asserted
    #[error("Missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("User repository error: {0}")]
    UserRepository(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body: `{"error": {"type": ..., "code": ..., "message": ...}}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        // Rejection detail stays in the logs; clients only see a stable code.
        let (status, error_type, code, message) = match &self {
            SsoError::NotEnabled => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "sso_not_enabled",
                "SAML authentication is not enabled",
            ),
            SsoError::TrustResolution(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "idp_unavailable",
                "Identity provider is unavailable",
            ),
            SsoError::UnknownState | SsoError::InvalidResponse(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "authentication_failed",
                "Authentication failed",
            ),
            SsoError::InactiveUser => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "inactive_user",
                "User account is inactive",
            ),
            SsoError::MissingAttribute(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "missing_attribute",
                "Identity provider did not supply a required attribute",
            ),
            SsoError::KeyMaterial(_)
            | SsoError::Configuration(_)
            | SsoError::UserRepository(_)
            | SsoError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
                "Internal server error",
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, code, "SSO request failed");
        }

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}
