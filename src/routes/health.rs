//! Health check endpoints for probes and monitoring.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::{AppState, auth::ProviderType};

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "degraded"
    pub status: String,
    /// Service version
    pub version: String,
    /// Individual subsystem statuses
    pub subsystems: SubsystemStatus,
}

/// Status of individual subsystems.
#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    /// SAML provider status, absent when SAML is not configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saml: Option<ComponentStatus>,
}

/// Status of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Full health check with subsystem status.
///
/// A SAML provider that is configured but failed to start reports the service
/// as degraded. The host still answers 200 since everything else keeps working.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut subsystems = SubsystemStatus { saml: None };

    if state.config.saml.enabled {
        let healthy = match state.providers.get(ProviderType::Saml.as_str()).await {
            Some(provider) => provider.is_enabled(),
            None => false,
        };
        subsystems.saml = Some(ComponentStatus {
            healthy,
            message: if healthy {
                None
            } else {
                Some("SAML provider failed to initialize".to_string())
            },
        });
    }

    let degraded = subsystems.saml.as_ref().is_some_and(|s| !s.healthy);
    let status = HealthStatus {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subsystems,
    };

    (StatusCode::OK, Json(status))
}

/// Liveness probe.
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}
