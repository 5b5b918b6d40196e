//! Portcullis: a SAML 2.0 service provider core.
//!
//! Issues signed AuthnRequests over the HTTP-Redirect binding, validates
//! HTTP-POST responses against the IdP's published signing certificates, and
//! maps asserted attributes onto local user accounts.

pub mod auth;
pub mod config;
pub mod db;
pub mod models;
#[cfg(feature = "server")]
pub mod observability;
pub mod routes;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{auth::SsoProviderRegistry, config::ServiceConfig};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub providers: SsoProviderRegistry,
}

impl AppState {
    pub fn new(config: ServiceConfig, providers: SsoProviderRegistry) -> Self {
        Self {
            config: Arc::new(config),
            providers,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let saml_routes = Router::new()
        .route("/login", get(routes::auth_routes::saml_login))
        .route("/acs", post(routes::auth_routes::saml_acs))
        .route("/metadata", get(routes::auth_routes::saml_metadata));

    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .nest("/auth/saml", saml_routes)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
