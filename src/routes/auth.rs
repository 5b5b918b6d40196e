//! SAML 2.0 SSO endpoints.
//!
//! - `/auth/saml/login` - Issues an AuthnRequest and redirects to the IdP
//! - `/auth/saml/acs` - Assertion Consumer Service (HTTP-POST binding)
//! - `/auth/saml/metadata` - SP metadata for the IdP administrator

use axum::{
    Form, Json,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{ProviderType, ResolvedIdentity, SsoError},
};

/// Form data from the IdP (HTTP-POST binding).
///
/// The IdP posts the base64-encoded SAML Response together with the
/// RelayState we sent along with the AuthnRequest.
#[derive(Debug, Deserialize)]
pub struct SamlAcsForm {
    /// Base64-encoded SAML Response from the IdP
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    /// RelayState we sent with the AuthnRequest
    #[serde(rename = "RelayState", default)]
    pub relay_state: String,
}

/// Start SP-initiated SSO: mint a fresh state, issue a signed AuthnRequest
/// correlated with it, and redirect the browser to the IdP.
#[tracing::instrument(name = "auth.saml.login", skip(state))]
pub async fn saml_login(State(state): State<AppState>) -> Result<Redirect, SsoError> {
    let provider = state.providers.require(ProviderType::Saml.as_str()).await?;

    let relay_state = Uuid::new_v4().to_string();
    let auth_url = provider.generate_auth_url(&relay_state).await?;

    tracing::info!("Initiating SAML SSO login");
    Ok(Redirect::to(&auth_url))
}

/// Validate the posted SAML Response and resolve the local user.
#[tracing::instrument(name = "auth.saml.acs", skip(state, form))]
pub async fn saml_acs(
    State(state): State<AppState>,
    Form(form): Form<SamlAcsForm>,
) -> Result<Json<ResolvedIdentity>, SsoError> {
    let provider = state.providers.require(ProviderType::Saml.as_str()).await?;

    let identity = provider
        .authenticate(&form.saml_response, &form.relay_state)
        .await?;

    tracing::info!(
        user_id = %identity.user_id,
        username = %identity.username,
        external = identity.external,
        "SAML login succeeded"
    );

    Ok(Json(identity))
}

/// Serve the SP metadata document.
#[tracing::instrument(name = "auth.saml.metadata", skip(state))]
pub async fn saml_metadata(State(state): State<AppState>) -> Result<Response, SsoError> {
    let provider = state.providers.require(ProviderType::Saml.as_str()).await?;
    let metadata = provider.publish_metadata()?;

    Ok((
        [(
            axum::http::header::CONTENT_TYPE,
            "application/samlmetadata+xml",
        )],
        metadata,
    )
        .into_response())
}
