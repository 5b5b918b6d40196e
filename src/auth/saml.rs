//! SAML 2.0 service provider.
//!
//! Implements SP-initiated SSO:
//! - AuthnRequest generation with redirect-binding signatures
//! - Response parsing, signature and correlation checks
//! - Attribute extraction and identity resolution
//! - SP metadata publication

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use samael::{
    metadata::HTTP_POST_BINDING,
    schema::{Assertion, Response},
    service_provider::{ServiceProvider, ServiceProviderBuilder},
};
use tokio::sync::RwLock;

use super::{
    SsoError,
    correlation::SharedCorrelationStore,
    identity::{IdentityResolver, ResolvedIdentity, SamlAttribute},
    key_material::{KeyMaterial, ensure_key_material},
    metadata::{DEFAULT_NAME_ID_FORMAT, SpEndpoints, sp_metadata_xml},
    trust::{TrustMetadata, load_trust_metadata},
};
use crate::{config::SamlProviderConfig, db::UserRepo};

/// Data extracted from a validated assertion.
#[derive(Debug, Clone)]
pub struct SamlAssertionData {
    /// Subject NameID, when the IdP sent one
    pub name_id: Option<String>,
    pub attributes: Vec<SamlAttribute>,
}

/// SAML service provider. A provider that is disabled by config, or whose
/// startup failed, answers every operation with [`SsoError::NotEnabled`].
pub struct SamlProvider {
    active: Option<ActiveProvider>,
}

struct ActiveProvider {
    config: SamlProviderConfig,
    endpoints: SpEndpoints,
    key_material: KeyMaterial,
    trust: RwLock<Arc<TrustMetadata>>,
    correlations: SharedCorrelationStore,
    identity: IdentityResolver,
}

impl SamlProvider {
    pub fn disabled() -> Self {
        Self { active: None }
    }

    /// Build the provider from config: load key material, fetch IdP metadata,
    /// apply the SSO override. Any failure is logged and yields a disabled
    /// provider so the host keeps running.
    pub async fn initialize(
        config: &SamlProviderConfig,
        http_client: &reqwest::Client,
        correlations: SharedCorrelationStore,
        users: Arc<dyn UserRepo>,
    ) -> Self {
        if !config.enabled {
            tracing::info!("SAML provider disabled by configuration");
            return Self::disabled();
        }

        match Self::try_initialize(config, http_client, correlations, users).await {
            Ok(provider) => provider,
            Err(e) => {
                tracing::error!(error = %e, "SAML provider failed to initialize, disabling");
                Self::disabled()
            }
        }
    }

    async fn try_initialize(
        config: &SamlProviderConfig,
        http_client: &reqwest::Client,
        correlations: SharedCorrelationStore,
        users: Arc<dyn UserRepo>,
    ) -> Result<Self, SsoError> {
        // Cheap checks first so a bad config fails before any network or disk work.
        ensure_signature_verification()?;
        SpEndpoints::from_config(config)?;
        if let Some(url) = &config.sso_url_override {
            validate_http_url("sso_url_override", url)?;
        }

        if config.insecure_skip_verify {
            tracing::warn!(
                url = %config.idp_metadata_url,
                "TLS certificate verification is disabled for the IdP metadata fetch"
            );
        }

        let key_material = ensure_key_material(config)?;
        let trust = load_trust_metadata(http_client, &config.idp_metadata_url).await?;

        let provider = Self::from_parts(config, key_material, trust, correlations, users)?;

        if let Some(active) = &provider.active {
            tracing::info!(
                entity_id = %active.endpoints.entity_id,
                acs_url = %active.endpoints.acs_url,
                idp_entity_id = active.trust.read().await.entity_id(),
                "SAML provider initialized"
            );
        }

        Ok(provider)
    }

    /// Assemble an enabled provider from already loaded parts.
    pub fn from_parts(
        config: &SamlProviderConfig,
        key_material: KeyMaterial,
        trust: TrustMetadata,
        correlations: SharedCorrelationStore,
        users: Arc<dyn UserRepo>,
    ) -> Result<Self, SsoError> {
        let endpoints = SpEndpoints::from_config(config)?;
        let trust = match &config.sso_url_override {
            Some(url) => {
                validate_http_url("sso_url_override", url)?;
                trust.with_sso_override(url)
            }
            None => trust,
        };

        Ok(Self {
            active: Some(ActiveProvider {
                config: config.clone(),
                endpoints,
                key_material,
                trust: RwLock::new(Arc::new(trust)),
                correlations,
                identity: IdentityResolver::new(config.attribute_mapping.clone(), users),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    fn active(&self) -> Result<&ActiveProvider, SsoError> {
        self.active.as_ref().ok_or(SsoError::NotEnabled)
    }

    pub fn endpoints(&self) -> Result<&SpEndpoints, SsoError> {
        Ok(&self.active()?.endpoints)
    }

    /// Current trust metadata snapshot.
    pub async fn trust_metadata(&self) -> Result<Arc<TrustMetadata>, SsoError> {
        Ok(self.active()?.trust.read().await.clone())
    }

    /// Point the redirect-binding SSO endpoint at `url`, keeping the IdP's
    /// signing certificates. In-flight requests keep the snapshot they started with.
    pub async fn apply_sso_override(&self, url: &str) -> Result<(), SsoError> {
        let active = self.active()?;
        validate_http_url("sso_url_override", url)?;

        let mut trust = active.trust.write().await;
        *trust = Arc::new(trust.with_sso_override(url));
        tracing::info!(sso_url = url, "Applied SAML SSO endpoint override");
        Ok(())
    }

    /// Build a signed HTTP-Redirect AuthnRequest URL and remember which
    /// request `state` belongs to.
    pub async fn generate_auth_url(&self, state: &str) -> Result<String, SsoError> {
        let active = self.active()?;
        let trust = active.trust.read().await.clone();

        let (request_id, url) = active.build_redirect(&trust, state)?;
        active.correlations.insert(state, &request_id).await?;

        tracing::debug!(request_id = %request_id, "Issued SAML AuthnRequest");
        Ok(url)
    }

    /// Validate an HTTP-POST `SAMLResponse` against the request issued for `state`.
    ///
    /// The state is consumed before anything else, so a rejected response
    /// cannot be retried with the same state.
    pub async fn validate_response(
        &self,
        payload: &str,
        state: &str,
    ) -> Result<SamlAssertionData, SsoError> {
        let active = self.active()?;

        let Some(pending) = active.correlations.take(state).await? else {
            tracing::warn!("SAML response for unknown, consumed, or expired state");
            return Err(SsoError::UnknownState);
        };

        let trust = active.trust.read().await.clone();
        active
            .check_response(payload, &pending.request_id, &trust)
            .map_err(|reason| {
                tracing::warn!(
                    request_id = %pending.request_id,
                    reason = %reason,
                    "Rejected SAML response"
                );
                SsoError::InvalidResponse(reason)
            })
    }

    /// Validate the response and resolve the asserted identity to a local user.
    pub async fn authenticate(
        &self,
        payload: &str,
        state: &str,
    ) -> Result<ResolvedIdentity, SsoError> {
        let assertion = self.validate_response(payload, state).await?;
        self.active()?.identity.resolve(&assertion.attributes).await
    }

    /// SP metadata XML for the IdP.
    pub fn publish_metadata(&self) -> Result<String, SsoError> {
        let active = self.active()?;
        Ok(sp_metadata_xml(
            &active.endpoints,
            &active.key_material.certificate_base64()?,
            active.config.name_id_format.as_deref(),
        ))
    }
}

impl ActiveProvider {
    fn service_provider(&self, trust: &TrustMetadata) -> Result<ServiceProvider, SsoError> {
        ServiceProviderBuilder::default()
            .entity_id(self.endpoints.entity_id.clone())
            .acs_url(self.endpoints.acs_url.clone())
            .idp_metadata(trust.descriptor().clone())
            .authn_name_id_format(
                self.config
                    .name_id_format
                    .clone()
                    .unwrap_or_else(|| DEFAULT_NAME_ID_FORMAT.to_string()),
            )
            .force_authn(self.config.force_authn)
            .build()
            .map_err(|e| SsoError::Internal(format!("Failed to build ServiceProvider: {}", e)))
    }

    /// Returns the AuthnRequest ID and the signed redirect URL.
    fn build_redirect(
        &self,
        trust: &TrustMetadata,
        state: &str,
    ) -> Result<(String, String), SsoError> {
        let sso_url = trust.sso_redirect_url().ok_or_else(|| {
            SsoError::TrustResolution("IdP metadata has no HTTP-Redirect SSO endpoint".to_string())
        })?;

        let sp = self.service_provider(trust)?;
        let mut authn_request = sp
            .make_authentication_request(sso_url)
            .map_err(|e| SsoError::Internal(format!("Failed to create AuthnRequest: {}", e)))?;
        authn_request.destination = Some(sso_url.to_string());
        authn_request.protocol_binding = Some(HTTP_POST_BINDING.to_string());

        let request_id = authn_request.id.clone();
        let url = authn_request
            .signed_redirect(state, self.key_material.private_key().clone())
            .map_err(|e| SsoError::KeyMaterial(format!("Failed to sign AuthnRequest: {}", e)))?
            .ok_or_else(|| SsoError::Internal("AuthnRequest has no destination".to_string()))?;

        Ok((request_id, url.to_string()))
    }

    /// Every check on an inbound response. Errors are the rejection reason.
    fn check_response(
        &self,
        payload: &str,
        request_id: &str,
        trust: &TrustMetadata,
    ) -> Result<SamlAssertionData, String> {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| format!("SAMLResponse is not valid base64: {}", e))?;
        let xml = String::from_utf8(bytes)
            .map_err(|e| format!("SAMLResponse is not valid UTF-8: {}", e))?;

        tracing::debug!(xml_len = xml.len(), "Parsing SAML response");

        let response: Response = xml
            .parse()
            .map_err(|e| format!("Failed to parse SAML response: {}", e))?;

        match response.in_response_to.as_deref() {
            Some(irt) if irt == request_id => {}
            Some(irt) => {
                return Err(format!(
                    "InResponseTo '{}' does not match request '{}'",
                    irt, request_id
                ));
            }
            None => return Err("Response has no InResponseTo".to_string()),
        }

        check_signature_elements(&response, trust)?;
        ensure_signature_verification().map_err(|e| e.to_string())?;

        // Verifies every XML signature against the IdP's signing certificates
        // (always present, see `TrustMetadata::from_descriptor`) and drops
        // unsigned elements before the assertion is read.
        let sp = self.service_provider(trust).map_err(|e| e.to_string())?;
        let ids = [request_id];
        let assertion = sp
            .parse_xml_response(&xml, Some(&ids))
            .map_err(|e| format!("SAML response validation failed: {}", e))?;

        check_subject_confirmation(&assertion, request_id)?;

        Ok(SamlAssertionData {
            name_id: assertion
                .subject
                .as_ref()
                .and_then(|s| s.name_id.as_ref())
                .map(|n| n.value.clone()),
            attributes: extract_attributes(&assertion),
        })
    }
}

/// Require a signature on the response or its assertion, and require every
/// certificate embedded in those signatures to be a trusted IdP certificate.
/// This is a structural pre-check; the signature values are verified by
/// samael when the response is parsed.
fn check_signature_elements(response: &Response, trust: &TrustMetadata) -> Result<(), String> {
    let signatures: Vec<_> = response
        .signature
        .iter()
        .chain(response.assertion.iter().filter_map(|a| a.signature.as_ref()))
        .collect();
    if signatures.is_empty() {
        return Err("Neither the response nor the assertion is signed".to_string());
    }

    let embedded: Vec<&String> = signatures
        .iter()
        .flat_map(|sig| sig.key_info.iter().flatten())
        .filter_map(|ki| ki.x509_data.as_ref())
        .flat_map(|data| data.certificates.iter())
        .collect();

    if embedded
        .iter()
        .any(|cert| !trust.is_trusted_certificate(cert))
    {
        return Err("Signature carries a certificate not trusted for this IdP".to_string());
    }

    Ok(())
}

/// Responses are only trusted when libxmlsec1 verifies their signatures.
#[cfg(feature = "xmlsec")]
fn ensure_signature_verification() -> Result<(), SsoError> {
    Ok(())
}

#[cfg(not(feature = "xmlsec"))]
fn ensure_signature_verification() -> Result<(), SsoError> {
    Err(SsoError::Configuration(
        "built without the xmlsec feature, IdP response signatures cannot be verified"
            .to_string(),
    ))
}

/// Bearer confirmations that name a request must name ours.
fn check_subject_confirmation(assertion: &Assertion, request_id: &str) -> Result<(), String> {
    let confirmations = assertion
        .subject
        .as_ref()
        .and_then(|s| s.subject_confirmations.as_ref());

    for confirmation in confirmations.into_iter().flatten() {
        if let Some(irt) = confirmation
            .subject_confirmation_data
            .as_ref()
            .and_then(|d| d.in_response_to.as_deref())
            && irt != request_id
        {
            return Err(format!(
                "SubjectConfirmationData InResponseTo '{}' does not match request '{}'",
                irt, request_id
            ));
        }
    }
    Ok(())
}

fn extract_attributes(assertion: &Assertion) -> Vec<SamlAttribute> {
    assertion
        .attribute_statements
        .iter()
        .flatten()
        .flat_map(|statement| statement.attributes.iter())
        .filter_map(|attr| {
            let name = attr.name.clone().or_else(|| attr.friendly_name.clone())?;
            Some(SamlAttribute {
                name,
                friendly_name: attr.friendly_name.clone(),
                values: attr.values.iter().filter_map(|v| v.value.clone()).collect(),
            })
        })
        .collect()
}

fn validate_http_url(field: &str, value: &str) -> Result<(), SsoError> {
    let url = url::Url::parse(value)
        .map_err(|e| SsoError::Configuration(format!("Invalid {} '{}': {}", field, value, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SsoError::Configuration(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }
    Ok(())
}
