//! IdP trust metadata.
//!
//! The IdP's `EntityDescriptor` is fetched once when the provider starts and
//! held as an immutable value. Overriding the SSO endpoint produces a new value
//! and never touches the signing certificates.

use chrono::{DateTime, Utc};
use samael::metadata::{Endpoint, EntityDescriptor, HTTP_REDIRECT_BINDING};

use super::SsoError;

/// Parsed IdP metadata plus the time it was obtained.
#[derive(Debug, Clone)]
pub struct TrustMetadata {
    descriptor: EntityDescriptor,
    fetched_at: DateTime<Utc>,
}

impl TrustMetadata {
    /// Parse an IdP metadata document.
    ///
    /// Requires an entity ID, at least one IdP SSO descriptor, and at least one
    /// signing certificate; without a certificate no response could ever be
    /// trusted.
    pub fn from_xml(xml: &str) -> Result<Self, SsoError> {
        let descriptor: EntityDescriptor = samael::metadata::de::from_str(xml)
            .map_err(|e| SsoError::TrustResolution(format!("Failed to parse IdP metadata: {}", e)))?;
        Self::from_descriptor(descriptor)
    }

    pub fn from_descriptor(descriptor: EntityDescriptor) -> Result<Self, SsoError> {
        if descriptor.entity_id.as_deref().is_none_or(str::is_empty) {
            return Err(SsoError::TrustResolution(
                "IdP metadata has no entityID".to_string(),
            ));
        }
        if descriptor
            .idp_sso_descriptors
            .as_ref()
            .is_none_or(Vec::is_empty)
        {
            return Err(SsoError::TrustResolution(
                "IdP metadata has no IDPSSODescriptor".to_string(),
            ));
        }

        let metadata = Self {
            descriptor,
            fetched_at: Utc::now(),
        };
        if metadata.signing_certificates().is_empty() {
            return Err(SsoError::TrustResolution(
                "IdP metadata has no signing certificate".to_string(),
            ));
        }
        Ok(metadata)
    }

    pub fn entity_id(&self) -> &str {
        self.descriptor.entity_id.as_deref().unwrap_or_default()
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Base64 DER certificates usable for signing, whitespace removed.
    ///
    /// Key descriptors without a `use` attribute count as signing keys.
    pub fn signing_certificates(&self) -> Vec<String> {
        self.descriptor
            .idp_sso_descriptors
            .iter()
            .flatten()
            .flat_map(|idp| idp.key_descriptors.iter())
            .filter(|kd| kd.key_use.as_deref().is_none_or(|u| u == "signing"))
            .filter_map(|kd| kd.key_info.x509_data.as_ref())
            .flat_map(|data| data.certificates.iter())
            .map(|cert| normalize_certificate(cert))
            .filter(|cert| !cert.is_empty())
            .collect()
    }

    /// Whether `certificate` (base64 DER, any whitespace) is a trusted signing key.
    pub fn is_trusted_certificate(&self, certificate: &str) -> bool {
        let candidate = normalize_certificate(certificate);
        !candidate.is_empty() && self.signing_certificates().contains(&candidate)
    }

    /// Location of the first HTTP-Redirect SSO endpoint.
    pub fn sso_redirect_url(&self) -> Option<&str> {
        self.descriptor
            .idp_sso_descriptors
            .iter()
            .flatten()
            .flat_map(|idp| idp.single_sign_on_services.iter())
            .find(|ep| ep.binding == HTTP_REDIRECT_BINDING && !ep.location.is_empty())
            .map(|ep| ep.location.as_str())
    }

    /// Copy of this metadata whose redirect-binding SSO endpoints point at `url`.
    ///
    /// If the IdP published no redirect endpoint, one is appended to the first
    /// IdP descriptor. Key descriptors are carried over unchanged.
    pub fn with_sso_override(&self, url: &str) -> Self {
        let mut descriptor = self.descriptor.clone();
        let mut replaced = false;

        for idp in descriptor.idp_sso_descriptors.iter_mut().flatten() {
            for endpoint in idp
                .single_sign_on_services
                .iter_mut()
                .filter(|ep| ep.binding == HTTP_REDIRECT_BINDING)
            {
                endpoint.location = url.to_string();
                replaced = true;
            }
        }

        if !replaced
            && let Some(idp) = descriptor
                .idp_sso_descriptors
                .as_mut()
                .and_then(|idps| idps.first_mut())
        {
            idp.single_sign_on_services.push(Endpoint {
                binding: HTTP_REDIRECT_BINDING.to_string(),
                location: url.to_string(),
                response_location: None,
            });
        }

        Self {
            descriptor,
            fetched_at: self.fetched_at,
        }
    }
}

/// Fetch and parse the IdP metadata document at `url`.
///
/// The client carries the TLS and timeout policy.
pub async fn load_trust_metadata(
    client: &reqwest::Client,
    url: &str,
) -> Result<TrustMetadata, SsoError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| SsoError::TrustResolution(format!("Invalid metadata URL '{}': {}", url, e)))?;

    tracing::debug!(url = %parsed, "Fetching SAML IdP metadata");

    let response = client.get(parsed).send().await.map_err(|e| {
        tracing::error!(error = %e, url, "Failed to fetch SAML metadata");
        SsoError::TrustResolution(format!("Failed to fetch IdP metadata: {}", e))
    })?;

    if !response.status().is_success() {
        let status = response.status();
        tracing::error!(status = %status, url, "SAML metadata endpoint returned error");
        return Err(SsoError::TrustResolution(format!(
            "IdP metadata returned {}",
            status
        )));
    }

    let xml = response.text().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read SAML metadata response");
        SsoError::TrustResolution(format!("Failed to read IdP metadata: {}", e))
    })?;

    let metadata = TrustMetadata::from_xml(&xml)?;
    tracing::info!(
        idp_entity_id = metadata.entity_id(),
        signing_certificates = metadata.signing_certificates().len(),
        sso_url = metadata.sso_redirect_url().unwrap_or("<none>"),
        "Loaded SAML IdP metadata"
    );
    Ok(metadata)
}

pub(crate) fn normalize_certificate(cert: &str) -> String {
    cert.chars().filter(|c| !c.is_whitespace()).collect()
}
