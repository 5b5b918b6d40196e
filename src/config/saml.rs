use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// SAML 2.0 service provider configuration.
///
/// The provider is constructed once from this config at startup. Values that
/// are well-formed TOML but semantically unusable (unparseable URLs, unreadable
/// key files, unreachable IdP metadata) leave the provider disabled instead of
/// failing the whole service.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlProviderConfig {
    /// Whether SAML SSO is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Public root URL of this service as seen by browsers
    /// (e.g., `https://portal.example.com`). The ACS and metadata
    /// endpoint URLs are derived from it.
    #[serde(default)]
    pub root_url: String,

    /// SP entity ID. Defaults to the SP metadata URL.
    #[serde(default)]
    pub entity_id: Option<String>,

    /// URL of the IdP's SAML metadata document.
    #[serde(default)]
    pub idp_metadata_url: String,

    /// Replaces the redirect-binding SSO endpoint advertised in the IdP metadata.
    /// Useful when the browser must reach the IdP through a different host than
    /// the one the IdP publishes. Signing certificates from the metadata are kept.
    #[serde(default)]
    pub sso_url_override: Option<String>,

    /// Path to the SP certificate (PEM).
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// Path to the SP private key (PEM, PKCS#8 or PKCS#1 RSA).
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// Generate a self-signed certificate and key at the configured paths
    /// when no certificate exists yet. Existing files are never overwritten.
    #[serde(default)]
    pub create_certs: bool,

    /// Skip TLS certificate verification when fetching IdP metadata.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// IdP attribute name -> local identity field.
    #[serde(default)]
    pub attribute_mapping: HashMap<String, MappedField>,

    /// NameID format to request (e.g., `urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress`).
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// Whether to force re-authentication at the IdP.
    #[serde(default)]
    pub force_authn: bool,

    /// Seconds an issued AuthnRequest may stay unanswered before its state is discarded.
    #[serde(default = "default_pending_request_ttl")]
    pub pending_request_ttl_secs: u64,

    /// Interval in seconds between sweeps of expired pending requests.
    #[serde(default = "default_pending_request_sweep")]
    pub pending_request_sweep_secs: u64,

    /// Timeout in seconds for the IdP metadata fetch.
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,
}

/// Local identity field an IdP attribute can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedField {
    Username,
    Email,
}

impl Default for SamlProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root_url: String::new(),
            entity_id: None,
            idp_metadata_url: String::new(),
            sso_url_override: None,
            certificate_path: None,
            private_key_path: None,
            create_certs: false,
            insecure_skip_verify: false,
            attribute_mapping: HashMap::new(),
            name_id_format: None,
            force_authn: false,
            pending_request_ttl_secs: default_pending_request_ttl(),
            pending_request_sweep_secs: default_pending_request_sweep(),
            metadata_timeout_secs: default_metadata_timeout(),
        }
    }
}

impl std::fmt::Debug for SamlProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlProviderConfig")
            .field("enabled", &self.enabled)
            .field("root_url", &self.root_url)
            .field("entity_id", &self.entity_id)
            .field("idp_metadata_url", &self.idp_metadata_url)
            .field("sso_url_override", &self.sso_url_override)
            .field("certificate_path", &self.certificate_path)
            .field("private_key_path", &self.private_key_path)
            .field("create_certs", &self.create_certs)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("attribute_mapping", &self.attribute_mapping)
            .field("name_id_format", &self.name_id_format)
            .field("force_authn", &self.force_authn)
            .finish_non_exhaustive()
    }
}

impl SamlProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_request_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "saml.pending_request_ttl_secs must be greater than 0".into(),
            ));
        }
        if self.pending_request_sweep_secs == 0 {
            return Err(ConfigError::Validation(
                "saml.pending_request_sweep_secs must be greater than 0".into(),
            ));
        }
        if self.metadata_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "saml.metadata_timeout_secs must be greater than 0".into(),
            ));
        }
        if let Some(attr) = self.attribute_mapping.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "saml.attribute_mapping contains an empty attribute name: {attr:?}"
            )));
        }
        Ok(())
    }

    pub fn pending_request_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_request_ttl_secs)
    }

    pub fn pending_request_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending_request_sweep_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

fn default_pending_request_ttl() -> u64 {
    600
}

fn default_pending_request_sweep() -> u64 {
    60
}

fn default_metadata_timeout() -> u64 {
    10
}
