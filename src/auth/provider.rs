//! SSO provider abstraction and the name-keyed provider registry.
//!
//! Routes look providers up by a stable name (`"saml"`), so a second protocol
//! can be added without touching the handlers.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ResolvedIdentity, SamlProvider, SsoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Saml,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saml => "saml",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait SsoProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn is_enabled(&self) -> bool;

    /// Redirect URL that starts a login correlated with `state`.
    async fn generate_auth_url(&self, state: &str) -> Result<String, SsoError>;

    /// Validate the IdP's reply for `state` and resolve the local user.
    async fn authenticate(&self, payload: &str, state: &str)
    -> Result<ResolvedIdentity, SsoError>;

    /// Metadata document the IdP needs to trust this service.
    fn publish_metadata(&self) -> Result<String, SsoError>;
}

#[async_trait]
impl SsoProvider for SamlProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Saml
    }

    fn is_enabled(&self) -> bool {
        SamlProvider::is_enabled(self)
    }

    async fn generate_auth_url(&self, state: &str) -> Result<String, SsoError> {
        SamlProvider::generate_auth_url(self, state).await
    }

    async fn authenticate(
        &self,
        payload: &str,
        state: &str,
    ) -> Result<ResolvedIdentity, SsoError> {
        SamlProvider::authenticate(self, payload, state).await
    }

    fn publish_metadata(&self) -> Result<String, SsoError> {
        SamlProvider::publish_metadata(self)
    }
}

pub type SharedSsoProvider = Arc<dyn SsoProvider>;

/// Registry of SSO providers keyed by name.
#[derive(Clone, Default)]
pub struct SsoProviderRegistry {
    providers: Arc<RwLock<HashMap<String, SharedSsoProvider>>>,
}

impl SsoProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a provider by name.
    pub async fn get(&self, name: &str) -> Option<SharedSsoProvider> {
        let providers = self.providers.read().await;
        providers.get(name).cloned()
    }

    /// Get a provider by name, treating an unknown name as disabled.
    pub async fn require(&self, name: &str) -> Result<SharedSsoProvider, SsoError> {
        self.get(name).await.ok_or(SsoError::NotEnabled)
    }

    /// Register a provider, replacing any existing one with the same name.
    pub async fn register(&self, name: impl Into<String>, provider: SharedSsoProvider) {
        let name = name.into();
        tracing::debug!(
            provider = %name,
            provider_type = %provider.provider_type(),
            enabled = provider.is_enabled(),
            "Registered SSO provider"
        );
        let mut providers = self.providers.write().await;
        providers.insert(name, provider);
    }

    /// Remove a provider, returning it if it was registered.
    pub async fn remove(&self, name: &str) -> Option<SharedSsoProvider> {
        let mut providers = self.providers.write().await;
        providers.remove(name)
    }

    /// Registered provider names.
    pub async fn names(&self) -> Vec<String> {
        let providers = self.providers.read().await;
        providers.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }
}
