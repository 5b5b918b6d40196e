mod correlation;
mod error;
mod identity;
mod key_material;
pub mod metadata;
mod provider;
pub mod saml;
mod trust;

pub use correlation::{
    CorrelationStore, MemoryCorrelationStore, PendingRequest, SharedCorrelationStore,
    start_correlation_sweeper,
};
pub use error::{ErrorResponse, SsoError};
pub use identity::{IdentityResolver, MappedIdentity, ResolvedIdentity, SamlAttribute};
pub use key_material::{KeyMaterial, ensure_key_material};
pub use provider::{ProviderType, SharedSsoProvider, SsoProvider, SsoProviderRegistry};
pub use saml::{SamlAssertionData, SamlProvider};
pub use trust::{TrustMetadata, load_trust_metadata};
