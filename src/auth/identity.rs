use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use uuid::Uuid;
use validator::ValidateEmail;

use super::SsoError;
use crate::{
    config::MappedField,
    db::{DbError, UserRepo},
    models::{CreateUser, User},
};

/// An attribute extracted from a validated assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlAttribute {
    pub name: String,
    pub friendly_name: Option<String>,
    pub values: Vec<String>,
}

impl SamlAttribute {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            friendly_name: None,
            values,
        }
    }
}

/// The local user an SSO login resolved to, handed to the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentity {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub external: bool,
    pub active: bool,
}

impl From<&User> for ResolvedIdentity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            external: user.is_external(),
            active: user.active,
        }
    }
}

/// Username and email collected from mapped attributes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MappedIdentity {
    pub username: Option<String>,
    pub email: Option<String>,
}

/// Maps asserted attributes onto a local user, provisioning one on first login.
pub struct IdentityResolver {
    mapping: HashMap<String, MappedField>,
    users: Arc<dyn UserRepo>,
}

impl IdentityResolver {
    pub fn new(mapping: HashMap<String, MappedField>, users: Arc<dyn UserRepo>) -> Self {
        Self { mapping, users }
    }

    /// Apply the attribute mapping. An attribute matches on its name first,
    /// then its friendly name. Later values overwrite earlier ones; email
    /// values that are not addresses are dropped.
    pub fn map_attributes(&self, attributes: &[SamlAttribute]) -> MappedIdentity {
        let mut mapped = MappedIdentity::default();

        for attr in attributes {
            let field = self.mapping.get(&attr.name).or_else(|| {
                attr.friendly_name
                    .as_ref()
                    .and_then(|friendly| self.mapping.get(friendly))
            });
            let Some(field) = field else {
                continue;
            };

            for value in attr.values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
                let slot = match field {
                    MappedField::Username => &mut mapped.username,
                    MappedField::Email if !value.validate_email() => {
                        tracing::warn!(attribute = %attr.name, "Ignoring malformed email attribute value");
                        continue;
                    }
                    MappedField::Email => &mut mapped.email,
                };
                *slot = Some(value.to_string());
            }
        }

        mapped
    }

    /// Find the user by username, then by email, creating an external user if
    /// neither matches. Inactive users are always rejected.
    pub async fn resolve(&self, attributes: &[SamlAttribute]) -> Result<ResolvedIdentity, SsoError> {
        let mapped = self.map_attributes(attributes);

        let user = match self.find_existing(&mapped).await? {
            Some(user) => user,
            None => self.provision(mapped).await?,
        };

        if !user.active {
            tracing::warn!(user_id = %user.id, username = %user.username, "SSO login for inactive user");
            return Err(SsoError::InactiveUser);
        }

        tracing::info!(user_id = %user.id, username = %user.username, "Resolved SSO identity");
        Ok(ResolvedIdentity::from(&user))
    }

    async fn find_existing(&self, mapped: &MappedIdentity) -> Result<Option<User>, SsoError> {
        if let Some(username) = &mapped.username
            && let Some(user) = self.users.get_by_username(username).await?
        {
            return Ok(Some(user));
        }
        if let Some(email) = &mapped.email
            && let Some(user) = self.users.get_by_email(email).await?
        {
            return Ok(Some(user));
        }
        Ok(None)
    }

    async fn provision(&self, mapped: MappedIdentity) -> Result<User, SsoError> {
        let Some(username) = mapped.username else {
            return Err(SsoError::MissingAttribute("username".to_string()));
        };

        match self
            .users
            .create(CreateUser::external(username.clone(), mapped.email))
            .await
        {
            Ok(user) => {
                tracing::info!(user_id = %user.id, username = %user.username, "Provisioned external user");
                Ok(user)
            }
            // Lost a race with a concurrent first login for the same user.
            // Email is pre-filtered, so the asserted username is what failed.
            Err(DbError::Validation(reason)) => {
                tracing::warn!(reason = %reason, "Asserted username cannot be provisioned");
                Err(SsoError::MissingAttribute("username".to_string()))
            }
            Err(DbError::Conflict(_)) => self
                .users
                .get_by_username(&username)
                .await?
                .ok_or(SsoError::UserRepository(DbError::NotFound)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{db::MemoryUserRepo, models::UserSource};

    fn mapping() -> HashMap<String, MappedField> {
        HashMap::from([
            ("uid".to_string(), MappedField::Username),
            ("mail".to_string(), MappedField::Email),
        ])
    }

    fn attr(name: &str, values: &[&str]) -> SamlAttribute {
        SamlAttribute::new(name, values.iter().map(|v| v.to_string()).collect())
    }

    fn existing_user(username: &str, email: Option<&str>, active: bool) -> User {
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.map(str::to_string),
            source: UserSource::Local,
            active,
            password_hash: Some("$argon2id$stub".to_string()),
            must_change_password: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_creates_external_user() {
        let repo = Arc::new(MemoryUserRepo::new());
        let resolver = IdentityResolver::new(mapping(), repo.clone());

        let identity = resolver
            .resolve(&[attr("uid", &["jdoe"]), attr("mail", &["jdoe@x.com"])])
            .await
            .unwrap();

        assert_eq!(identity.username, "jdoe");
        assert_eq!(identity.email.as_deref(), Some("jdoe@x.com"));
        assert!(identity.external);
        assert!(identity.active);

        let stored = repo.get_by_username("jdoe").await.unwrap().unwrap();
        assert_eq!(stored.id, identity.user_id);
        assert!(stored.password_hash.is_none());
        assert!(!stored.must_change_password);
    }

    #[tokio::test]
    async fn test_reuses_user_on_second_login() {
        let repo = Arc::new(MemoryUserRepo::new());
        let resolver = IdentityResolver::new(mapping(), repo.clone());
        let attrs = [attr("uid", &["jdoe"])];

        let first = resolver.resolve(&attrs).await.unwrap();
        let second = resolver.resolve(&attrs).await.unwrap();

        assert_eq!(first.user_id, second.user_id);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_email_lookup() {
        let repo = Arc::new(MemoryUserRepo::new());
        let user = existing_user("john.doe", Some("jdoe@x.com"), true);
        repo.insert(user.clone()).await;
        let resolver = IdentityResolver::new(mapping(), repo.clone());

        let identity = resolver
            .resolve(&[attr("uid", &["jdoe"]), attr("mail", &["jdoe@x.com"])])
            .await
            .unwrap();

        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.username, "john.doe");
        assert!(!identity.external);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_inactive_existing_user_rejected() {
        let repo = Arc::new(MemoryUserRepo::new());
        repo.insert(existing_user("jdoe", None, false)).await;
        let resolver = IdentityResolver::new(mapping(), repo);

        let err = resolver.resolve(&[attr("uid", &["jdoe"])]).await.unwrap_err();
        assert!(matches!(err, SsoError::InactiveUser));
    }

    #[tokio::test]
    async fn test_inactive_new_user_rejected() {
        let repo = Arc::new(MemoryUserRepo::new().with_default_active(false));
        let resolver = IdentityResolver::new(mapping(), repo.clone());

        let err = resolver.resolve(&[attr("uid", &["jdoe"])]).await.unwrap_err();
        assert!(matches!(err, SsoError::InactiveUser));
        // The user is still provisioned; only the login is refused.
        assert!(repo.get_by_username("jdoe").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_username_for_new_user() {
        let repo = Arc::new(MemoryUserRepo::new());
        let resolver = IdentityResolver::new(mapping(), repo.clone());

        let err = resolver
            .resolve(&[attr("mail", &["nobody@x.com"])])
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::MissingAttribute(ref a) if a == "username"));
        assert!(repo.is_empty().await);
    }

    #[test]
    fn test_mapping_last_value_wins_and_ignores_unmapped() {
        let resolver = IdentityResolver::new(mapping(), Arc::new(MemoryUserRepo::new()));

        let mapped = resolver.map_attributes(&[
            attr("uid", &["first", "second"]),
            attr("groups", &["admins"]),
            attr("uid", &["third"]),
            attr("mail", &[""]),
        ]);

        assert_eq!(mapped.username.as_deref(), Some("third"));
        assert_eq!(mapped.email, None);
    }

    #[test]
    fn test_mapping_matches_friendly_name() {
        let resolver = IdentityResolver::new(mapping(), Arc::new(MemoryUserRepo::new()));
        let attribute = SamlAttribute {
            name: "urn:oid:0.9.2342.19200300.100.1.1".to_string(),
            friendly_name: Some("uid".to_string()),
            values: vec!["jdoe".to_string()],
        };

        let mapped = resolver.map_attributes(&[attribute]);
        assert_eq!(mapped.username.as_deref(), Some("jdoe"));
    }

    #[tokio::test]
    async fn test_malformed_email_is_dropped() {
        let repo = Arc::new(MemoryUserRepo::new());
        let resolver = IdentityResolver::new(mapping(), repo.clone());

        let identity = resolver
            .resolve(&[attr("uid", &["jdoe"]), attr("mail", &["not an address"])])
            .await
            .unwrap();

        assert_eq!(identity.username, "jdoe");
        assert_eq!(identity.email, None);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_unusable_username_is_client_error() {
        let repo = Arc::new(MemoryUserRepo::new());
        let resolver = IdentityResolver::new(mapping(), repo.clone());
        let oversized = "u".repeat(300);

        let err = resolver
            .resolve(&[attr("uid", &[oversized.as_str()])])
            .await
            .unwrap_err();

        assert!(matches!(err, SsoError::MissingAttribute(ref a) if a == "username"));
        assert!(repo.is_empty().await);
    }
}
