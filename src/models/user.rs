use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Origin of a user record.
///
/// External users were provisioned from an identity provider and never carry
/// a local password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSource {
    /// Created manually by an administrator
    #[default]
    Local,
    /// Provisioned on first login through an SSO provider
    External,
}

impl UserSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::External => "external",
        }
    }
}

impl fmt::Display for UserSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub source: UserSource,
    /// Inactive users may exist but must never be issued a session.
    pub active: bool,
    /// Hash of the local password; always `None` for external users.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Whether the user must rotate a temporary password on next login.
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_external(&self) -> bool {
        self.source == UserSource::External
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(email)]
    pub email: Option<String>,
    pub source: UserSource,
    #[validate(length(min = 1))]
    pub password_hash: Option<String>,
    pub must_change_password: bool,
}

impl CreateUser {
    /// Input for a user provisioned from an identity provider: external,
    /// no local password, no forced password rotation.
    pub fn external(username: impl Into<String>, email: Option<String>) -> Self {
        Self {
            username: username.into(),
            email,
            source: UserSource::External,
            password_hash: None,
            must_change_password: false,
        }
    }
}
