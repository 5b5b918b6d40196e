//! In-memory user repository.
//!
//! Backs the standalone server and tests. Records do not survive a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

use super::{
    error::{DbError, DbResult},
    repos::UserRepo,
};
use crate::models::{CreateUser, User};

pub struct MemoryUserRepo {
    users: RwLock<HashMap<Uuid, User>>,
    /// Activation state given to newly created users.
    default_active: bool,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            default_active: true,
        }
    }

    /// Set whether newly created users start out active.
    pub fn with_default_active(mut self, active: bool) -> Self {
        self.default_active = active;
        self
    }

    /// Insert a pre-built user, replacing any record with the same id.
    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

impl Default for MemoryUserRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn get_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn get_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn create(&self, input: CreateUser) -> DbResult<User> {
        input.validate()?;

        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == input.username) {
            return Err(DbError::Conflict(format!(
                "User '{}' already exists",
                input.username
            )));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: input.username,
            email: input.email,
            source: input.source,
            active: self.default_active,
            password_hash: input.password_hash,
            must_change_password: input.must_change_password,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }
}
