use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{CreateUser, User},
};

/// User lookup and provisioning capability supplied by the host.
///
/// Lookups report a missing user as `Ok(None)`; `Err` is reserved for
/// storage failures so callers can tell "no such user" from "lookup broke".
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_by_username(&self, username: &str) -> DbResult<Option<User>>;
    async fn get_by_email(&self, email: &str) -> DbResult<Option<User>>;
    async fn create(&self, input: CreateUser) -> DbResult<User>;
}
