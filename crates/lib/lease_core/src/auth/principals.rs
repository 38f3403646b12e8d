//! Principal repository seam.
//!
//! Accounts are owned by the catalog's user store; the session service only
//! reads them and writes password hashes back.

use async_trait::async_trait;
use dashmap::DashMap;

use super::AuthError;
use crate::models::auth::Principal;

#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError>;

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Principal>, AuthError>;

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> Result<(), AuthError>;
}

/// In-memory principal store.
#[derive(Default)]
pub struct InMemoryPrincipalRepository {
    principals: DashMap<String, Principal>,
}

impl InMemoryPrincipalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, principal: Principal) {
        self.principals.insert(principal.id.clone(), principal);
    }

    pub fn set_active(&self, user_id: &str, active: bool) {
        if let Some(mut p) = self.principals.get_mut(user_id) {
            p.is_active = active;
        }
    }

    pub fn set_roles(&self, user_id: &str, roles: Vec<String>) {
        if let Some(mut p) = self.principals.get_mut(user_id) {
            p.roles = roles;
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Principal> {
        self.principals.get(user_id).map(|p| p.value().clone())
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryPrincipalRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self
            .principals
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .map(|p| p.value().clone()))
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self.get(user_id))
    }

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> Result<(), AuthError> {
        let mut principal = self
            .principals
            .get_mut(user_id)
            .ok_or_else(|| AuthError::NotFound(format!("user {user_id}")))?;
        principal.password_hash = Some(hash.to_string());
        Ok(())
    }
}
