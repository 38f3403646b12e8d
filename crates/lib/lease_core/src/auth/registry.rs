//! Refresh token registry.
//!
//! The server-side list of refresh tokens that may still be exchanged.
//! Access tokens are self-verifying; this registry is what makes refresh
//! tokens revocable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::AuthError;
use crate::models::auth::RefreshTokenRecord;

/// Storage seam for live refresh tokens.
///
/// Operations must be atomic per token. [`InMemoryRefreshTokenRegistry`]
/// only works for a single server instance; multi-instance deployments
/// need a shared backend such as
/// [`PgRefreshTokenRegistry`](super::queries::PgRefreshTokenRegistry).
#[async_trait]
pub trait RefreshTokenRegistry: Send + Sync {
    async fn register(&self, token: &str, record: RefreshTokenRecord) -> Result<(), AuthError>;

    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Remove a token. Returns `false` if it was not registered.
    async fn invalidate(&self, token: &str) -> Result<bool, AuthError>;

    /// Remove every token belonging to `user_id`. Returns how many were removed.
    async fn invalidate_all_for_user(&self, user_id: &str) -> Result<u64, AuthError>;
}

/// SHA-256 hash a refresh token for storage.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// In-memory registry keyed by token hash.
#[derive(Default)]
pub struct InMemoryRefreshTokenRegistry {
    tokens: DashMap<String, RefreshTokenRecord>,
}

impl InMemoryRefreshTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Evict entries whose expiry has passed.
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        self.tokens.retain(|_, record| record.expires_at > now);
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let before = registry.len();
                registry.purge_expired(Utc::now());
                debug!(
                    evicted = before.saturating_sub(registry.len()),
                    "purged expired refresh tokens"
                );
            }
        })
    }
}

#[async_trait]
impl RefreshTokenRegistry for InMemoryRefreshTokenRegistry {
    async fn register(&self, token: &str, record: RefreshTokenRecord) -> Result<(), AuthError> {
        self.tokens.insert(hash_refresh_token(token), record);
        Ok(())
    }

    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        Ok(self
            .tokens
            .get(&hash_refresh_token(token))
            .map(|entry| entry.value().clone()))
    }

    async fn invalidate(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self.tokens.remove(&hash_refresh_token(token)).is_some())
    }

    async fn invalidate_all_for_user(&self, user_id: &str) -> Result<u64, AuthError> {
        let mut removed = 0u64;
        self.tokens.retain(|_, record| {
            let keep = record.user_id != user_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
