//! Password reset tickets.
//!
//! At most one live ticket per user; storing a new ticket replaces the old
//! one. Tickets hold only a bcrypt hash of the emailed token, so lookups
//! scan live tickets and hash-compare each one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use tracing::debug;

use super::AuthError;
use crate::models::auth::PasswordResetTicket;

/// Storage seam for password reset tickets.
#[async_trait]
pub trait ResetTicketStore: Send + Sync {
    /// Store `ticket`, replacing any existing ticket of the same user.
    async fn store(&self, ticket: PasswordResetTicket) -> Result<(), AuthError>;

    /// All tickets whose expiry is after `now`.
    async fn active_tickets(&self, now: DateTime<Utc>)
    -> Result<Vec<PasswordResetTicket>, AuthError>;

    /// Remove `user_id`'s ticket if it still has `token_hash`.
    ///
    /// Returns `false` when the ticket was already consumed or replaced.
    async fn consume(&self, user_id: &str, token_hash: &str) -> Result<bool, AuthError>;
}

/// Generate a high-entropy reset token (32 random bytes, URL-safe base64).
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// In-memory ticket store keyed by user ID.
#[derive(Default)]
pub struct InMemoryResetTicketStore {
    tickets: DashMap<String, PasswordResetTicket>,
}

impl InMemoryResetTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<PasswordResetTicket> {
        self.tickets.get(user_id).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Evict expired tickets.
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        self.tickets.retain(|_, t| t.expires_at > now);
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let before = store.len();
                store.purge_expired(Utc::now());
                debug!(
                    evicted = before.saturating_sub(store.len()),
                    "purged expired reset tickets"
                );
            }
        })
    }
}

#[async_trait]
impl ResetTicketStore for InMemoryResetTicketStore {
    async fn store(&self, ticket: PasswordResetTicket) -> Result<(), AuthError> {
        self.tickets.insert(ticket.user_id.clone(), ticket);
        Ok(())
    }

    async fn active_tickets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PasswordResetTicket>, AuthError> {
        Ok(self
            .tickets
            .iter()
            .filter(|t| t.expires_at > now)
            .map(|t| t.value().clone())
            .collect())
    }

    async fn consume(&self, user_id: &str, token_hash: &str) -> Result<bool, AuthError> {
        Ok(self
            .tickets
            .remove_if(user_id, |_, t| t.token_hash == token_hash)
            .is_some())
    }
}
