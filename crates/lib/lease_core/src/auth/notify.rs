//! Notification dispatch seam for password reset emails.

use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::AuthError;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Send the reset link to `email`.
    async fn send_password_reset(&self, email: &str, reset_link: &str) -> Result<(), AuthError>;
}

/// Dispatcher that only records the send in the log.
///
/// The link itself is not logged since it carries the reset token.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send_password_reset(&self, email: &str, _reset_link: &str) -> Result<(), AuthError> {
        info!(email, "password reset notification dispatched");
        Ok(())
    }
}

/// Build `<base>?token=<token>`, preserving any query already on `base`.
pub fn build_reset_link(base: &str, token: &str) -> Result<String, AuthError> {
    let mut url =
        Url::parse(base).map_err(|e| AuthError::Internal(format!("reset link base: {e}")))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}
