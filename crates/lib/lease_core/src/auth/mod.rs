//! Authentication and session lifecycle.
//!
//! Provides credential minting, refresh-token rotation, impersonation and
//! password reset, plus the storage seams they depend on. Shared by
//! `lease_api` and the server binary.

pub mod jwt;
pub mod locks;
pub mod notify;
pub mod password;
pub mod principals;
pub mod queries;
pub mod registry;
pub mod reset;
pub mod roles;
pub mod session;

use chrono::Duration;
use thiserror::Error;

/// Authentication errors.
///
/// Each variant maps to a stable identifier via [`AuthError::code`] so
/// clients can branch without matching on messages.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("User is inactive")]
    UserInactive,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Target user is inactive")]
    TargetInactive,

    #[error("Cannot impersonate a privileged account")]
    CannotImpersonatePrivileged,

    #[error("Not currently impersonating")]
    NotImpersonating,

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Invalid or expired reset token")]
    InvalidOrExpiredResetToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Machine-readable identifier surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountInactive => "ACCOUNT_INACTIVE",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            AuthError::UserInactive => "USER_INACTIVE",
            AuthError::Forbidden(_) => "FORBIDDEN",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::TargetInactive => "TARGET_INACTIVE",
            AuthError::CannotImpersonatePrivileged => "CANNOT_IMPERSONATE_PRIVILEGED",
            AuthError::NotImpersonating => "NOT_IMPERSONATING",
            AuthError::PasswordMismatch => "PASSWORD_MISMATCH",
            AuthError::InvalidOrExpiredResetToken => "INVALID_OR_EXPIRED_RESET_TOKEN",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::Token(_) | AuthError::Db(_) | AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 7;

/// Password reset ticket lifetime: 24 hours.
pub const RESET_TICKET_EXPIRY_HOURS: i64 = 24;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Tunables for the session service.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub reset_ticket_ttl: Duration,
    /// bcrypt cost for passwords and reset tokens.
    pub bcrypt_cost: u32,
    /// Frontend page that accepts `?token=...` to complete a reset.
    pub reset_link_base_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS),
            refresh_token_ttl: Duration::days(REFRESH_TOKEN_EXPIRY_DAYS),
            reset_ticket_ttl: Duration::hours(RESET_TICKET_EXPIRY_HOURS),
            bcrypt_cost: password::BCRYPT_COST,
            reset_link_base_url: "http://localhost:3000/reset-password".into(),
        }
    }
}
