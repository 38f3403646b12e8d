//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API wire models
//! (which have `#[serde(rename)]` for camelCase etc.).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account known to the principal store.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub password_hash: Option<String>,
}

/// Which half of a token pair a JWT represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    /// User email.
    pub email: String,
    /// Roles snapshot taken at mint time (e.g. `["admin"]`).
    pub roles: Vec<String>,
    /// Admin acting as `sub`, when the session is impersonated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<String>,
    pub typ: TokenKind,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

/// JWT claims embedded in refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<String>,
    pub typ: TokenKind,
    /// Unique token ID, so two pairs minted in the same second never collide.
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// Registry entry for a live refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub impersonator_id: Option<String>,
}

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Single active password reset ticket of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetTicket {
    pub user_id: String,
    /// bcrypt hash of the emailed token.
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of login and refresh.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub tokens: TokenPair,
    pub user: Principal,
    pub impersonator_id: Option<String>,
}

/// Result of starting an impersonation.
#[derive(Debug, Clone)]
pub struct ImpersonationGrant {
    pub tokens: TokenPair,
    pub impersonated_user: Principal,
    pub original_user: Principal,
}
