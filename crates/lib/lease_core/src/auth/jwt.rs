//! Credential issuing: signed access/refresh token pairs (HS256).
//!
//! The issuer only mints and verifies. Registering the refresh token is the
//! caller's job (see [`super::registry`]).

use std::path::PathBuf;

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::info;

use super::{AuthConfig, AuthError};
use crate::models::auth::{AccessClaims, Principal, RefreshClaims, TokenKind, TokenPair};
use crate::uuid::uuidv7;

/// Mints and verifies the token pairs handed to clients.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
        }
    }

    /// Mint a new pair for `principal`.
    ///
    /// The access token carries a snapshot of the principal's roles; role
    /// changes only show up at the next mint.
    pub fn mint(
        &self,
        principal: &Principal,
        impersonator_id: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let refresh_expires_at = now + self.refresh_ttl;

        let access = AccessClaims {
            sub: principal.id.clone(),
            email: principal.email.clone(),
            roles: principal.roles.clone(),
            impersonator_id: impersonator_id.map(str::to_string),
            typ: TokenKind::Access,
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
        };
        let refresh = RefreshClaims {
            sub: principal.id.clone(),
            impersonator_id: impersonator_id.map(str::to_string),
            typ: TokenKind::Refresh,
            jti: uuidv7().to_string(),
            exp: refresh_expires_at.timestamp(),
            iat: now.timestamp(),
        };

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            expires_in: self.access_ttl.num_seconds(),
            refresh_expires_at,
        })
    }

    fn sign<T: serde::Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| AuthError::Token(format!("jwt encode: {e}")))
    }

    /// Verify an access token, returning the claims on success.
    ///
    /// Stateless: no registry lookup happens here.
    pub fn verify_access_token(&self, token: &str) -> Option<AccessClaims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        decode::<AccessClaims>(token, &self.decoding, &validation)
            .ok()
            .map(|data| data.claims)
            .filter(|claims| claims.typ == TokenKind::Access)
    }

    /// Check a refresh token's signature and kind.
    ///
    /// Expiry is not enforced here; the registry record is authoritative.
    pub fn decode_refresh_token(&self, token: &str) -> Option<RefreshClaims> {
        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub"]);
        decode::<RefreshClaims>(token, &self.decoding, &validation)
            .ok()
            .map(|data| data.claims)
            .filter(|claims| claims.typ == TokenKind::Refresh)
    }
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lease")
        .join("jwt-secret")
}
