//! Session service: login, refresh rotation, impersonation and password reset.
//!
//! Session states: anonymous → authenticated → authenticated + impersonating
//! → authenticated (after stop) → revoked. Every transition that yields
//! credentials goes through [`SessionService::issue`], which mints a pair and
//! registers its refresh token.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::jwt::TokenIssuer;
use super::locks::UserLocks;
use super::notify::{NotificationDispatcher, build_reset_link};
use super::password::{hash_password, verify_password};
use super::principals::PrincipalRepository;
use super::registry::RefreshTokenRegistry;
use super::reset::{ResetTicketStore, generate_reset_token};
use super::roles::is_admin;
use super::{AuthConfig, AuthError, MIN_PASSWORD_LEN};
use crate::models::auth::{
    AccessClaims, ImpersonationGrant, PasswordResetTicket, Principal, RefreshTokenRecord,
    SessionGrant, TokenPair,
};

/// Orchestrates credential issuing over the registry, ticket store and
/// principal repository.
pub struct SessionService {
    config: AuthConfig,
    issuer: TokenIssuer,
    principals: Arc<dyn PrincipalRepository>,
    registry: Arc<dyn RefreshTokenRegistry>,
    tickets: Arc<dyn ResetTicketStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    locks: UserLocks,
}

impl SessionService {
    pub fn new(
        secret: &[u8],
        config: AuthConfig,
        principals: Arc<dyn PrincipalRepository>,
        registry: Arc<dyn RefreshTokenRegistry>,
        tickets: Arc<dyn ResetTicketStore>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            issuer: TokenIssuer::new(secret, &config),
            config,
            principals,
            registry,
            tickets,
            notifier,
            locks: UserLocks::new(),
        }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Mint a pair for `principal` and register its refresh token.
    async fn issue(
        &self,
        principal: &Principal,
        impersonator_id: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        let tokens = self.issuer.mint(principal, impersonator_id)?;
        self.registry
            .register(
                &tokens.refresh_token,
                RefreshTokenRecord {
                    user_id: principal.id.clone(),
                    expires_at: tokens.refresh_expires_at,
                    impersonator_id: impersonator_id.map(str::to_string),
                },
            )
            .await?;
        Ok(tokens)
    }

    /// Authenticate with email + password.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionGrant, AuthError> {
        let principal = self
            .principals
            .find_by_email(email.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let pw_hash = principal
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, pw_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        // Distinct from InvalidCredentials, unlike password reset which never
        // reveals whether an account exists.
        if !principal.is_active {
            return Err(AuthError::AccountInactive);
        }

        let tokens = self.issue(&principal, None).await?;
        info!(user_id = %principal.id, "login succeeded");
        Ok(SessionGrant {
            tokens,
            user: principal,
            impersonator_id: None,
        })
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// removed from the registry before the new pair is returned.
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionGrant, AuthError> {
        if self.issuer.decode_refresh_token(refresh_token).is_none() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let record = self
            .registry
            .lookup(refresh_token)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        let _guard = self.locks.lock(&record.user_id).await;

        if record.expires_at <= Utc::now() {
            self.registry.invalidate(refresh_token).await?;
            return Err(AuthError::RefreshTokenExpired);
        }

        let principal = self
            .principals
            .find_by_id(&record.user_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(AuthError::UserInactive)?;

        if let Some(admin_id) = record.impersonator_id.as_deref() {
            let still_admin = self
                .principals
                .find_by_id(admin_id)
                .await?
                .is_some_and(|a| a.is_active && is_admin(&a.roles));
            if !still_admin {
                self.registry.invalidate(refresh_token).await?;
                return Err(AuthError::Forbidden(
                    "impersonator is no longer an active admin".into(),
                ));
            }
        }

        // Lost a race with another refresh or a bulk invalidation.
        if !self.registry.invalidate(refresh_token).await? {
            return Err(AuthError::InvalidRefreshToken);
        }

        let tokens = self
            .issue(&principal, record.impersonator_id.as_deref())
            .await?;
        debug!(user_id = %principal.id, "refresh token rotated");
        Ok(SessionGrant {
            tokens,
            user: principal,
            impersonator_id: record.impersonator_id,
        })
    }

    /// Let `admin_id` act as `target_id`.
    pub async fn impersonate(
        &self,
        admin_id: &str,
        target_id: &str,
    ) -> Result<ImpersonationGrant, AuthError> {
        let admin = self
            .principals
            .find_by_id(admin_id)
            .await?
            .filter(|a| a.is_active && is_admin(&a.roles))
            .ok_or_else(|| AuthError::Forbidden("admin role required".into()))?;

        let target = self
            .principals
            .find_by_id(target_id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {target_id}")))?;

        if !target.is_active {
            return Err(AuthError::TargetInactive);
        }
        if is_admin(&target.roles) {
            return Err(AuthError::CannotImpersonatePrivileged);
        }

        let tokens = self.issue(&target, Some(&admin.id)).await?;
        info!(admin_id = %admin.id, target_id = %target.id, "impersonation started");
        Ok(ImpersonationGrant {
            tokens,
            impersonated_user: target,
            original_user: admin,
        })
    }

    /// End an impersonation by minting a fresh pair for the original admin.
    ///
    /// The admin's pre-impersonation tokens are not restored. When given,
    /// the impersonated session's refresh token is revoked.
    pub async fn stop_impersonation(
        &self,
        caller: &AccessClaims,
        impersonated_refresh_token: Option<&str>,
    ) -> Result<SessionGrant, AuthError> {
        let admin_id = caller
            .impersonator_id
            .as_deref()
            .ok_or(AuthError::NotImpersonating)?;

        let admin = self
            .principals
            .find_by_id(admin_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or(AuthError::UserInactive)?;

        if let Some(token) = impersonated_refresh_token
            && self
                .registry
                .lookup(token)
                .await?
                .is_some_and(|r| r.user_id == caller.sub)
        {
            self.registry.invalidate(token).await?;
        }

        let tokens = self.issue(&admin, None).await?;
        info!(admin_id = %admin.id, target_id = %caller.sub, "impersonation stopped");
        Ok(SessionGrant {
            tokens,
            user: admin,
            impersonator_id: None,
        })
    }

    /// Revoke one refresh token. Unknown tokens are ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if self.registry.invalidate(refresh_token).await? {
            debug!("refresh token revoked on logout");
        }
        Ok(())
    }

    /// Revoke every refresh token of `user_id`.
    pub async fn logout_all(&self, user_id: &str) -> Result<u64, AuthError> {
        let _guard = self.locks.lock(user_id).await;
        let revoked = self.registry.invalidate_all_for_user(user_id).await?;
        info!(user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Start a password reset for `email`.
    ///
    /// Never reports whether the account exists; failures are logged only.
    pub async fn request_password_reset(&self, email: &str) {
        if let Err(e) = self.try_request_password_reset(email.trim()).await {
            warn!(error = %e, "password reset request failed");
        }
    }

    async fn try_request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let Some(principal) = self.principals.find_by_email(email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };
        if !principal.is_active {
            debug!(user_id = %principal.id, "password reset requested for inactive account");
            return Ok(());
        }

        let token = generate_reset_token();
        let ticket = PasswordResetTicket {
            user_id: principal.id.clone(),
            token_hash: hash_password(&token, self.config.bcrypt_cost)?,
            expires_at: Utc::now() + self.config.reset_ticket_ttl,
        };
        self.tickets.store(ticket).await?;

        let link = build_reset_link(&self.config.reset_link_base_url, &token)?;
        self.notifier
            .send_password_reset(&principal.email, &link)
            .await?;
        info!(user_id = %principal.id, "password reset ticket issued");
        Ok(())
    }

    /// Complete a password reset.
    ///
    /// Live tickets are scanned and the first whose hash matches `token`
    /// wins. On success every refresh token of the user is revoked, so all
    /// devices (including this one) must log in again.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        if new_password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let tickets = self.tickets.active_tickets(Utc::now()).await?;
        let ticket = tickets
            .into_iter()
            .find(|t| match verify_password(token, &t.token_hash) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(user_id = %t.user_id, error = %e, "unreadable reset ticket hash");
                    false
                }
            })
            .ok_or(AuthError::InvalidOrExpiredResetToken)?;

        let _guard = self.locks.lock(&ticket.user_id).await;

        if !self
            .tickets
            .consume(&ticket.user_id, &ticket.token_hash)
            .await?
        {
            return Err(AuthError::InvalidOrExpiredResetToken);
        }

        let pw_hash = hash_password(new_password, self.config.bcrypt_cost)?;
        self.principals
            .update_password_hash(&ticket.user_id, &pw_hash)
            .await?;
        let revoked = self
            .registry
            .invalidate_all_for_user(&ticket.user_id)
            .await?;

        info!(user_id = %ticket.user_id, revoked, "password reset completed");
        Ok(())
    }
}
