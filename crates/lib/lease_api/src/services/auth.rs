//! Authentication service: shapes `lease_core` session grants into API
//! responses.

use lease_core::models::auth::{ImpersonationGrant, Principal, SessionGrant};

use crate::models::{AuthUser, ImpersonationResponse, TokenResponse};

/// Generic reply to every password reset request.
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent.";

/// Reply after a successful password reset.
pub const RESET_COMPLETED_MESSAGE: &str =
    "Password has been reset. Please log in again on all devices.";

pub fn auth_user(principal: &Principal) -> AuthUser {
    AuthUser {
        id: principal.id.clone(),
        email: principal.email.clone(),
        name: principal.name.clone(),
        roles: principal.roles.clone(),
    }
}

/// Build a `TokenResponse` from a login/refresh/stop grant.
pub fn token_response(grant: &SessionGrant) -> TokenResponse {
    TokenResponse {
        access_token: grant.tokens.access_token.clone(),
        refresh_token: grant.tokens.refresh_token.clone(),
        expires_in: grant.tokens.expires_in,
        token_type: "Bearer".to_string(),
        user: auth_user(&grant.user),
        impersonator_id: grant.impersonator_id.clone(),
    }
}

pub fn impersonation_response(grant: &ImpersonationGrant) -> ImpersonationResponse {
    ImpersonationResponse {
        access_token: grant.tokens.access_token.clone(),
        refresh_token: grant.tokens.refresh_token.clone(),
        expires_in: grant.tokens.expires_in,
        token_type: "Bearer".to_string(),
        impersonated_user: auth_user(&grant.impersonated_user),
        original_user: auth_user(&grant.original_user),
    }
}
