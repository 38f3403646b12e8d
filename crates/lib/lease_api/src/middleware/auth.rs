//! Authentication middleware: bearer token extraction and JWT verification.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use lease_core::models::auth::AccessClaims;

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::ACCESS_COOKIE;

/// Verified claims of the caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AccessClaims);

/// Pull the raw access token from `Authorization: Bearer` or, failing that,
/// the access cookie.
fn extract_token(request: &Request) -> Result<String, AppError> {
    if let Some(header) = request.headers().get(AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| AppError::Unauthenticated("Malformed authorization header".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthenticated("Invalid authorization scheme".into()))?;
        return Ok(token.trim().to_string());
    }
    CookieJar::from_headers(request.headers())
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("Missing authorization header".into()))
}

/// Axum middleware: verifies the caller's access token and injects
/// `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&request)?;

    let claims = state
        .sessions
        .issuer()
        .verify_access_token(&token)
        .ok_or_else(|| AppError::Unauthenticated("Invalid or expired token".into()))?;

    request.extensions_mut().insert(AuthenticatedUser(claims));

    Ok(next.run(request).await)
}
