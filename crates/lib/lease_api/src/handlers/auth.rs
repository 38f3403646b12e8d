//! Authentication request handlers.

use axum::extract::State;
use axum::{Extension, Json};
use axum_extra::extract::cookie::CookieJar;
use lease_core::auth::roles::{ADMIN_ROLES, is_authorized};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    ImpersonateRequest, ImpersonationResponse, LoginRequest, LogoutAllResponse, LogoutRequest,
    LogoutResponse, MeResponse, MessageResponse, PasswordResetRequest, RefreshRequest,
    ResetPasswordRequest, StopImpersonationRequest, TokenResponse,
};
use crate::services::auth::{
    RESET_COMPLETED_MESSAGE, RESET_REQUESTED_MESSAGE, impersonation_response, token_response,
};
use crate::services::cookies::{REFRESH_COOKIE, clear_token_cookies, with_token_cookies};

/// Body value if present, otherwise the refresh cookie.
fn refresh_token_from(body: Option<String>, jar: &CookieJar) -> Option<String> {
    body.filter(|t| !t.is_empty()).or_else(|| {
        jar.get(REFRESH_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let grant = state.sessions.login(&body.email, &body.password).await?;
    let jar = with_token_cookies(jar, &grant.tokens, state.config.cookie_secure);
    Ok((jar, Json(token_response(&grant))))
}

/// `POST /auth/refresh`: exchange a refresh token for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RefreshRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let token = refresh_token_from(body.refresh_token, &jar)
        .ok_or_else(|| AppError::Validation("refreshToken is required".into()))?;
    let grant = state.sessions.refresh(&token).await?;
    let jar = with_token_cookies(jar, &grant.tokens, state.config.cookie_secure);
    Ok((jar, Json(token_response(&grant))))
}

/// `POST /auth/impersonate`: admin assumes another user's identity.
pub async fn impersonate_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    jar: CookieJar,
    Json(body): Json<ImpersonateRequest>,
) -> AppResult<(CookieJar, Json<ImpersonationResponse>)> {
    if !is_authorized(&claims.roles, ADMIN_ROLES) {
        return Err(AppError::Forbidden("admin role required".into()));
    }
    let grant = state
        .sessions
        .impersonate(&claims.sub, &body.target_user_id)
        .await?;
    let jar = with_token_cookies(jar, &grant.tokens, state.config.cookie_secure);
    Ok((jar, Json(impersonation_response(&grant))))
}

/// `POST /auth/stop-impersonation`: return to the original admin identity.
pub async fn stop_impersonation_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    jar: CookieJar,
    Json(body): Json<StopImpersonationRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let impersonated_refresh = refresh_token_from(body.refresh_token, &jar);
    let grant = state
        .sessions
        .stop_impersonation(&claims, impersonated_refresh.as_deref())
        .await?;
    let jar = with_token_cookies(jar, &grant.tokens, state.config.cookie_secure);
    Ok((jar, Json(token_response(&grant))))
}

/// `POST /auth/password-reset/request`: always answers with the same message.
pub async fn request_password_reset_handler(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> Json<MessageResponse> {
    state.sessions.request_password_reset(&body.email).await;
    Json(MessageResponse {
        success: true,
        message: RESET_REQUESTED_MESSAGE.to_string(),
    })
}

/// `POST /auth/password-reset`: set a new password using an emailed token.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .sessions
        .reset_password(&body.token, &body.new_password, &body.confirm_password)
        .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: RESET_COMPLETED_MESSAGE.to_string(),
    }))
}

/// `POST /auth/logout`: revoke a refresh token and clear cookies.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LogoutRequest>,
) -> AppResult<(CookieJar, Json<LogoutResponse>)> {
    if let Some(token) = refresh_token_from(body.refresh_token, &jar) {
        state.sessions.logout(&token).await?;
    }
    let jar = clear_token_cookies(jar, state.config.cookie_secure);
    Ok((jar, Json(LogoutResponse { success: true })))
}

/// `POST /auth/logout-all`: revoke every session of the caller.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<LogoutAllResponse>)> {
    let revoked = state.sessions.logout_all(&claims.sub).await?;
    let jar = clear_token_cookies(jar, state.config.cookie_secure);
    Ok((
        jar,
        Json(LogoutAllResponse {
            success: true,
            revoked_sessions: revoked,
        }),
    ))
}

/// `GET /auth/me`: identity carried by the caller's access token.
pub async fn me_handler(
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> Json<MeResponse> {
    Json(MeResponse {
        id: claims.sub,
        email: claims.email,
        roles: claims.roles,
        impersonator_id: claims.impersonator_id,
    })
}
