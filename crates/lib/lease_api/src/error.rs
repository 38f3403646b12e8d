//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lease_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Code sent when the bearer credential is missing, malformed or expired.
pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Auth(AuthError),

    #[error("Internal server error")]
    Internal(String),
}

fn auth_status(e: &AuthError) -> StatusCode {
    match e {
        AuthError::InvalidCredentials
        | AuthError::InvalidRefreshToken
        | AuthError::RefreshTokenExpired => StatusCode::UNAUTHORIZED,
        AuthError::AccountInactive
        | AuthError::UserInactive
        | AuthError::Forbidden(_)
        | AuthError::CannotImpersonatePrivileged => StatusCode::FORBIDDEN,
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::TargetInactive | AuthError::NotImpersonating => StatusCode::CONFLICT,
        AuthError::PasswordMismatch
        | AuthError::InvalidOrExpiredResetToken
        | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::Token(_) | AuthError::Db(_) | AuthError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, UNAUTHENTICATED, m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "FORBIDDEN", m.clone()),
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", m.clone()),
            AppError::Auth(e) => {
                let status = auth_status(e);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %e, "unexpected auth failure");
                    (status, e.code(), "Internal server error".to_string())
                } else {
                    (status, e.code(), e.to_string())
                }
            }
            AppError::Internal(m) => {
                error!(error = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        AppError::Auth(e)
    }
}
