//! Client error type and auth-failure classification.

use serde::Deserialize;
use thiserror::Error;

/// Error identifiers that mean "the access token is missing or no longer good".
pub const AUTH_ERROR_CODES: &[&str] = &[
    "UNAUTHENTICATED",
    "UNAUTHORIZED",
    "TOKEN_EXPIRED",
    "INVALID_TOKEN",
];

/// Lowercase message fragments used when a response carries no code.
const AUTH_MESSAGE_HINTS: &[&str] = &[
    "unauthenticated",
    "unauthorized",
    "invalid or expired token",
    "token expired",
    "jwt expired",
    "missing authorization",
];

/// Error body as sent by the server. Also accepts GraphQL-style nested
/// `errors[]` with `extensions.code`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub extensions: Option<ErrorExtensions>,
    #[serde(default)]
    pub errors: Vec<ErrorPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorPayload {
    /// Every error code in this payload and its nested errors.
    pub fn codes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_codes(&mut out);
        out
    }

    fn collect_codes<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(code) = self.error.as_deref() {
            out.push(code);
        }
        if let Some(code) = self.extensions.as_ref().and_then(|e| e.code.as_deref()) {
            out.push(code);
        }
        for nested in &self.errors {
            nested.collect_codes(out);
        }
    }

    /// Every message in this payload and its nested errors.
    pub fn messages(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.message.as_deref().into_iter().collect();
        for nested in &self.errors {
            out.extend(nested.messages());
        }
        out
    }
}

/// Errors surfaced by [`crate::ApiClient`].
///
/// `Clone` so a single refresh outcome can be shared by every waiter.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("HTTP {status}: {message}")]
    Api {
        status: u16,
        message: String,
        payload: ErrorPayload,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("no session to refresh")]
    NotAuthenticated,

    #[error("token refresh timed out")]
    RefreshTimeout,
}

impl ClientError {
    /// HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Primary error code for API errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { payload, .. } => payload.codes().into_iter().next(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Whether `err` means the caller's access token was rejected.
///
/// A structured code decides when present: only codes in
/// [`AUTH_ERROR_CODES`] count, so `INVALID_CREDENTIALS` on a 401 does not.
/// Without a code, HTTP 401 counts, then message text is matched.
pub fn is_auth_error(err: &ClientError) -> bool {
    let ClientError::Api {
        status,
        message,
        payload,
    } = err
    else {
        return false;
    };

    let codes = payload.codes();
    if !codes.is_empty() {
        return codes.iter().any(|c| AUTH_ERROR_CODES.contains(c));
    }
    if *status == 401 {
        return true;
    }
    std::iter::once(message.as_str())
        .chain(payload.messages())
        .map(str::to_lowercase)
        .any(|m| AUTH_MESSAGE_HINTS.iter().any(|h| m.contains(h)))
}
