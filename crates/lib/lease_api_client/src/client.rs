//! Typed HTTP client for the auth endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, ErrorPayload};
use crate::interceptor::{
    AuthInterceptor, DEFAULT_REFRESH_TIMEOUT, Refresher, RequestContext, execute,
};
use crate::models::{
    ImpersonateRequest, ImpersonationResponse, LoginRequest, LogoutAllResponse, LogoutResponse,
    MeResponse, MessageResponse, PasswordResetRequest, RefreshRequest, ResetPasswordRequest,
    TokenResponse,
};
use crate::store::CredentialStore;

const LOGIN: &str = "/auth/login";
const REFRESH: &str = "/auth/refresh";
const IMPERSONATE: &str = "/auth/impersonate";
const STOP_IMPERSONATION: &str = "/auth/stop-impersonation";
const PASSWORD_RESET_REQUEST: &str = "/auth/password-reset/request";
const PASSWORD_RESET: &str = "/auth/password-reset";
const LOGOUT: &str = "/auth/logout";
const LOGOUT_ALL: &str = "/auth/logout-all";
const ME: &str = "/auth/me";

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server origin, e.g. `http://127.0.0.1:3100`.
    pub base_url: String,
    /// Bound on a single refresh exchange.
    pub refresh_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

/// Build the error for a non-success response.
async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let payload: ErrorPayload = serde_json::from_str(&body).unwrap_or_else(|_| ErrorPayload {
        message: (!body.is_empty()).then(|| body.clone()),
        ..Default::default()
    });
    let message = payload
        .messages()
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| format!("request failed with status {status}"));
    ClientError::Api {
        status,
        message,
        payload,
    }
}

async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, ClientError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    Ok(response.json::<T>().await?)
}

/// Refresh exchange over HTTP, bypassing the interceptor.
struct HttpRefresher {
    http: reqwest::Client,
    url: String,
}

#[async_trait]
impl Refresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError> {
        let body = RefreshRequest {
            refresh_token: Some(refresh_token.to_string()),
        };
        send_json(self.http.post(&self.url).json(&body)).await
    }
}

/// Auth API client. Cheap to share behind an `Arc`.
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<CredentialStore>,
    interceptor: AuthInterceptor,
}

impl ApiClient {
    pub fn new(config: ClientConfig, store: Arc<CredentialStore>) -> Self {
        let http = reqwest::Client::new();
        let refresher = Arc::new(HttpRefresher {
            http: http.clone(),
            url: format!("{}{REFRESH}", config.base_url),
        });
        let interceptor = AuthInterceptor::new(store.clone(), refresher, config.refresh_timeout);
        Self {
            http,
            config,
            store,
            interceptor,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request through the interceptor.
    ///
    /// `requires_auth` attaches the bearer and enables refresh-and-retry.
    pub async fn call<B, T>(
        &self,
        ctx: RequestContext,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.config.base_url);
        debug!(operation = ctx.operation, %method, %url, "Sending request");
        execute(&self.interceptor, ctx, |headers: HeaderMap| {
            let mut request = self.http.request(method.clone(), &url).headers(headers);
            if let Some(body) = body {
                request = request.json(body);
            }
            send_json::<T>(request)
        })
        .await
    }

    /// Like [`call`](Self::call) with a caller-owned cancellation token.
    pub async fn call_cancellable<B, T>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<&B>,
        cancel: CancellationToken,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let ctx = RequestContext::new(operation, true).with_cancel(cancel);
        self.call(ctx, method, path, body).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: TokenResponse = self
            .call(RequestContext::new("login", false), Method::POST, LOGIN, Some(&body))
            .await?;
        self.store.reset();
        self.store.set_session(&response);
        Ok(response)
    }

    /// Explicit refresh using the stored refresh token. Shares the exchange
    /// with any refresh already in flight, so concurrent callers never
    /// present the same token twice.
    pub async fn refresh_token(&self) -> Result<TokenResponse, ClientError> {
        self.interceptor.refresh().await
    }

    pub async fn impersonate_user(
        &self,
        target_user_id: &str,
    ) -> Result<ImpersonationResponse, ClientError> {
        let body = ImpersonateRequest {
            target_user_id: target_user_id.to_string(),
        };
        let response: ImpersonationResponse = self
            .call(
                RequestContext::new("impersonate", true),
                Method::POST,
                IMPERSONATE,
                Some(&body),
            )
            .await?;
        self.store.start_impersonation(&response);
        Ok(response)
    }

    /// Return to the original identity; the impersonated refresh token is
    /// sent along so the server revokes it.
    pub async fn stop_impersonation(&self) -> Result<TokenResponse, ClientError> {
        let url = format!("{}{STOP_IMPERSONATION}", self.config.base_url);
        let ctx = RequestContext::new("stop_impersonation", true);
        let response: TokenResponse = execute(&self.interceptor, ctx, |headers: HeaderMap| {
            // Read per attempt: a refresh before the retry rotates the token.
            let body = RefreshRequest {
                refresh_token: self.store.refresh_token(),
            };
            send_json::<TokenResponse>(self.http.post(&url).headers(headers).json(&body))
        })
        .await?;
        self.store.set_session(&response);
        Ok(response)
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<MessageResponse, ClientError> {
        let body = PasswordResetRequest {
            email: email.to_string(),
        };
        self.call(
            RequestContext::new("request_password_reset", false),
            Method::POST,
            PASSWORD_RESET_REQUEST,
            Some(&body),
        )
        .await
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<MessageResponse, ClientError> {
        let body = ResetPasswordRequest {
            token: token.to_string(),
            new_password: new_password.to_string(),
            confirm_password: confirm_password.to_string(),
        };
        self.call(
            RequestContext::new("reset_password", false),
            Method::POST,
            PASSWORD_RESET,
            Some(&body),
        )
        .await
    }

    /// Revoke the current refresh token. The local store is cleared even
    /// if the server call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let body = RefreshRequest {
            refresh_token: self.store.refresh_token(),
        };
        let result: Result<LogoutResponse, ClientError> = self
            .call(RequestContext::new("logout", false), Method::POST, LOGOUT, Some(&body))
            .await;
        self.store.reset();
        if let Err(e) = &result {
            warn!("Server-side logout failed: {e}");
        }
        result.map(|_| ())
    }

    /// Revoke every session of the current user and clear the store.
    pub async fn logout_all(&self) -> Result<LogoutAllResponse, ClientError> {
        let result: Result<LogoutAllResponse, ClientError> = self
            .call(
                RequestContext::new("logout_all", true),
                Method::POST,
                LOGOUT_ALL,
                None::<&()>,
            )
            .await;
        self.store.reset();
        result
    }

    pub async fn me(&self) -> Result<MeResponse, ClientError> {
        self.call(RequestContext::new("me", true), Method::GET, ME, None::<&()>)
            .await
    }
}
