//! Request interception: bearer attachment and transparent token refresh.
//!
//! When an authenticated call fails with an auth error, every concurrent
//! failure waits on the same in-flight refresh. On success each waiter is
//! retried once with the new bearer; on failure or timeout the credential
//! store is cleared and the original error is returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, is_auth_error};
use crate::models::TokenResponse;
use crate::store::CredentialStore;

/// Upper bound on a single refresh exchange.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-call state threaded through the interceptor.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: &'static str,
    /// Public operations (login, refresh, password reset) never trigger a refresh.
    pub requires_auth: bool,
    pub cancel: CancellationToken,
    /// Bearer attached to the most recent attempt.
    pub sent_token: Option<String>,
    pub attempt: u32,
}

impl RequestContext {
    pub fn new(operation: &'static str, requires_auth: bool) -> Self {
        Self {
            operation,
            requires_auth,
            cancel: CancellationToken::new(),
            sent_token: None,
            attempt: 0,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Fail,
}

/// Hooks around every request.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Called before each attempt to decorate outgoing headers.
    fn before(&self, ctx: &mut RequestContext, headers: &mut HeaderMap);

    /// Called after a failed attempt.
    async fn on_error(&self, ctx: &RequestContext, error: &ClientError) -> Decision;
}

/// Performs the refresh-token exchange.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError>;
}

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenResponse, ClientError>>>;

/// Attaches the bearer and refreshes expired sessions, single-flight.
pub struct AuthInterceptor {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn Refresher>,
    refresh_timeout: Duration,
    inflight: Mutex<Option<SharedRefresh>>,
}

impl AuthInterceptor {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<dyn Refresher>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            store,
            refresher,
            refresh_timeout,
            inflight: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Exchange the stored refresh token, joining any refresh already in
    /// flight. On failure the store has been cleared.
    pub async fn refresh(&self) -> Result<TokenResponse, ClientError> {
        self.shared_refresh().await.await
    }

    /// Join the in-flight refresh, or start one.
    async fn shared_refresh(&self) -> SharedRefresh {
        let mut slot = self.inflight.lock().await;
        if let Some(current) = slot.as_ref()
            && current.peek().is_none()
        {
            return current.clone();
        }

        let store = Arc::clone(&self.store);
        let refresher = Arc::clone(&self.refresher);
        let timeout = self.refresh_timeout;

        // Spawned so the exchange completes even if every waiter is aborted.
        let task = tokio::spawn(async move {
            let result = run_refresh(&store, refresher.as_ref(), timeout).await;
            if let Err(e) = &result {
                warn!("Token refresh failed, clearing session: {e}");
                store.reset();
            }
            result
        });

        let refresh = async move {
            task.await
                .unwrap_or_else(|e| Err(ClientError::Transport(format!("refresh task: {e}"))))
        }
        .boxed()
        .shared();

        *slot = Some(refresh.clone());
        refresh
    }
}

async fn run_refresh(
    store: &CredentialStore,
    refresher: &dyn Refresher,
    timeout: Duration,
) -> Result<TokenResponse, ClientError> {
    let refresh_token = store
        .refresh_token()
        .ok_or(ClientError::NotAuthenticated)?;

    debug!("Refreshing access token");
    let response = tokio::time::timeout(timeout, refresher.refresh(&refresh_token))
        .await
        .map_err(|_| ClientError::RefreshTimeout)??;

    store.set_session(&response);
    info!(user_id = %response.user.id, "Access token refreshed");
    Ok(response)
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn before(&self, ctx: &mut RequestContext, headers: &mut HeaderMap) {
        ctx.sent_token = None;
        if !ctx.requires_auth {
            return;
        }
        let Some(token) = self.store.current_access_token() else {
            return;
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
                ctx.sent_token = Some(token);
            }
            Err(e) => warn!("Access token is not a valid header value: {e}"),
        }
    }

    async fn on_error(&self, ctx: &RequestContext, error: &ClientError) -> Decision {
        if !ctx.requires_auth || ctx.attempt > 0 || !is_auth_error(error) {
            return Decision::Fail;
        }
        if ctx.cancel.is_cancelled() {
            return Decision::Fail;
        }

        // Another caller already rotated the token since this attempt was sent.
        if let Some(current) = self.store.access_token()
            && ctx.sent_token.as_deref() != Some(current.as_str())
        {
            debug!(operation = ctx.operation, "Retrying with newer access token");
            return Decision::Retry;
        }

        let refresh = self.shared_refresh().await;
        let outcome = tokio::select! {
            outcome = refresh => outcome,
            _ = ctx.cancel.cancelled() => {
                debug!(operation = ctx.operation, "Call aborted during refresh");
                return Decision::Fail;
            }
        };

        match outcome {
            Ok(_) if !ctx.cancel.is_cancelled() => Decision::Retry,
            _ => Decision::Fail,
        }
    }
}

/// Run `send` through `interceptor`, retrying once when it says so.
///
/// `send` receives the headers for each attempt.
pub async fn execute<I, T, F, Fut>(
    interceptor: &I,
    mut ctx: RequestContext,
    send: F,
) -> Result<T, ClientError>
where
    I: Interceptor + ?Sized,
    F: Fn(HeaderMap) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    if ctx.cancel.is_cancelled() {
        return Err(ClientError::Cancelled);
    }

    let mut headers = HeaderMap::new();
    interceptor.before(&mut ctx, &mut headers);
    let error = match send(headers).await {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    match interceptor.on_error(&ctx, &error).await {
        Decision::Retry => {
            ctx.attempt += 1;
            let mut headers = HeaderMap::new();
            interceptor.before(&mut ctx, &mut headers);
            send(headers).await
        }
        Decision::Fail => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ErrorPayload;
    use crate::models::AuthUser;

    struct FakeRefresher {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl FakeRefresher {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Duration::ZERO)
            }
        }
    }

    #[async_trait]
    impl Refresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(unauthenticated_with("INVALID_REFRESH_TOKEN"));
            }
            Ok(TokenResponse {
                access_token: format!("fresh-{n}"),
                refresh_token: format!("{refresh_token}-next"),
                expires_in: 900,
                token_type: "Bearer".into(),
                user: AuthUser {
                    id: "u1".into(),
                    email: "u1@lease.test".into(),
                    name: None,
                    roles: vec![],
                },
                impersonator_id: None,
            })
        }
    }

    fn unauthenticated_with(code: &str) -> ClientError {
        ClientError::Api {
            status: 401,
            message: "Invalid or expired token".into(),
            payload: ErrorPayload {
                error: Some(code.into()),
                message: Some("Invalid or expired token".into()),
                ..Default::default()
            },
        }
    }

    fn unauthenticated() -> ClientError {
        unauthenticated_with("UNAUTHENTICATED")
    }

    fn seeded_store() -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::in_memory());
        store.set_session(&TokenResponse {
            access_token: "stale".into(),
            refresh_token: "r0".into(),
            expires_in: 900,
            token_type: "Bearer".into(),
            user: AuthUser {
                id: "u1".into(),
                email: "u1@lease.test".into(),
                name: None,
                roles: vec![],
            },
            impersonator_id: None,
        });
        store
    }

    /// Accepts only bearers starting with `fresh`; records every bearer seen.
    #[derive(Default)]
    struct FakeServer {
        seen: StdMutex<Vec<Option<String>>>,
    }

    impl FakeServer {
        async fn call(&self, headers: HeaderMap) -> Result<&'static str, ClientError> {
            let bearer = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string);
            self.seen.lock().unwrap().push(bearer.clone());
            tokio::task::yield_now().await;
            match bearer {
                Some(b) if b.starts_with("fresh") => Ok("ok"),
                _ => Err(unauthenticated()),
            }
        }

        fn seen(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn concurrent_failures_share_one_refresh() {
        let store = seeded_store();
        let refresher = Arc::new(FakeRefresher::new(Duration::from_millis(50)));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_TIMEOUT);
        let server = FakeServer::default();

        let (a, b) = tokio::join!(
            execute(&interceptor, RequestContext::new("a", true), |h| server.call(h)),
            execute(&interceptor, RequestContext::new("b", true), |h| server.call(h)),
        );

        assert_eq!(a.unwrap(), "ok");
        assert_eq!(b.unwrap(), "ok");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let seen = server.seen();
        assert_eq!(seen.len(), 4);
        assert_eq!(
            seen.iter()
                .filter(|s| s.as_deref() == Some("fresh-1"))
                .count(),
            2
        );
        assert_eq!(store.access_token().as_deref(), Some("fresh-1"));
        assert_eq!(store.refresh_token().as_deref(), Some("r0-next"));
    }

    #[tokio::test]
    async fn explicit_refreshes_join_the_same_exchange() {
        let store = seeded_store();
        let refresher = Arc::new(FakeRefresher::new(Duration::from_millis(50)));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_TIMEOUT);

        let (a, b) = tokio::join!(interceptor.refresh(), interceptor.refresh());
        assert_eq!(a.unwrap().access_token, "fresh-1");
        assert_eq!(b.unwrap().refresh_token, "r0-next");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.refresh_token().as_deref(), Some("r0-next"));
    }

    #[tokio::test]
    async fn late_failure_reuses_rotated_token() {
        let store = seeded_store();
        let refresher = Arc::new(FakeRefresher::new(Duration::ZERO));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_TIMEOUT);

        let mut ctx = RequestContext::new("late", true);
        ctx.sent_token = Some("stale".into());
        store.set_session(&TokenResponse {
            access_token: "fresh-x".into(),
            refresh_token: "r1".into(),
            expires_in: 900,
            token_type: "Bearer".into(),
            user: store.user().unwrap(),
            impersonator_id: None,
        });

        let decision = interceptor.on_error(&ctx, &unauthenticated()).await;
        assert_eq!(decision, Decision::Retry);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_timeout_logs_out() {
        let store = seeded_store();
        let refresher = Arc::new(FakeRefresher::new(Duration::from_secs(30)));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher, Duration::from_millis(50));
        let server = FakeServer::default();

        let err = execute(&interceptor, RequestContext::new("slow", true), |h| {
            server.call(h)
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), Some("UNAUTHENTICATED"));
        assert_eq!(store.snapshot(), Default::default());
        assert_eq!(server.seen().len(), 1);
    }

    #[tokio::test]
    async fn refresh_failure_clears_store_and_returns_original_error() {
        let store = seeded_store();
        let interceptor = AuthInterceptor::new(
            store.clone(),
            Arc::new(FakeRefresher::failing()),
            DEFAULT_REFRESH_TIMEOUT,
        );
        let server = FakeServer::default();

        let err = execute(&interceptor, RequestContext::new("x", true), |h| {
            server.call(h)
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), Some("UNAUTHENTICATED"));
        assert!(store.refresh_token().is_none());
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_closed() {
        let store = Arc::new(CredentialStore::in_memory());
        let refresher = Arc::new(FakeRefresher::new(Duration::ZERO));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_TIMEOUT);
        let server = FakeServer::default();

        let err = execute(&interceptor, RequestContext::new("anon", true), |h| {
            server.call(h)
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), Some("UNAUTHENTICATED"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.seen(), vec![None]);
    }

    #[tokio::test]
    async fn aborted_call_is_not_retried() {
        let store = seeded_store();
        let refresher = Arc::new(FakeRefresher::new(Duration::from_millis(100)));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_TIMEOUT);
        let server = FakeServer::default();

        let cancel = CancellationToken::new();
        let ctx = RequestContext::new("aborted", true).with_cancel(cancel.clone());
        let aborter = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(execute(&interceptor, ctx, |h| server.call(h)), aborter);

        assert_eq!(result.unwrap_err().code(), Some("UNAUTHENTICATED"));
        assert_eq!(server.seen().len(), 1);

        // The spawned refresh still completes for everyone else.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.access_token().as_deref(), Some("fresh-1"));
    }

    #[tokio::test]
    async fn public_operations_never_refresh() {
        let store = seeded_store();
        let refresher = Arc::new(FakeRefresher::new(Duration::ZERO));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_TIMEOUT);
        let server = FakeServer::default();

        let err = execute(&interceptor, RequestContext::new("login", false), |h| {
            server.call(h)
        })
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.seen(), vec![None]);
        assert_eq!(store.refresh_token().as_deref(), Some("r0"));
    }

    #[tokio::test]
    async fn non_auth_errors_pass_through() {
        let store = seeded_store();
        let refresher = Arc::new(FakeRefresher::new(Duration::ZERO));
        let interceptor =
            AuthInterceptor::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_TIMEOUT);

        let err = execute(&interceptor, RequestContext::new("x", true), |_| async {
            Err::<(), _>(ClientError::Transport("connection refused".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_before_send_short_circuits() {
        let store = seeded_store();
        let interceptor = AuthInterceptor::new(
            store,
            Arc::new(FakeRefresher::new(Duration::ZERO)),
            DEFAULT_REFRESH_TIMEOUT,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let server = FakeServer::default();

        let err = execute(
            &interceptor,
            RequestContext::new("x", true).with_cancel(cancel),
            |h| server.call(h),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert!(server.seen().is_empty());
    }
}
