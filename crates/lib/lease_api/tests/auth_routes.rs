//! Integration tests: build the router over in-memory stores and drive
//! every auth route with `oneshot`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use lease_api::{AppState, config::ApiConfig};
use lease_core::auth::notify::NotificationDispatcher;
use lease_core::auth::password::{MIN_BCRYPT_COST, hash_password};
use lease_core::auth::principals::InMemoryPrincipalRepository;
use lease_core::auth::registry::InMemoryRefreshTokenRegistry;
use lease_core::auth::reset::InMemoryResetTicketStore;
use lease_core::auth::session::SessionService;
use lease_core::auth::{AuthConfig, AuthError};
use lease_core::models::auth::Principal;
use serde_json::{Value, json};
use tower::ServiceExt;

#[derive(Default)]
struct Outbox {
    links: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationDispatcher for Outbox {
    async fn send_password_reset(&self, _email: &str, link: &str) -> Result<(), AuthError> {
        self.links.lock().unwrap().push(link.to_string());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    outbox: Arc<Outbox>,
}

fn app() -> TestApp {
    let principals = Arc::new(InMemoryPrincipalRepository::new());
    for (id, email, role, active) in [
        ("m", "admin@lease.example", "admin", true),
        ("u", "user@lease.example", "customer", true),
        ("a2", "other-admin@lease.example", "admin", true),
        ("off", "gone@lease.example", "customer", false),
    ] {
        principals.insert(Principal {
            id: id.into(),
            email: email.into(),
            name: None,
            roles: vec![role.into()],
            is_active: active,
            password_hash: Some(hash_password("correct-horse", MIN_BCRYPT_COST).unwrap()),
        });
    }
    let outbox = Arc::new(Outbox::default());
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        pg_connection_url: String::new(),
        jwt_secret: "test-secret".into(),
        reset_link_base_url: "https://lease.example/reset".into(),
        cookie_secure: false,
    };
    let sessions = SessionService::new(
        config.jwt_secret.as_bytes(),
        AuthConfig {
            bcrypt_cost: MIN_BCRYPT_COST,
            reset_link_base_url: config.reset_link_base_url.clone(),
            ..AuthConfig::default()
        },
        principals,
        Arc::new(InMemoryRefreshTokenRegistry::new()),
        Arc::new(InMemoryResetTicketStore::new()),
        outbox.clone(),
    );
    let state = AppState {
        sessions: Arc::new(sessions),
        config,
    };
    TestApp {
        router: lease_api::router(state),
        outbox,
    }
}

async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(b) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.router.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    };
    (status, json)
}

async fn login(app: &TestApp, email: &str) -> Value {
    let (status, body) = call(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": email, "password": "correct-horse"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body
}

fn s(v: &Value) -> &str {
    v.as_str().expect("string")
}

#[tokio::test]
async fn login_returns_pair_and_user() {
    let app = app();
    let body = login(&app, "user@lease.example").await;
    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["expiresIn"], 900);
    assert_eq!(body["user"]["id"], "u");
    assert!(body.get("impersonatorId").is_none());

    let (status, me) = call(&app, "GET", "/auth/me", Some(s(&body["accessToken"])), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], "u");
    assert_eq!(me["roles"], json!(["customer"]));
}

#[tokio::test]
async fn login_sets_auth_cookies() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"email": "user@lease.example", "password": "correct-horse"}).to_string(),
        ))
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let cookies: Vec<String> = resp
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("lease_access=") && c.contains("Max-Age=900")));
    assert!(cookies.iter().any(|c| c.starts_with("lease_refresh=") && c.contains("HttpOnly")));
}

#[tokio::test]
async fn login_failures_are_structured() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "user@lease.example", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_CREDENTIALS");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "gone@lease.example", "password": "correct-horse"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "ACCOUNT_INACTIVE");
}

#[tokio::test]
async fn protected_routes_require_bearer() {
    let app = app();
    let (status, body) = call(&app, "GET", "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHENTICATED");

    let (status, body) = call(&app, "GET", "/auth/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn refresh_token_is_not_a_bearer() {
    let app = app();
    let body = login(&app, "user@lease.example").await;
    let (status, _) = call(&app, "GET", "/auth/me", Some(s(&body["refreshToken"])), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_rotates_and_rejects_replay() {
    let app = app();
    let r1 = login(&app, "user@lease.example").await["refreshToken"].clone();

    let (status, second) = call(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refreshToken": r1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(second["refreshToken"], r1);

    let (status, body) = call(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refreshToken": r1})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_REFRESH_TOKEN");
}

#[tokio::test]
async fn refresh_reads_cookie_when_body_is_empty() {
    let app = app();
    let r1 = login(&app, "user@lease.example").await["refreshToken"].clone();
    let req = Request::builder()
        .method("POST")
        .uri("/auth/refresh")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, format!("lease_refresh={}", s(&r1)))
        .body(Body::from("{}"))
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn impersonation_round_trip() {
    let app = app();
    let admin = login(&app, "admin@lease.example").await;

    let (status, imp) = call(
        &app,
        "POST",
        "/auth/impersonate",
        Some(s(&admin["accessToken"])),
        Some(json!({"targetUserId": "u"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{imp}");
    assert_eq!(imp["impersonatedUser"]["id"], "u");
    assert_eq!(imp["originalUser"]["id"], "m");

    let (_, me) = call(&app, "GET", "/auth/me", Some(s(&imp["accessToken"])), None).await;
    assert_eq!(me["id"], "u");
    assert_eq!(me["impersonatorId"], "m");

    let (status, back) = call(
        &app,
        "POST",
        "/auth/stop-impersonation",
        Some(s(&imp["accessToken"])),
        Some(json!({"refreshToken": imp["refreshToken"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{back}");
    assert_eq!(back["user"]["id"], "m");
    assert!(back.get("impersonatorId").is_none());

    let (_, me) = call(&app, "GET", "/auth/me", Some(s(&back["accessToken"])), None).await;
    assert_eq!(me["id"], "m");
    assert!(me.get("impersonatorId").is_none());
}

#[tokio::test]
async fn impersonation_guards() {
    let app = app();
    let admin = login(&app, "admin@lease.example").await;
    let user = login(&app, "user@lease.example").await;

    let (status, body) = call(
        &app,
        "POST",
        "/auth/impersonate",
        Some(s(&user["accessToken"])),
        Some(json!({"targetUserId": "off"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/impersonate",
        Some(s(&admin["accessToken"])),
        Some(json!({"targetUserId": "a2"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "CANNOT_IMPERSONATE_PRIVILEGED");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/impersonate",
        Some(s(&admin["accessToken"])),
        Some(json!({"targetUserId": "off"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "TARGET_INACTIVE");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/stop-impersonation",
        Some(s(&admin["accessToken"])),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NOT_IMPERSONATING");
}

#[tokio::test]
async fn password_reset_does_not_reveal_accounts() {
    let app = app();
    let (_, known) = call(
        &app,
        "POST",
        "/auth/password-reset/request",
        None,
        Some(json!({"email": "user@lease.example"})),
    )
    .await;
    let (status, unknown) = call(
        &app,
        "POST",
        "/auth/password-reset/request",
        None,
        Some(json!({"email": "nobody@lease.example"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(known, unknown);
    assert_eq!(app.outbox.links.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn password_reset_flow_revokes_sessions() {
    let app = app();
    let before = login(&app, "user@lease.example").await;
    call(
        &app,
        "POST",
        "/auth/password-reset/request",
        None,
        Some(json!({"email": "user@lease.example"})),
    )
    .await;
    let link = app.outbox.links.lock().unwrap()[0].clone();
    let token = url::Url::parse(&link)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/auth/password-reset",
        None,
        Some(json!({"token": token, "newPassword": "battery-staple", "confirmPassword": "battery-stapler"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "PASSWORD_MISMATCH");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/password-reset",
        None,
        Some(json!({"token": token, "newPassword": "battery-staple", "confirmPassword": "battery-staple"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);

    let (status, body) = call(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refreshToken": before["refreshToken"]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_REFRESH_TOKEN");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/password-reset",
        None,
        Some(json!({"token": token, "newPassword": "battery-staple", "confirmPassword": "battery-staple"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_OR_EXPIRED_RESET_TOKEN");
}

#[tokio::test]
async fn logout_revokes_refresh_token() {
    let app = app();
    let body = login(&app, "user@lease.example").await;
    let (status, _) = call(
        &app,
        "POST",
        "/auth/logout",
        None,
        Some(json!({"refreshToken": body["refreshToken"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refreshToken": body["refreshToken"]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_all_reports_revoked_sessions() {
    let app = app();
    login(&app, "user@lease.example").await;
    let second = login(&app, "user@lease.example").await;
    let (status, body) = call(
        &app,
        "POST",
        "/auth/logout-all",
        Some(s(&second["accessToken"])),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revokedSessions"], 2);
}
