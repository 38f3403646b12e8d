//! API server configuration.

use lease_core::auth::jwt::resolve_jwt_secret;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Frontend page that completes a password reset.
    pub reset_link_base_url: String,
    /// Mark auth cookies `Secure`.
    pub cookie_secure: bool,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable              | Default                                  |
    /// |-----------------------|------------------------------------------|
    /// | `BIND_ADDR`           | `127.0.0.1:3100`                         |
    /// | `DATABASE_URL`        | `postgres://localhost:5432/lease`        |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file     |
    /// | `RESET_LINK_BASE_URL` | `http://localhost:3000/reset-password`   |
    /// | `COOKIE_SECURE`       | `false`                                  |
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3100".into()),
            pg_connection_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/lease".into()),
            jwt_secret: resolve_jwt_secret(),
            reset_link_base_url: std::env::var("RESET_LINK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/reset-password".into()),
            cookie_secure: std::env::var("COOKIE_SECURE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}
