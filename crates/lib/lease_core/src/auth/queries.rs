//! PostgreSQL-backed principal repository, refresh token registry and
//! reset ticket store.
//!
//! The registry here is the shared store required when more than one
//! server instance issues tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::AuthError;
use super::principals::PrincipalRepository;
use super::registry::{RefreshTokenRegistry, hash_refresh_token};
use super::reset::ResetTicketStore;
use crate::models::auth::{PasswordResetTicket, Principal, RefreshTokenRecord};

type PrincipalRow = (String, String, Option<String>, Option<String>, bool);

/// Parse a user ID; anything that is not a UUID cannot exist in `users`.
fn parse_user_id(user_id: &str) -> Option<Uuid> {
    Uuid::parse_str(user_id).ok()
}

fn bad_user_id(user_id: &str) -> AuthError {
    AuthError::Internal(format!("malformed user id: {user_id}"))
}

/// Fetch roles for a user.
pub async fn get_user_roles(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>, AuthError> {
    let rows =
        sqlx::query_scalar::<_, String>("SELECT role FROM user_roles WHERE user_id = $1 ORDER BY role")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

async fn principal_from_row(pool: &PgPool, row: PrincipalRow) -> Result<Principal, AuthError> {
    let (id, email, name, password_hash, is_active) = row;
    let uid = parse_user_id(&id).ok_or_else(|| bad_user_id(&id))?;
    let roles = get_user_roles(pool, uid).await?;
    Ok(Principal {
        id,
        email,
        name,
        roles,
        is_active,
        password_hash,
    })
}

/// Create a new user, returning the user ID.
pub async fn create_user(
    pool: &PgPool,
    email: &str,
    name: Option<&str>,
    password_hash: &str,
) -> Result<String, AuthError> {
    let user_id = sqlx::query_scalar::<_, String>(
        "INSERT INTO users (email, name, password_hash) VALUES ($1, $2, $3) RETURNING id::text",
    )
    .bind(email)
    .bind(name)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;
    Ok(user_id)
}

/// Grant a role to a user.
pub async fn grant_role(pool: &PgPool, user_id: &str, role: &str) -> Result<(), AuthError> {
    let uid = parse_user_id(user_id).ok_or_else(|| bad_user_id(user_id))?;
    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(uid)
        .bind(role)
        .execute(pool)
        .await?;
    Ok(())
}

/// Check whether any user holds one of `roles`.
pub async fn any_user_with_role(pool: &PgPool, roles: &[&str]) -> Result<bool, AuthError> {
    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM user_roles WHERE role = ANY($1))",
    )
    .bind(&roles)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

pub struct PgPrincipalRepository {
    pool: PgPool,
}

impl PgPrincipalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrincipalRepository for PgPrincipalRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id::text, email, name, password_hash, is_active \
             FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(principal_from_row(&self.pool, row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Principal>, AuthError> {
        let Some(uid) = parse_user_id(user_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id::text, email, name, password_hash, is_active FROM users WHERE id = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(principal_from_row(&self.pool, row).await?)),
            None => Ok(None),
        }
    }

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> Result<(), AuthError> {
        let uid = parse_user_id(user_id).ok_or_else(|| bad_user_id(user_id))?;
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(uid)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

pub struct PgRefreshTokenRegistry {
    pool: PgPool,
}

impl PgRefreshTokenRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired rows. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RefreshTokenRegistry for PgRefreshTokenRegistry {
    async fn register(&self, token: &str, record: RefreshTokenRecord) -> Result<(), AuthError> {
        let uid = parse_user_id(&record.user_id).ok_or_else(|| bad_user_id(&record.user_id))?;
        sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, user_id, impersonator_id, expires_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(hash_refresh_token(token))
        .bind(uid)
        .bind(record.impersonator_id)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let row = sqlx::query_as::<_, (String, Option<String>, DateTime<Utc>)>(
            "SELECT user_id::text, impersonator_id, expires_at \
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(hash_refresh_token(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, impersonator_id, expires_at)| RefreshTokenRecord {
            user_id,
            expires_at,
            impersonator_id,
        }))
    }

    async fn invalidate(&self, token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(hash_refresh_token(token))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn invalidate_all_for_user(&self, user_id: &str) -> Result<u64, AuthError> {
        let Some(uid) = parse_user_id(user_id) else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Password reset tickets (stored on the user row)
// ---------------------------------------------------------------------------

pub struct PgResetTicketStore {
    pool: PgPool,
}

impl PgResetTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResetTicketStore for PgResetTicketStore {
    async fn store(&self, ticket: PasswordResetTicket) -> Result<(), AuthError> {
        let uid = parse_user_id(&ticket.user_id).ok_or_else(|| bad_user_id(&ticket.user_id))?;
        sqlx::query(
            "UPDATE users SET reset_token_hash = $2, reset_token_expires_at = $3 WHERE id = $1",
        )
        .bind(uid)
        .bind(&ticket.token_hash)
        .bind(ticket.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_tickets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PasswordResetTicket>, AuthError> {
        let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT id::text, reset_token_hash, reset_token_expires_at FROM users \
             WHERE reset_token_hash IS NOT NULL AND reset_token_expires_at > $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, token_hash, expires_at)| PasswordResetTicket {
                user_id,
                token_hash,
                expires_at,
            })
            .collect())
    }

    async fn consume(&self, user_id: &str, token_hash: &str) -> Result<bool, AuthError> {
        let Some(uid) = parse_user_id(user_id) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE users SET reset_token_hash = NULL, reset_token_expires_at = NULL \
             WHERE id = $1 AND reset_token_hash = $2",
        )
        .bind(uid)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
