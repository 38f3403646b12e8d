//! Client-side credential store.
//!
//! Each field is persisted through a [`CredentialBackend`] with its own
//! expiry, and mirrored in memory. Access tokens persist for at most 15
//! minutes (never longer than the server says), everything else for 7 days.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{AuthUser, ImpersonationResponse, TokenResponse};

const KEY_ACCESS: &str = "accessToken";
const KEY_REFRESH: &str = "refreshToken";
const KEY_USER: &str = "user";
const KEY_ORIGINAL_USER: &str = "originalUser";
const KEY_IMPERSONATING: &str = "isImpersonating";

/// Persisted lifetime of the access token field.
pub fn access_field_ttl() -> Duration {
    Duration::minutes(15)
}

/// Persisted lifetime of every other field.
pub fn session_field_ttl() -> Duration {
    Duration::days(7)
}

/// Key/value persistence with per-field expiry. Expired fields read as absent.
pub trait CredentialBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>);
    fn remove(&self, key: &str);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredField {
    value: String,
    expires_at: DateTime<Utc>,
}

impl StoredField {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Process-local backend.
#[derive(Default)]
pub struct MemoryBackend {
    fields: Mutex<HashMap<String, StoredField>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        let mut fields = self.fields.lock().unwrap_or_else(PoisonError::into_inner);
        match fields.get(key) {
            Some(f) if f.is_live(Utc::now()) => Some(f.value.clone()),
            Some(_) => {
                fields.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                StoredField {
                    value: value.to_string(),
                    expires_at,
                },
            );
    }

    fn remove(&self, key: &str) {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// JSON file backend, so a CLI session survives restarts.
pub struct FileBackend {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    /// `<data_dir>/lease/session.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("lease").join("session.json"))
    }

    fn read_fields(&self) -> HashMap<String, StoredField> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "Discarding unreadable session file: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    fn write_fields(&self, fields: &HashMap<String, StoredField>) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let raw = serde_json::to_string_pretty(fields).map_err(std::io::Error::other)?;
            std::fs::write(&self.path, raw)
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), "Failed to persist session file: {e}");
        }
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, StoredField>)) {
        let _guard = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let mut fields = self.read_fields();
        let now = Utc::now();
        fields.retain(|_, v| v.is_live(now));
        f(&mut fields);
        self.write_fields(&fields);
    }
}

impl CredentialBackend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_fields()
            .get(key)
            .filter(|f| f.is_live(Utc::now()))
            .map(|f| f.value.clone())
    }

    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) {
        self.update(|fields| {
            fields.insert(
                key.to_string(),
                StoredField {
                    value: value.to_string(),
                    expires_at,
                },
            );
        });
    }

    fn remove(&self, key: &str) {
        self.update(|fields| {
            fields.remove(key);
        });
    }
}

/// Snapshot of the client's session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<AuthUser>,
    pub original_user: Option<AuthUser>,
    pub is_impersonating: bool,
}

/// Holds the client's tokens, user and impersonation state.
pub struct CredentialStore {
    backend: Arc<dyn CredentialBackend>,
    cache: RwLock<ClientSession>,
    access_ttl: Duration,
    session_ttl: Duration,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn CredentialBackend>) -> Self {
        Self::with_ttls(backend, access_field_ttl(), session_field_ttl())
    }

    /// Store backed by [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn with_ttls(
        backend: Arc<dyn CredentialBackend>,
        access_ttl: Duration,
        session_ttl: Duration,
    ) -> Self {
        let store = Self {
            backend,
            cache: RwLock::new(ClientSession::default()),
            access_ttl,
            session_ttl,
        };
        let loaded = store.persisted();
        *store.cache.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        store
    }

    fn persisted(&self) -> ClientSession {
        ClientSession {
            access_token: self.backend.get(KEY_ACCESS),
            refresh_token: self.backend.get(KEY_REFRESH),
            user: self.read_user(KEY_USER),
            original_user: self.read_user(KEY_ORIGINAL_USER),
            is_impersonating: self.backend.get(KEY_IMPERSONATING).as_deref() == Some("true"),
        }
    }

    fn read_user(&self, key: &str) -> Option<AuthUser> {
        let raw = self.backend.get(key)?;
        serde_json::from_str(&raw).ok()
    }

    fn write_user(&self, key: &str, user: &AuthUser, expires_at: DateTime<Utc>) {
        match serde_json::to_string(user) {
            Ok(raw) => self.backend.set(key, &raw, expires_at),
            Err(e) => warn!("Failed to serialize user for {key}: {e}"),
        }
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut ClientSession) -> R) -> R {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut cache)
    }

    /// Persisted access token, if still live.
    pub fn access_token(&self) -> Option<String> {
        self.backend.get(KEY_ACCESS)
    }

    /// In-memory copy of the access token, which may outlive the persisted one.
    pub fn cached_access_token(&self) -> Option<String> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone()
    }

    /// Access token to send with a request. If the persisted field has
    /// expired while the in-memory copy lingers, the copy is purged and the
    /// caller is treated as anonymous.
    pub fn current_access_token(&self) -> Option<String> {
        let persisted = self.access_token();
        if persisted.is_none() && self.cached_access_token().is_some() {
            debug!("Access token expired locally, dropping cached copy");
            self.reset_access_token();
        }
        persisted
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.backend.get(KEY_REFRESH)
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.read_user(KEY_USER)
    }

    pub fn original_user(&self) -> Option<AuthUser> {
        self.read_user(KEY_ORIGINAL_USER)
    }

    pub fn is_impersonating(&self) -> bool {
        self.backend.get(KEY_IMPERSONATING).as_deref() == Some("true")
    }

    /// Current persisted state.
    pub fn snapshot(&self) -> ClientSession {
        self.persisted()
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str, expires_in: i64) {
        let now = Utc::now();
        let server_ttl = Duration::seconds(expires_in.max(0));
        let access_expires = now + self.access_ttl.min(server_ttl);
        self.backend.set(KEY_ACCESS, access_token, access_expires);
        self.backend
            .set(KEY_REFRESH, refresh_token, now + self.session_ttl);
        self.with_cache(|c| {
            c.access_token = Some(access_token.to_string());
            c.refresh_token = Some(refresh_token.to_string());
        });
    }

    /// Record a login, refresh or stop-impersonation response.
    pub fn set_session(&self, response: &TokenResponse) {
        self.set_tokens(
            &response.access_token,
            &response.refresh_token,
            response.expires_in,
        );
        let expires_at = Utc::now() + self.session_ttl;
        self.write_user(KEY_USER, &response.user, expires_at);
        self.with_cache(|c| c.user = Some(response.user.clone()));

        if response.impersonator_id.is_some() {
            self.backend.set(KEY_IMPERSONATING, "true", expires_at);
            self.with_cache(|c| c.is_impersonating = true);
        } else {
            self.stop_impersonation();
        }
    }

    /// Record an impersonation response.
    pub fn start_impersonation(&self, response: &ImpersonationResponse) {
        self.set_tokens(
            &response.access_token,
            &response.refresh_token,
            response.expires_in,
        );
        let expires_at = Utc::now() + self.session_ttl;
        self.write_user(KEY_USER, &response.impersonated_user, expires_at);
        self.write_user(KEY_ORIGINAL_USER, &response.original_user, expires_at);
        self.backend.set(KEY_IMPERSONATING, "true", expires_at);
        self.with_cache(|c| {
            c.user = Some(response.impersonated_user.clone());
            c.original_user = Some(response.original_user.clone());
            c.is_impersonating = true;
        });
    }

    /// Clear impersonation fields only.
    pub fn stop_impersonation(&self) {
        self.backend.remove(KEY_ORIGINAL_USER);
        self.backend.remove(KEY_IMPERSONATING);
        self.with_cache(|c| {
            c.original_user = None;
            c.is_impersonating = false;
        });
    }

    /// Clear the access token only.
    pub fn reset_access_token(&self) {
        self.backend.remove(KEY_ACCESS);
        self.with_cache(|c| c.access_token = None);
    }

    /// Clear everything (logout).
    pub fn reset(&self) {
        for key in [
            KEY_ACCESS,
            KEY_REFRESH,
            KEY_USER,
            KEY_ORIGINAL_USER,
            KEY_IMPERSONATING,
        ] {
            self.backend.remove(key);
        }
        self.with_cache(|c| *c = ClientSession::default());
    }
}
