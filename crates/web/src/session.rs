//! Server-side sessions keyed by an opaque id carried in a cookie.
//!
//! A [`SessionStore`] resolves the session of an incoming request from its cookies and,
//! once the handler answered, folds the handler's session updates back into storage.
//! Storage itself sits behind the [`SessionBackend`] trait:
//!
//! - [`FileSessionBackend`]: one `session_<id>.txt` file per session, `key=value` lines
//! - [`MemorySessionBackend`]: in-process map, mostly useful for tests and demos
//!
//! Concurrent merges into the same session are serialized by a per-id async lock, so
//! two requests updating different keys of one session never lose each other's writes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ember_http::cookie::{Cookie, SameSite};
use ember_http::{random_token, DEFAULT_TOKEN_LEN};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::response::Response;

mod file_backend;
mod memory_backend;

pub use file_backend::FileSessionBackend;
pub use memory_backend::MemorySessionBackend;

pub type SessionMap = HashMap<String, String>;

/// Persistent storage for session records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Loads the record for `session_id`, `Ok(None)` if there is none.
    async fn read(&self, session_id: &str) -> Result<Option<SessionMap>, SessionError>;

    /// Replaces the record for `session_id` with `session`.
    async fn write(&self, session_id: &str, session: &SessionMap) -> Result<(), SessionError>;
}

/// The session state of one request, decided before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResolution {
    /// sessions are disabled for this server
    Disabled,
    /// no session cookie was presented
    Absent,
    /// a session cookie was presented but no record backs it
    Invalid,
    Valid { id: String, data: SessionMap },
}

impl SessionResolution {
    pub fn id(&self) -> Option<&str> {
        match self {
            SessionResolution::Valid { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Removes characters that could escape the session directory.
pub fn sanitize_session_id(raw: &str) -> String {
    raw.chars().filter(|c| *c != '/').collect()
}

pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    enabled: bool,
    cookie_name: String,
    associated_cookies: Vec<String>,
    secure: bool,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("enabled", &self.enabled)
            .field("cookie_name", &self.cookie_name)
            .field("associated_cookies", &self.associated_cookies)
            .field("secure", &self.secure)
            .field("locked_ids", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, config: &ServerConfig) -> Self {
        Self {
            backend,
            enabled: config.enable_session,
            cookie_name: config.session_cookie_name.clone(),
            associated_cookies: config.associated_session_cookies.clone(),
            secure: config.session_is_secure,
            locks: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Resolves the session presented by `cookies`.
    ///
    /// When the presented session is invalid, the session cookie and all associated
    /// cookies are removed from `cookies` so the handler never sees them. A failing
    /// backend read is treated like a missing record.
    pub async fn resolve(&self, cookies: &mut Vec<Cookie>) -> SessionResolution {
        if !self.enabled {
            return SessionResolution::Disabled;
        }

        let Some(presented) = cookies.iter().find(|c| c.name == self.cookie_name && !c.value.is_empty()) else {
            return SessionResolution::Absent;
        };
        let id = sanitize_session_id(&presented.value);

        let record = if id.is_empty() {
            None
        } else {
            match self.backend.read(&id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(cause = %e, "can't read session, treating it as absent");
                    None
                }
            }
        };

        match record {
            Some(data) => SessionResolution::Valid { id, data },
            None => {
                debug!("presented session has no record");
                cookies.retain(|c| c.name != self.cookie_name && !self.associated_cookies.contains(&c.name));
                SessionResolution::Invalid
            }
        }
    }

    /// Persists the session side of `response` according to `resolution`.
    ///
    /// A valid session receives the response's updates. Otherwise a session is created:
    /// its id is taken from a session cookie the handler set itself, or freshly minted and
    /// added to the response as an `HttpOnly`, `SameSite=Strict` cookie. An invalid session
    /// additionally has its associated cookies deleted on the client.
    pub async fn finalize(&self, resolution: SessionResolution, response: &mut Response) -> Result<(), SessionError> {
        let id = match resolution {
            SessionResolution::Disabled => return Ok(()),
            SessionResolution::Valid { id, .. } => id,
            SessionResolution::Absent => self.establish(response),
            SessionResolution::Invalid => {
                for name in &self.associated_cookies {
                    response.push_delete_cookie(name.clone());
                }
                self.establish(response)
            }
        };

        self.merge(&id, response.session_updates()).await?;
        Ok(())
    }

    fn establish(&self, response: &mut Response) -> String {
        if let Some(cookie) = response.cookies().iter().find(|c| c.name == self.cookie_name) {
            let id = sanitize_session_id(&cookie.value);
            if !id.is_empty() {
                return id;
            }
        }

        let id = Self::mint_id();
        response.push_cookie(
            Cookie::new(self.cookie_name.clone(), id.clone())
                .path("/")
                .http_only(true)
                .secure(self.secure)
                .same_site(Some(SameSite::Strict)),
        );
        id
    }

    /// Overlays `updates` onto the stored record of `session_id` and returns the result.
    ///
    /// Missing records start out empty.
    pub async fn merge(&self, session_id: &str, updates: &SessionMap) -> Result<SessionMap, SessionError> {
        let lock = self.lock_for(session_id);
        let merged = {
            let _guard = lock.lock().await;
            self.merge_locked(session_id, updates).await
        };
        drop(lock);
        self.locks.remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
        merged
    }

    async fn merge_locked(&self, session_id: &str, updates: &SessionMap) -> Result<SessionMap, SessionError> {
        let mut record = self.backend.read(session_id).await?.unwrap_or_default();
        for (key, value) in updates {
            record.insert(key.clone(), value.clone());
        }
        self.backend.write(session_id, &record).await?;
        Ok(record)
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(session_id.to_string()).or_default().value())
    }

    pub fn mint_id() -> String {
        random_token(DEFAULT_TOKEN_LEN)
    }
}
