//! Signed-in operator session.
//!
//! Holds the current user and the Basic token derived at sign-in. A store may
//! be backed by a JSON file so the session survives restarts and can be
//! shared with other processes through [`SessionStore::reload`].

use crate::error::SessionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

static GLOBAL: OnceLock<SessionStore> = OnceLock::new();

/// User ids arrive either as numbers or as strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(id) => write!(f, "{}", id),
            UserId::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    /// The backing file changed underneath the store
    Reloaded,
}

pub type SubscriptionId = Uuid;

type Callback = Arc<dyn Fn(&SessionEvent, Option<&UserRecord>) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredSession {
    user: UserRecord,
    token: String,
    signed_in_at: DateTime<Utc>,
}

pub struct SessionStore {
    session: RwLock<Option<StoredSession>>,
    storage: Option<PathBuf>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl SessionStore {
    /// In-memory store
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            storage: None,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// File-backed store, loading any session already saved at `path`
    pub fn with_storage(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = load_session(&path);
        if let Some(session) = &session {
            info!("Restored session for {} from {}", session.user.email, path.display());
        }
        Self {
            session: RwLock::new(session),
            storage: Some(path),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Process-wide store; in-memory unless [`SessionStore::init_global`] ran first
    pub fn global() -> &'static SessionStore {
        GLOBAL.get_or_init(SessionStore::new)
    }

    /// Initialize the process-wide store. Has no effect once it exists.
    pub fn init_global(storage: Option<PathBuf>) -> &'static SessionStore {
        GLOBAL.get_or_init(|| match storage {
            Some(path) => SessionStore::with_storage(path),
            None => SessionStore::new(),
        })
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    pub fn sign_in(
        &self,
        user: UserRecord,
        email: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let session = StoredSession {
            user,
            token: basic_token(email, password),
            signed_in_at: Utc::now(),
        };
        info!("Signed in as {} ({:?})", session.user.email, session.user.role);

        let persisted = self.persist(Some(&session));
        *self.session.write() = Some(session);
        self.notify(SessionEvent::SignedIn);
        persisted
    }

    /// Clear the session; returns false if nobody was signed in
    pub fn sign_out(&self) -> Result<bool, SessionError> {
        let Some(session) = self.session.write().take() else {
            return Ok(false);
        };
        info!("Signed out {}", session.user.email);

        let persisted = self.persist(None);
        self.notify(SessionEvent::SignedOut);
        persisted.map(|_| true)
    }

    /// Re-read the backing file; returns true and notifies when it changed
    pub fn reload(&self) -> bool {
        let Some(path) = &self.storage else {
            return false;
        };
        let loaded = load_session(path);

        let changed = {
            let mut session = self.session.write();
            if *session == loaded {
                false
            } else {
                *session = loaded;
                true
            }
        };
        if changed {
            debug!("Session reloaded from {}", path.display());
            self.notify(SessionEvent::Reloaded);
        }
        changed
    }

    pub fn token(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.token.clone())
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.session.read().as_ref().map(|s| s.user.clone())
    }

    pub fn signed_in_at(&self) -> Option<DateTime<Utc>> {
        self.session.read().as_ref().map(|s| s.signed_in_at)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    /// `Basic <token>` for API requests
    pub fn authorization_header(&self) -> Result<String, SessionError> {
        self.token()
            .map(|token| format!("Basic {}", token))
            .ok_or(SessionError::NotAuthenticated)
    }

    /// Register a callback run after every session change with the new user
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent, Option<&UserRecord>) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(subscription, _)| *subscription != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify(&self, event: SessionEvent) {
        // Callbacks may call back into the store
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        let user = self.current_user();
        for callback in callbacks {
            callback(&event, user.as_ref());
        }
    }

    fn persist(&self, session: Option<&StoredSession>) -> Result<(), SessionError> {
        let Some(path) = &self.storage else {
            return Ok(());
        };
        let storage_error = |details: String| SessionError::Storage {
            path: path.display().to_string(),
            details,
        };

        match session {
            Some(session) => {
                let json = serde_json::to_string_pretty(session)
                    .map_err(|e| storage_error(e.to_string()))?;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| storage_error(e.to_string()))?;
                }
                std::fs::write(path, json).map_err(|e| storage_error(e.to_string()))
            }
            None => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(storage_error(e.to_string())),
            },
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// base64 of `email:password`
pub fn basic_token(email: &str, password: &str) -> String {
    STANDARD.encode(format!("{}:{}", email, password))
}

/// Missing or unreadable session files mean nobody is signed in
fn load_session(path: &Path) -> Option<StoredSession> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read session file {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Ignoring corrupt session file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn operator() -> UserRecord {
        UserRecord {
            id: UserId::Number(7),
            email: "guard@gate.local".to_string(),
            role: UserRole::Operator,
        }
    }

    #[test]
    fn test_basic_token() {
        assert_eq!(basic_token("a@b.c", "pw"), "YUBiLmM6cHc=");
    }

    #[test]
    fn test_sign_in_and_out() {
        let store = SessionStore::new();
        assert!(!store.is_authenticated());
        assert!(matches!(
            store.authorization_header(),
            Err(SessionError::NotAuthenticated)
        ));

        store.sign_in(operator(), "a@b.c", "pw").unwrap();
        assert!(store.is_authenticated());
        assert_eq!(store.token().as_deref(), Some("YUBiLmM6cHc="));
        assert_eq!(store.authorization_header().unwrap(), "Basic YUBiLmM6cHc=");
        assert_eq!(store.current_user(), Some(operator()));
        assert!(store.signed_in_at().is_some());

        assert!(store.sign_out().unwrap());
        assert!(!store.is_authenticated());
        assert!(store.token().is_none());
        assert!(!store.sign_out().unwrap());
    }

    #[test]
    fn test_subscribers_see_changes() {
        let store = SessionStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |event, user| {
            sink.lock().push((event.clone(), user.map(|u| u.email.clone())));
        });

        store.sign_in(operator(), "a@b.c", "pw").unwrap();
        store.sign_out().unwrap();
        // No session: nothing to announce
        store.sign_out().unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (SessionEvent::SignedIn, Some("guard@gate.local".to_string())),
                (SessionEvent::SignedOut, None),
            ]
        );

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.sign_in(operator(), "a@b.c", "pw").unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_callback_may_read_store() {
        let store = Arc::new(SessionStore::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&store);
        let counter = Arc::clone(&calls);
        store.subscribe(move |_, _| {
            assert!(inner.is_authenticated());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.sign_in(operator(), "a@b.c", "pw").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_backed_session_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("session.json");

        let store = SessionStore::with_storage(&path);
        store.sign_in(operator(), "a@b.c", "pw").unwrap();
        assert!(path.exists());

        let restored = SessionStore::with_storage(&path);
        assert_eq!(restored.current_user(), Some(operator()));
        assert_eq!(restored.token(), store.token());

        restored.sign_out().unwrap();
        assert!(!path.exists());
        assert!(!SessionStore::with_storage(&path).is_authenticated());
    }

    #[test]
    fn test_corrupt_file_means_no_session() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SessionStore::with_storage(&path);
        assert!(!store.is_authenticated());
        assert!(store.current_user().is_none());
    }

    #[test]
    fn test_reload_picks_up_other_writer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");

        let reader = SessionStore::with_storage(&path);
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        reader.subscribe(move |event, _| {
            assert_eq!(*event, SessionEvent::Reloaded);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!reader.reload());

        let writer = SessionStore::with_storage(&path);
        writer.sign_in(operator(), "a@b.c", "pw").unwrap();
        assert!(reader.reload());
        assert!(reader.is_authenticated());
        assert!(!reader.reload());

        writer.sign_out().unwrap();
        assert!(reader.reload());
        assert!(!reader.is_authenticated());
        assert_eq!(events.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_user_record_json() {
        let user: UserRecord =
            serde_json::from_str(r#"{"id": "u-1", "email": "x@y.z", "role": "admin"}"#).unwrap();
        assert_eq!(user.id, UserId::Text("u-1".to_string()));
        assert_eq!(user.role, UserRole::Admin);
        assert_eq!(user.id.to_string(), "u-1");

        let user: UserRecord =
            serde_json::from_str(r#"{"id": 3, "email": "x@y.z", "role": "operator"}"#).unwrap();
        assert_eq!(user.id, UserId::Number(3));
    }

    #[test]
    fn test_global_store_is_shared() {
        assert!(std::ptr::eq(SessionStore::global(), SessionStore::global()));
    }
}
