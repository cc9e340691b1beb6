//! Credential storage.
//!
//! Two values make up the client's credentials: a long-lived API key issued
//! by enrollment and a short-lived CSRF token bound to the session cookie.
//! The user identifier is stored alongside so a rejected key can be
//! re-enrolled without asking the caller.
//!
//! Stores are shared by every in-flight request. Writes are last-write-wins:
//! both values can be re-derived from the backend, so a lost update costs at
//! most one extra enrollment or token fetch. The file store serializes its
//! disk writes so the file matches the in-memory state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use chatstream_core::UserId;

/// Storage for the client's credentials.
///
/// Implementations never validate the shape of what they store and never
/// fail: a value that cannot be read is reported as absent.
pub trait CredentialStore: Send + Sync {
    /// The stored API key, if any.
    fn key(&self) -> Option<String>;

    /// Store an API key.
    fn set_key(&self, key: &str);

    /// Remove the stored API key.
    fn clear_key(&self);

    /// The stored CSRF token, if any.
    fn csrf_token(&self) -> Option<String>;

    /// Store a CSRF token.
    fn set_csrf_token(&self, token: &str);

    /// Remove the stored CSRF token.
    fn clear_csrf_token(&self);

    /// The user the stored key was enrolled for, if known.
    fn user_id(&self) -> Option<UserId>;

    /// Remember the current user.
    fn set_user_id(&self, user_id: &UserId);
}

/// A snapshot of the stored credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Long-lived API key.
    pub api_key: Option<String>,
    /// Session-scoped CSRF token.
    pub csrf_token: Option<String>,
}

impl Credential {
    /// Read both values from a store.
    #[must_use]
    pub fn snapshot(store: &dyn CredentialStore) -> Self {
        Self {
            api_key: store.key(),
            csrf_token: store.csrf_token(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    api_key: Option<String>,
    csrf_token: Option<String>,
    user_id: Option<UserId>,
}

/// An in-memory credential store.
///
/// Nothing survives the process. Useful for tests and for embedding where
/// the host application owns persistence.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: RwLock<MemoryState>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds an API key.
    #[must_use]
    pub fn with_key(key: impl Into<String>) -> Self {
        let store = Self::new();
        store.state.write().api_key = Some(key.into());
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn key(&self) -> Option<String> {
        self.state.read().api_key.clone()
    }

    fn set_key(&self, key: &str) {
        self.state.write().api_key = Some(key.to_string());
    }

    fn clear_key(&self) {
        self.state.write().api_key = None;
    }

    fn csrf_token(&self) -> Option<String> {
        self.state.read().csrf_token.clone()
    }

    fn set_csrf_token(&self, token: &str) {
        self.state.write().csrf_token = Some(token.to_string());
    }

    fn clear_csrf_token(&self) {
        self.state.write().csrf_token = None;
    }

    fn user_id(&self) -> Option<UserId> {
        self.state.read().user_id.clone()
    }

    fn set_user_id(&self, user_id: &UserId) {
        self.state.write().user_id = Some(user_id.clone());
    }
}

/// The on-disk document of a [`FileCredentialStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
}

/// A credential store that persists long-lived values to a JSON file.
///
/// The API key and user ID are written to disk on every change. The CSRF
/// token is session-scoped and lives in memory only, so a new process always
/// starts by fetching a fresh one.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    persisted: RwLock<PersistedCredentials>,
    csrf_token: RwLock<Option<String>>,
}

impl FileCredentialStore {
    /// Open a store backed by `path`.
    ///
    /// A missing file starts an empty store. An unreadable or corrupt file is
    /// logged and treated as empty; it is overwritten on the next change.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let persisted = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt credential file");
                PersistedCredentials::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => PersistedCredentials::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read credential file");
                PersistedCredentials::default()
            }
        };

        Self {
            path,
            persisted: RwLock::new(persisted),
            csrf_token: RwLock::new(None),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a change and write the result while still holding the lock, so
    /// the file always ends up with the latest snapshot.
    fn update(&self, apply: impl FnOnce(&mut PersistedCredentials)) {
        let mut persisted = self.persisted.write();
        apply(&mut persisted);

        if let Err(e) = write_atomically(&self.path, &persisted) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist credentials");
        }
    }
}

fn write_atomically(path: &Path, credentials: &PersistedCredentials) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(credentials).map_err(io::Error::other)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn key(&self) -> Option<String> {
        self.persisted.read().api_key.clone()
    }

    fn set_key(&self, key: &str) {
        self.update(|c| c.api_key = Some(key.to_string()));
    }

    fn clear_key(&self) {
        self.update(|c| c.api_key = None);
    }

    fn csrf_token(&self) -> Option<String> {
        self.csrf_token.read().clone()
    }

    fn set_csrf_token(&self, token: &str) {
        *self.csrf_token.write() = Some(token.to_string());
    }

    fn clear_csrf_token(&self) {
        *self.csrf_token.write() = None;
    }

    fn user_id(&self) -> Option<UserId> {
        self.persisted.read().user_id.clone()
    }

    fn set_user_id(&self, user_id: &UserId) {
        if self.persisted.read().user_id.as_ref() == Some(user_id) {
            return;
        }
        self.update(|c| c.user_id = Some(user_id.clone()));
    }
}
