//! Durable credential storage.
//!
//! Stores the session in `<base>/session.json` with restricted permissions (0600)
//! under three keys: `access_token`, `refresh_token` and `current_user`. The keys
//! are written together and cleared together. Tokens are never logged.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::identity::Identity;
use crate::config::paths;

/// Access/refresh token pair issued by the identity service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    /// Empty when the service issued no refresh token.
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// On-disk layout.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_user: Option<Identity>,
}

impl StoredSession {
    fn credential(&self) -> Option<Credential> {
        let access = self.access_token.as_deref().filter(|t| !t.is_empty())?;
        Some(Credential::new(
            access,
            self.refresh_token.clone().unwrap_or_default(),
        ))
    }
}

/// Holder of the current credential pair and the identity snapshot derived from it.
///
/// Only `AuthSession` writes it, so every change is published to subscribers.
///
/// Writes hit the disk before the in-memory value changes, and the whole
/// operation runs under the write lock: once `set`/`clear` returns, every reader
/// sees the new value, and no reader ever sees half of a pair.
#[derive(Debug)]
pub struct TokenStore {
    path: Option<PathBuf>,
    state: RwLock<StoredSession>,
}

impl TokenStore {
    /// Opens the store at the default location.
    ///
    /// # Errors
    /// Returns an error if an existing session file cannot be read or parsed.
    pub fn open_default() -> Result<Self> {
        Self::open(paths::session_path())
    }

    /// Opens the store backed by `path`. A missing file is an empty store.
    ///
    /// # Errors
    /// Returns an error if an existing session file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read session from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse session from {}", path.display()))?
        } else {
            StoredSession::default()
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(StoredSession::default()),
        }
    }

    /// An in-memory store seeded with `credential`.
    pub fn preloaded(credential: Credential) -> Self {
        let store = Self::in_memory();
        *store.write() = StoredSession {
            access_token: Some(credential.access_token),
            refresh_token: Some(credential.refresh_token).filter(|token| !token.is_empty()),
            current_user: None,
        };
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the current credential, if any.
    pub fn get(&self) -> Option<Credential> {
        self.read().credential()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read()
            .access_token
            .clone()
            .filter(|token| !token.is_empty())
    }

    /// The identity snapshot written alongside the current credential.
    pub fn cached_identity(&self) -> Option<Identity> {
        self.read().current_user.clone()
    }

    /// Replaces the credential (and identity snapshot) atomically.
    ///
    /// # Errors
    /// Returns an error if the session file cannot be written; the previous
    /// value stays in place.
    pub(crate) fn set(&self, credential: &Credential, identity: Option<&Identity>) -> Result<()> {
        let next = StoredSession {
            access_token: Some(credential.access_token.clone()),
            refresh_token: Some(credential.refresh_token.clone())
                .filter(|token| !token.is_empty()),
            current_user: identity.cloned(),
        };

        let mut state = self.write();
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *state = next;
        Ok(())
    }

    /// Removes all three keys.
    ///
    /// Memory is cleared even when deleting the file fails, so the process
    /// never keeps using a credential it was told to drop.
    ///
    /// # Errors
    /// Returns an error if the session file exists but cannot be removed.
    pub(crate) fn clear(&self) -> Result<()> {
        let mut state = self.write();
        *state = StoredSession::default();

        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
                }
            }
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoredSession> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoredSession> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writes the session through a temp file in the same directory, then renames
/// it over the target.
fn persist(path: &Path, session: &StoredSession) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;

    let contents = serde_json::to_string_pretty(session).context("Failed to serialize session")?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", tmp.path().display()))?;
    }

    tmp.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}
