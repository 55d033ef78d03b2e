//! Credential persistence.
//!
//! DESIGN
//! ======
//! The access/refresh pair is the only durable client state. Every backend
//! writes both tokens under one lock so readers never observe a pair where
//! only one half was updated. `FileStore` additionally writes through a temp
//! file and renames it into place, so a crash mid-write leaves the previous
//! pair intact.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

// =============================================================================
// CREDENTIAL PAIR
// =============================================================================

/// Access and refresh tokens issued together by the API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

impl CredentialPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }
}

// Tokens never reach logs through `{:?}`.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing storage could not be read or written.
    #[error("credential storage unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Durable key-value persistence of the [`CredentialPair`].
pub trait CredentialStore: Send + Sync {
    /// Overwrite both tokens.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the backend cannot be written.
    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError>;

    /// Current pair, or `None` if never set or cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the backend cannot be read.
    fn load(&self) -> Result<Option<CredentialPair>, StoreError>;

    /// Remove both tokens.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the backend cannot be written.
    fn clear(&self) -> Result<(), StoreError>;

    /// Replace the access token (and the refresh token when the server rotated
    /// it) in one step, but only while the stored refresh token is still
    /// `exchanged_refresh`. Returns the stored pair, or `None` when the store
    /// was cleared or re-populated in the meantime, in which case nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the backend cannot be accessed.
    fn update_access(
        &self,
        exchanged_refresh: &str,
        access: &str,
        rotated_refresh: Option<&str>,
    ) -> Result<Option<CredentialPair>, StoreError>;

    /// Remove both tokens if the stored refresh token is still `refresh_token`.
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the backend cannot be accessed.
    fn clear_if_current(&self, refresh_token: &str) -> Result<bool, StoreError>;
}

/// Read the pair, treating an unavailable backend as "absent".
pub(crate) fn load_or_absent(store: &dyn CredentialStore) -> Option<CredentialPair> {
    match store.load() {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "credential store unreadable; treating as signed out");
            None
        }
    }
}

fn apply_update(
    current: Option<&CredentialPair>,
    exchanged_refresh: &str,
    access: &str,
    rotated_refresh: Option<&str>,
) -> Option<CredentialPair> {
    current
        .filter(|pair| pair.refresh_token == exchanged_refresh)
        .map(|pair| CredentialPair {
            access_token: access.to_owned(),
            refresh_token: rotated_refresh.map_or_else(|| pair.refresh_token.clone(), str::to_owned),
        })
}

fn holds_refresh(current: Option<&CredentialPair>, refresh_token: &str) -> bool {
    current.is_some_and(|pair| pair.refresh_token == refresh_token)
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Process-lifetime store, used by tests and embedders with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pair: Mutex<Option<CredentialPair>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self { pair: Mutex::new(Some(pair)) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<CredentialPair>>, StoreError> {
        self.pair
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl CredentialStore for MemoryStore {
    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        *self.lock()? = Some(pair.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.lock()? = None;
        Ok(())
    }

    fn update_access(
        &self,
        exchanged_refresh: &str,
        access: &str,
        rotated_refresh: Option<&str>,
    ) -> Result<Option<CredentialPair>, StoreError> {
        let mut guard = self.lock()?;
        let updated = apply_update(guard.as_ref(), exchanged_refresh, access, rotated_refresh);
        if let Some(pair) = &updated {
            *guard = Some(pair.clone());
        }
        Ok(updated)
    }

    fn clear_if_current(&self, refresh_token: &str) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        if !holds_refresh(guard.as_ref(), refresh_token) {
            return Ok(false);
        }
        *guard = None;
        Ok(true)
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// JSON file store: `{"accessToken": "...", "refreshToken": "..."}`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.lock
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".into()))
    }

    fn read(&self) -> Result<Option<CredentialPair>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&self.path, &e)),
        };
        // A half-populated or corrupt document is not a valid pair.
        match serde_json::from_str::<CredentialPair>(&raw) {
            Ok(pair) if !pair.access_token.is_empty() && !pair.refresh_token.is_empty() => Ok(Some(pair)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring malformed credentials file");
                Ok(None)
            }
        }
    }

    fn write(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(parent, &e))?;
        }
        let json = serde_json::to_vec_pretty(pair).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let tmp = self.path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, json).map_err(|e| unavailable(&tmp, &e))?;
        restrict_permissions(&tmp);
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            unavailable(&self.path, &e)
        })
    }

    fn remove(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&self.path, &e)),
        }
    }
}

impl CredentialStore for FileStore {
    fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        self.write(pair)
    }

    fn load(&self) -> Result<Option<CredentialPair>, StoreError> {
        let _guard = self.guard()?;
        self.read()
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        self.remove()
    }

    fn update_access(
        &self,
        exchanged_refresh: &str,
        access: &str,
        rotated_refresh: Option<&str>,
    ) -> Result<Option<CredentialPair>, StoreError> {
        let _guard = self.guard()?;
        let updated = apply_update(self.read()?.as_ref(), exchanged_refresh, access, rotated_refresh);
        if let Some(pair) = &updated {
            self.write(pair)?;
        }
        Ok(updated)
    }

    fn clear_if_current(&self, refresh_token: &str) -> Result<bool, StoreError> {
        let _guard = self.guard()?;
        if !holds_refresh(self.read()?.as_ref(), refresh_token) {
            return Ok(false);
        }
        self.remove()?;
        Ok(true)
    }
}

fn unavailable(path: &Path, e: &std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {e}", path.display()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::debug!(path = %path.display(), error = %e, "could not restrict credentials file mode");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
