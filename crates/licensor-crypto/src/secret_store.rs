//! # Secret Store
//!
//! Private key material lives behind [`SecretStore`], addressed by an opaque
//! [`SecretHandle`]. Key records hold only the handle; nothing outside the
//! store ever serializes secret bytes.
//!
//! Backends:
//!
//! - [`InMemorySecretStore`]: process memory, zeroized on removal and drop.
//! - [`FileSecretStore`]: one base64 file per handle in a directory, with
//!   owner-only permissions on Unix.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use licensor_core::SecretStoreError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Opaque reference to a stored secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHandle(String);

impl SecretHandle {
    /// Allocate a fresh random handle.
    pub fn generate() -> Self {
        Self(format!("secret-{}", Uuid::new_v4().simple()))
    }

    /// The handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage backend for private key material.
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Read the secret stored under `handle`.
    fn get(&self, handle: &SecretHandle) -> Result<Zeroizing<Vec<u8>>, SecretStoreError>;

    /// Store `secret` under `handle`, replacing any previous value.
    fn set(&self, handle: &SecretHandle, secret: &[u8]) -> Result<(), SecretStoreError>;

    /// Remove the secret. Removing an absent handle succeeds.
    fn delete(&self, handle: &SecretHandle) -> Result<(), SecretStoreError>;

    /// Backend name for diagnostics.
    fn backend_name(&self) -> &str;
}

/// In-memory secret store.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<SecretHandle, Zeroizing<Vec<u8>>>>,
}

impl InMemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored secrets.
    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }
}

impl std::fmt::Debug for InMemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySecretStore")
            .field("secrets", &self.len())
            .finish()
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, handle: &SecretHandle) -> Result<Zeroizing<Vec<u8>>, SecretStoreError> {
        self.secrets
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| SecretStoreError::Missing(handle.to_string()))
    }

    fn set(&self, handle: &SecretHandle, secret: &[u8]) -> Result<(), SecretStoreError> {
        self.secrets
            .write()
            .insert(handle.clone(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn delete(&self, handle: &SecretHandle) -> Result<(), SecretStoreError> {
        self.secrets.write().remove(handle);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// File-backed secret store: `<dir>/<handle>.secret`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SecretStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, handle: &SecretHandle) -> Result<PathBuf, SecretStoreError> {
        let name = handle.as_str();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(SecretStoreError::Backend(format!(
                "handle {name:?} is not a valid file name"
            )));
        }
        Ok(self.dir.join(format!("{name}.secret")))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, handle: &SecretHandle) -> Result<Zeroizing<Vec<u8>>, SecretStoreError> {
        let path = self.path_for(handle)?;
        let encoded = match std::fs::read_to_string(&path) {
            Ok(s) => Zeroizing::new(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SecretStoreError::Missing(handle.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        STANDARD
            .decode(encoded.trim())
            .map(Zeroizing::new)
            .map_err(|e| SecretStoreError::Backend(format!("corrupt secret {handle}: {e}")))
    }

    fn set(&self, handle: &SecretHandle, secret: &[u8]) -> Result<(), SecretStoreError> {
        let path = self.path_for(handle)?;
        let encoded = Zeroizing::new(STANDARD.encode(secret));
        let mut file = create_owner_only(&path)?;
        file.write_all(encoded.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn delete(&self, handle: &SecretHandle) -> Result<(), SecretStoreError> {
        let path = self.path_for(handle)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

/// Open `path` for writing with mode 0600 from the moment it exists.
/// An existing file is tightened before anything is written to it.
#[cfg(unix)]
fn create_owner_only(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_owner_only(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}
