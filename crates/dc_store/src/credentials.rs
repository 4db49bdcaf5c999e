//! Credential backends for the serialized identity.
//!
//! | Backend               | Protection                                        |
//! |-----------------------|---------------------------------------------------|
//! | `KeyringCredentials`  | OS keychain / Secret Service / Credential Manager |
//! | `FileCredentials`     | a plain file, mode 0600 on unix. WEAKER: anyone    |
//! |                       | who can read the file as this user has the key.   |
//! | `MemoryCredentials`   | process memory only; tests and throwaway sessions |
//!
//! Backends store opaque bytes. They know nothing about identities.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use dc_crypto::encoding;
use keyring::Entry;
use parking_lot::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::StoreError;

pub const SERVICE_NAME: &str = "DarklockCourier";
pub const DEFAULT_ACCOUNT: &str = "identity";

pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError>;

    /// Replaces whatever was stored before.
    fn write(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Removing an absent credential is not an error.
    fn clear(&self) -> Result<(), StoreError>;

    /// Short backend name for logs and `whoami`.
    fn describe(&self) -> &'static str;

    /// False for backends that do not use a platform-protected store.
    fn is_protected(&self) -> bool;
}

// ── OS keyring ───────────────────────────────────────────────────────────────

pub struct KeyringCredentials {
    account: String,
}

impl KeyringCredentials {
    pub fn new(account: impl Into<String>) -> Self {
        Self { account: account.into() }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Entry::new(SERVICE_NAME, &self.account)
            .map_err(|e| StoreError::Credential(format!("keyring init: {e}")))
    }
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT)
    }
}

impl CredentialStore for KeyringCredentials {
    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        let encoded = match self.entry()?.get_password() {
            Ok(s) => Zeroizing::new(s),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(StoreError::Credential(format!("load identity: {e}"))),
        };
        let decoded = encoding::decode(&encoded)?;
        Ok(Some(Zeroizing::new(decoded)))
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let encoded = Zeroizing::new(encoding::encode(bytes));
        self.entry()?
            .set_password(&encoded)
            .map_err(|e| StoreError::Credential(format!("store identity: {e}")))?;
        debug!(event = "credential_written", backend = "keyring", account = %self.account);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Credential(format!("delete identity: {e}"))),
        }
    }

    fn describe(&self) -> &'static str {
        "keyring"
    }

    fn is_protected(&self) -> bool {
        true
    }
}

// ── Plain file (best effort) ─────────────────────────────────────────────────

pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentials {
    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes to a sibling temp file and renames over the target, so a crash
    /// mid-write never leaves a truncated identity behind.
    fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = open_private(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(event = "credential_written", backend = "file", path = %self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> &'static str {
        "file"
    }

    fn is_protected(&self) -> bool {
        false
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCredentials {
    slot: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentials {
    fn read(&self) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        Ok(self.slot.lock().clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        *self.slot.lock() = Some(Zeroizing::new(bytes.to_vec()));
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock() = None;
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "memory"
    }

    fn is_protected(&self) -> bool {
        false
    }
}
