//! IdentityStore: the one long-term identity held by this device.
//!
//! Serialized form (inside whatever `CredentialStore` is configured):
//!
//! ```json
//! { "version": 1, "handle": "alice", "publicKey": "<b64>", "secretKey": "<b64>" }
//! ```
//!
//! `create` and `import_sealed` OVERWRITE the stored identity. Callers must
//! treat them as destructive to whatever identity was there before.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::{Zeroize, Zeroizing};

use dc_crypto::{
    encoding,
    kdf::KdfParams,
    sealed::{open_with_passphrase, seal_with_passphrase},
    Fingerprint, KeyPair, PublicKey, SealedBlob, SecretKey,
};
use dc_proto::Handle;

use crate::{credentials::CredentialStore, error::StoreError};

pub const IDENTITY_VERSION: u8 = 1;

/// Handle plus key-agreement keypair. The secret half zeroizes on drop.
#[derive(Clone)]
pub struct Identity {
    handle: Handle,
    keypair: KeyPair,
}

impl Identity {
    pub fn new(handle: Handle, keypair: KeyPair) -> Self {
        Self { handle, keypair }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    pub fn secret(&self) -> &SecretKey {
        self.keypair.secret()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.keypair.public.fingerprint()
    }

    fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            version: IDENTITY_VERSION,
            handle: self.handle.as_str().to_string(),
            public_key: self.keypair.public.to_b64(),
            secret_key: encoding::encode(self.keypair.secret().as_bytes()),
        }
    }

    fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let stored = self.to_stored();
        Ok(Zeroizing::new(serde_json::to_vec(&stored)?))
    }

    /// Parses and cross-checks a serialized identity. The stored public key
    /// must match the one derived from the secret.
    fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let stored: StoredIdentity = serde_json::from_slice(bytes)?;
        if stored.version != IDENTITY_VERSION {
            return Err(StoreError::UnsupportedVersion(stored.version));
        }
        let handle = Handle::parse(&stored.handle)?;
        let secret_bytes = Zeroizing::new(encoding::decode(&stored.secret_key)?);
        let keypair = KeyPair::from_secret(SecretKey::from_bytes(&secret_bytes)?)?;
        let public = PublicKey::from_b64(&stored.public_key)?;
        if public != keypair.public {
            return Err(StoreError::Corrupt("public key does not match secret key".into()));
        }
        Ok(Self { handle, keypair })
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("handle", &self.handle)
            .field("public", &self.keypair.public)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    version: u8,
    handle: String,
    public_key: String,
    secret_key: String,
}

impl Drop for StoredIdentity {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct IdentityStore {
    backend: Arc<dyn CredentialStore>,
    kdf: KdfParams,
}

impl IdentityStore {
    pub fn new(backend: Arc<dyn CredentialStore>) -> Self {
        Self { backend, kdf: KdfParams::default() }
    }

    /// Overrides the passphrase KDF cost for future exports. Imports always
    /// use the parameters recorded in the blob.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn backend(&self) -> &dyn CredentialStore {
        self.backend.as_ref()
    }

    /// Generates a fresh keypair for `handle` and persists it, replacing any
    /// existing identity.
    pub fn create(&self, handle: &str) -> Result<Identity, StoreError> {
        let handle = Handle::parse(handle)?;
        let identity = Identity::new(handle, KeyPair::generate()?);
        self.persist(&identity)?;
        info!(
            event = "identity_created",
            handle = %identity.handle,
            fingerprint = %identity.fingerprint(),
            backend = self.backend.describe()
        );
        Ok(identity)
    }

    pub fn load(&self) -> Result<Option<Identity>, StoreError> {
        match self.backend.read()? {
            Some(bytes) => Identity::from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// `load`, mapping absence to `StoreError::NoIdentity`.
    pub fn require(&self) -> Result<Identity, StoreError> {
        self.load()?.ok_or(StoreError::NoIdentity)
    }

    /// Loads the stored identity, or creates one for `handle` if none exists.
    /// An existing identity is returned as-is even if its handle differs.
    pub fn load_or_create(&self, handle: &str) -> Result<Identity, StoreError> {
        if let Some(identity) = self.load()? {
            if identity.handle.as_str() != dc_proto::normalize_handle(handle) {
                warn!(
                    event = "identity_handle_mismatch",
                    stored = %identity.handle,
                    requested = %dc_proto::normalize_handle(handle)
                );
            }
            return Ok(identity);
        }
        self.create(handle)
    }

    pub fn export_sealed(&self, identity: &Identity, passphrase: &[u8]) -> Result<SealedBlob, StoreError> {
        let bytes = identity.to_bytes()?;
        Ok(seal_with_passphrase(&bytes, passphrase, self.kdf)?)
    }

    /// Opens `blob` and persists the identity inside it. On any failure
    /// (wrong passphrase, corrupt blob, malformed content) the stored
    /// identity is left untouched.
    pub fn import_sealed(&self, blob: &SealedBlob, passphrase: &[u8]) -> Result<Identity, StoreError> {
        let bytes = open_with_passphrase(blob, passphrase)?;
        let identity = Identity::from_bytes(&bytes)?;
        self.persist(&identity)?;
        info!(
            event = "identity_imported",
            handle = %identity.handle,
            fingerprint = %identity.fingerprint()
        );
        Ok(identity)
    }

    /// Destroys the stored identity (logout / reset).
    pub fn reset(&self) -> Result<(), StoreError> {
        self.backend.clear()?;
        info!(event = "identity_reset", backend = self.backend.describe());
        Ok(())
    }

    fn persist(&self, identity: &Identity) -> Result<(), StoreError> {
        if !self.backend.is_protected() {
            warn!(
                event = "identity_unprotected_backend",
                backend = self.backend.describe(),
                "identity secret stored outside the platform credential store"
            );
        }
        self.backend.write(&identity.to_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{FileCredentials, MemoryCredentials};
    use dc_crypto::CryptoError;

    fn fast() -> KdfParams {
        KdfParams { memory_kib: 1024, iterations: 1, parallelism: 1 }
    }

    fn store() -> IdentityStore {
        IdentityStore::new(Arc::new(MemoryCredentials::new())).with_kdf_params(fast())
    }

    #[test]
    fn create_then_load_returns_same_identity() {
        let s = store();
        assert!(s.load().unwrap().is_none());
        let created = s.create("  Alice ").unwrap();
        assert_eq!(created.handle().as_str(), "alice");

        let loaded = s.load().unwrap().unwrap();
        assert_eq!(loaded.public_key(), created.public_key());
        assert_eq!(loaded.secret().as_bytes(), created.secret().as_bytes());
    }

    #[test]
    fn create_overwrites_previous_identity() {
        let s = store();
        let first = s.create("alice").unwrap();
        let second = s.create("alice").unwrap();
        assert_ne!(first.public_key(), second.public_key());
        assert_eq!(s.require().unwrap().public_key(), second.public_key());
    }

    #[test]
    fn empty_handle_is_rejected() {
        assert!(matches!(store().create("  "), Err(StoreError::Handle(_))));
    }

    #[test]
    fn export_import_moves_identity_between_devices() {
        let phone = store();
        let original = phone.create("alice").unwrap();
        let blob = phone.export_sealed(&original, b"correct horse").unwrap();

        let laptop = store();
        let imported = laptop.import_sealed(&blob, b"correct horse").unwrap();
        assert_eq!(imported.public_key(), original.public_key());
        assert_eq!(laptop.require().unwrap().handle().as_str(), "alice");
    }

    #[test]
    fn wrong_passphrase_leaves_existing_identity_untouched() {
        let source = store();
        let blob = source.export_sealed(&source.create("alice").unwrap(), b"right").unwrap();

        let target = store();
        let existing = target.create("bob").unwrap();
        let err = target.import_sealed(&blob, b"wrong").unwrap_err();
        assert!(matches!(err, StoreError::Crypto(CryptoError::AeadDecrypt)));
        assert_eq!(target.require().unwrap().public_key(), existing.public_key());
    }

    #[test]
    fn reset_destroys_identity() {
        let s = store();
        s.create("alice").unwrap();
        s.reset().unwrap();
        assert!(matches!(s.require(), Err(StoreError::NoIdentity)));
    }

    #[test]
    fn load_or_create_is_stable() {
        let s = store();
        let a = s.load_or_create("alice").unwrap();
        let b = s.load_or_create("alice").unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn tampered_public_key_is_detected() {
        let backend = Arc::new(MemoryCredentials::new());
        let s = IdentityStore::new(backend.clone());
        s.create("alice").unwrap();

        let other = KeyPair::generate().unwrap();
        let raw = backend.read().unwrap().unwrap();
        let mut json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        json["publicKey"] = serde_json::Value::String(other.public.to_b64());
        backend.write(&serde_json::to_vec(&json).unwrap()).unwrap();

        assert!(matches!(s.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn file_backend_persists_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let created = IdentityStore::new(Arc::new(FileCredentials::new(&path))).create("carol").unwrap();
        let loaded = IdentityStore::new(Arc::new(FileCredentials::new(&path))).require().unwrap();
        assert_eq!(loaded.public_key(), created.public_key());
    }
}
