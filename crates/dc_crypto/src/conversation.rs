//! Per-peer conversation crypto.
//!
//! key = HKDF-SHA256(X25519(my_secret, peer_public))
//!
//! Both sides of a pairing compute the same key, so one key covers both
//! directions of a conversation. Every message gets a fresh random 24-byte
//! nonce; with XChaCha20-Poly1305 random nonces are safe for the lifetime of
//! a fixed key.
//!
//! This is a fixed-key design: there is no ratchet and no forward secrecy.
//! Compromise of either identity secret exposes the whole conversation.

use subtle::{Choice, ConstantTimeEq};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    aead::{self, NONCE_LEN},
    error::CryptoError,
    identity::{Fingerprint, PublicKey, SecretKey},
    kdf,
};

/// Symmetric key shared by one local identity and one peer. Never persisted.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl ConstantTimeEq for ConversationKey {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

impl PartialEq for ConversationKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for ConversationKey {}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(..)")
    }
}

/// A detached ciphertext: the relay record carries nonce and ciphertext as
/// separate fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// `nonce || ciphertext`, the layout used for opaque blobs.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_wire(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < NONCE_LEN + aead::TAG_LEN {
            return Err(CryptoError::Malformed(format!(
                "sealed payload too short: {} bytes",
                data.len()
            )));
        }
        let (nonce, ct) = data.split_at(NONCE_LEN);
        let mut arr = [0u8; NONCE_LEN];
        arr.copy_from_slice(nonce);
        Ok(Self { nonce: arr, ciphertext: ct.to_vec() })
    }
}

/// One X25519 scalar multiplication followed by HKDF.
///
/// Fails when the peer key is a low-order point (the shared secret would be
/// all zeroes and independent of our secret).
pub fn derive_key(my_secret: &SecretKey, peer_public: &PublicKey) -> Result<ConversationKey, CryptoError> {
    let shared = my_secret.to_x25519().diffie_hellman(&peer_public.to_x25519());
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("peer public key is a low-order point".into()));
    }
    let mut dh = shared.to_bytes();
    let key = kdf::conversation_key(&dh);
    dh.zeroize();
    Ok(ConversationKey(*key?))
}

/// Authenticated encryption with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &ConversationKey) -> Result<Sealed, CryptoError> {
    let nonce = aead::generate_nonce();
    let ciphertext = aead::seal(&key.0, &nonce, plaintext, b"")?;
    Ok(Sealed { nonce, ciphertext })
}

/// `None` means "drop this record". It never means empty plaintext.
pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &ConversationKey) -> Option<Vec<u8>> {
    aead::open(&key.0, nonce, ciphertext, b"")
        .ok()
        .map(|pt| pt.to_vec())
}

/// First 8 bytes of the raw public key. Weak, display/isolation only.
pub fn fingerprint(public_key: &PublicKey) -> Fingerprint {
    public_key.fingerprint()
}
