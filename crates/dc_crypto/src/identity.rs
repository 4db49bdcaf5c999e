//! Identity key material
//!
//! Each device holds exactly one long-term X25519 key-agreement keypair.
//! The public half is published to the relay directory under a handle; the
//! secret half never leaves the device except inside a passphrase-sealed
//! export (see `sealed`).
//!
//! Fingerprints
//! ------------
//! Two fingerprints exist and they are NOT interchangeable:
//!   - `PublicKey::fingerprint()`: the first 8 raw bytes of the key. Carried
//!     on every relay record as `senderFingerprint` and compared by the sync
//!     layer to keep conversations apart. It is a heuristic, not a commitment.
//!   - `PublicKey::display_fingerprint()`: BLAKE3 of the key, truncated to
//!     160 bits, for out-of-band comparison by humans.

use std::fmt;

use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::{encoding, error::CryptoError};

pub const KEY_LEN: usize = 32;
pub const FINGERPRINT_LEN: usize = 8;

// ── Public key ────────────────────────────────────────────────────────────────

/// 32-byte X25519 public key, base64 on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Public key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        encoding::encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&encoding::decode(s)?)
    }

    /// Short raw prefix used for conversation isolation. Display/heuristic only.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&self.0[..FINGERPRINT_LEN]);
        Fingerprint(out)
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes, hex-encoded in groups of 4.
    ///
    /// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
    pub fn display_fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_x25519(self) -> X25519Public {
        X25519Public::from(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_b64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_b64(&s).map_err(serde::de::Error::custom)
    }
}

// ── Fingerprint ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// True when `bytes` (as received on the wire) equals this fingerprint.
    /// Anything of the wrong length never matches.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes == self.0.as_slice()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

// ── Secret key ────────────────────────────────────────────────────────────────

/// X25519 secret scalar. Drop clears memory via ZeroizeOnDrop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Secret key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(X25519Public::from(&secret).to_bytes())
    }

    pub(crate) fn to_x25519(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

// ── Keypair ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    secret: SecretKey,
}

impl KeyPair {
    /// Fresh keypair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_secret(SecretKey(secret.to_bytes()))
    }

    pub fn from_secret(secret: SecretKey) -> Result<Self, CryptoError> {
        let public = secret.public_key();
        if public.0 == [0u8; KEY_LEN] {
            return Err(CryptoError::KeyGeneration("degenerate public key".into()));
        }
        Ok(Self { public, secret })
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}
