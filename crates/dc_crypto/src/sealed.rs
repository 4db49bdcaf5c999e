//! Passphrase-sealed blobs, used to move an identity between devices.
//!
//! key    = Argon2id(passphrase, salt, params)
//! sealed = nonce || XChaCha20-Poly1305(key, nonce, plaintext, aad = label)
//!
//! The blob carries its own KDF parameters and salt. Opening with the wrong
//! passphrase and opening a corrupted blob are indistinguishable: both fail
//! the tag check and return `CryptoError::AeadDecrypt`.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    aead, encoding,
    error::CryptoError,
    kdf::{self, KdfParams, SALT_LEN},
};

pub const SEALED_VERSION: u8 = 1;
const AAD: &[u8] = b"dc-sealed-identity-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    pub version: u8,
    pub kdf: KdfParams,
    #[serde(with = "encoding::serde_b64")]
    pub salt: Vec<u8>,
    /// nonce || ciphertext+tag
    #[serde(with = "encoding::serde_b64")]
    pub sealed: Vec<u8>,
}

impl SealedBlob {
    /// Single base64 string suitable for copy/paste or a file.
    pub fn to_armored(&self) -> Result<String, CryptoError> {
        Ok(encoding::encode(serde_json::to_vec(self)?))
    }

    pub fn from_armored(s: &str) -> Result<Self, CryptoError> {
        let json = encoding::decode(s)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

pub fn seal_with_passphrase(
    plaintext: &[u8],
    passphrase: &[u8],
    params: KdfParams,
) -> Result<SealedBlob, CryptoError> {
    let salt = kdf::generate_salt();
    let key = kdf::passphrase_key(passphrase, &salt, params)?;
    let sealed = aead::encrypt(&key, plaintext, AAD)?;
    Ok(SealedBlob {
        version: SEALED_VERSION,
        kdf: params,
        salt: salt.to_vec(),
        sealed,
    })
}

pub fn open_with_passphrase(blob: &SealedBlob, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.version != SEALED_VERSION {
        return Err(CryptoError::UnsupportedVersion(blob.version));
    }
    let salt: [u8; SALT_LEN] = blob
        .salt
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::Malformed(format!("salt must be {SALT_LEN} bytes")))?;
    let key = kdf::passphrase_key(passphrase, &salt, blob.kdf)?;
    aead::decrypt(&key, &blob.sealed, AAD)
}
