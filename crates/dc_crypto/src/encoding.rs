//! Canonical base64 encoding for every binary field that crosses a text
//! boundary (relay JSON bodies, exported identities, config files).
//!
//! Standard alphabet with padding. Decoding is strict: there is exactly one
//! textual form per byte string.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::CryptoError;

pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(s.trim())?)
}

/// `#[serde(with = "dc_crypto::encoding::serde_b64")]` for `Vec<u8>` fields.
pub mod serde_b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Same as `serde_b64` for `Option<Vec<u8>>`; absent, `null` and `""` all
/// read back as `None`.
pub mod serde_b64_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&super::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if !s.is_empty() => super::decode(&s).map(Some).map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
