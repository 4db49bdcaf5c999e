//! Message records: what the relay stores and hands back on poll.
//!
//! The relay is a DUMB RELAY. It only sees:
//!   - id          (assigned on acceptance, no semantic meaning)
//!   - from / to   (needed for routing and poll scoping)
//!   - created_at  (needed for `since` filtering)
//!   - ciphertext, nonce, sender_fingerprint (opaque bytes)
//!   - kind, blob_ref, mime, name (attachment routing hints)
//!
//! The relay CANNOT see plaintext or key material.
//!
//! Every binary field crosses the wire as a standard base64 string.

use std::{cmp::Ordering, fmt};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use dc_crypto::encoding;

use crate::handle::Handle;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

pub fn now_millis() -> Millis {
    Utc::now().timestamp_millis()
}

/// Relay-assigned record id.
///
/// Relays in the wild emit either integers or strings; both read into the
/// same type. Numeric ids sort numerically and before every non-numeric
/// id; non-numeric ids sort lexicographically. So `9 < 10` holds for
/// integer ids and the order stays total for mixed ones.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn order_key(&self) -> (bool, u64, &str) {
        match self.0.parse::<u64>() {
            Ok(n) => (false, n, &self.0),
            Err(_) => (true, 0, &self.0),
        }
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Self(n.to_string()),
            Raw::Str(s) => Self(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
    File,
}

impl MessageKind {
    /// Record kind for an attachment with the given content type.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else {
            Self::File
        }
    }

    pub fn is_attachment(self) -> bool {
        self != Self::Text
    }
}

/// A message as stored by the relay.
///
/// Immutable after acceptance except for `deleted` / `deleted_at`, which
/// only ever go from unset to set.
///
/// Attachment records carry the blob id in `blob_ref` and an encrypted
/// caption (possibly empty) in `ciphertext`, so every record is decrypted the
/// same way. Fields the relay might omit default instead of failing the whole
/// poll response; a record with an empty nonce simply fails decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: RecordId,
    pub from: Handle,
    pub to: Handle,
    #[serde(default, with = "encoding::serde_b64_opt", skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<Vec<u8>>,
    #[serde(default, with = "encoding::serde_b64")]
    pub nonce: Vec<u8>,
    #[serde(default, with = "encoding::serde_b64")]
    pub sender_fingerprint: Vec<u8>,
    /// Sender clock at submission, in ms. Older relays call this `timestamp`.
    #[serde(alias = "timestamp")]
    pub created_at: Millis,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Millis>,
}

impl MessageRecord {
    /// True when `handle` is one of the two participants.
    pub fn involves(&self, handle: &Handle) -> bool {
        &self.from == handle || &self.to == handle
    }

    /// Ordering key for display: `(created_at, id)`.
    pub fn sort_key(&self) -> (Millis, &RecordId) {
        (self.created_at, &self.id)
    }
}

/// Tombstone entry in a poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletion {
    pub id: RecordId,
    pub deleted_at: Millis,
}
