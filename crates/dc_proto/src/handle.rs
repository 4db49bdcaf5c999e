//! Handles are case-insensitive identifiers. Every boundary (registration,
//! send, poll, delete, lookup, local persistence) goes through
//! `normalize_handle`, so two spellings that differ only in case or
//! surrounding whitespace are the same identity.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtoError;

pub fn normalize_handle(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A normalized handle.
///
/// `Handle::parse` rejects empty input. Deserialization only normalizes, so a
/// single malformed record in a poll response cannot fail the whole batch; an
/// empty handle simply never matches a conversation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn parse(raw: &str) -> Result<Self, ProtoError> {
        let normalized = normalize_handle(raw);
        if normalized.is_empty() {
            return Err(ProtoError::Validation("handle must not be empty".into()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self(normalize_handle(&raw)))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
