use thiserror::Error;

use dc_proto::ProtoError;

/// Relay failures, classified so callers can decide between retrying,
/// surfacing, and giving up.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Lookup of an unknown handle.
    #[error("No such handle on the relay: {0}")]
    PeerNotFound(String),

    /// Malformed request. Never retried: it is a client bug, not a transient
    /// condition.
    #[error("Relay rejected request: {0}")]
    Validation(String),

    /// Unknown message or blob id on delete/download.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure, timeout, or 5xx.
    #[error("Network error: {0}")]
    Network(String),

    /// A status or body this client does not understand.
    #[error("Unexpected relay response ({status}): {message}")]
    Unexpected { status: u16, message: String },
}

impl RelayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<ProtoError> for RelayError {
    fn from(e: ProtoError) -> Self {
        match e {
            ProtoError::Validation(msg) => Self::Validation(msg),
            other => Self::Unexpected { status: 0, message: other.to_string() },
        }
    }
}
