use thiserror::Error;

use dc_client::RelayError;
use dc_crypto::CryptoError;
use dc_store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No local identity; run init or import first")]
    Authentication,

    #[error("No user named {0} on the relay; check the handle and try again")]
    PeerNotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    /// Only for explicit user actions (attachment download). Incoming
    /// message decrypt failures never surface.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conversation is closed")]
    Closed,

    #[error("Relay error: {0}")]
    Relay(RelayError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Relay(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<RelayError> for SyncError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::PeerNotFound(h) => Self::PeerNotFound(h),
            RelayError::Validation(m) => Self::Validation(m),
            RelayError::NotFound(m) => Self::NotFound(m),
            RelayError::Network(m) => Self::Network(m),
            other => Self::Relay(other),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NoIdentity => Self::Authentication,
            StoreError::Crypto(c) => Self::Crypto(c),
            other => Self::Store(other),
        }
    }
}
