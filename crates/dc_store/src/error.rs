use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No identity on this device; run init or import first")]
    NoIdentity,

    #[error("Credential store error: {0}")]
    Credential(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] dc_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Invalid handle: {0}")]
    Handle(#[from] dc_proto::ProtoError),

    #[error("Unsupported identity format version {0}")]
    UnsupportedVersion(u8),

    #[error("Stored identity is corrupt: {0}")]
    Corrupt(String),
}
