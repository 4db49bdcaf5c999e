use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    /// Malformed request: the relay would answer 400, so the client never
    /// sends it.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] dc_crypto::CryptoError),
}
