use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Wrong key, or the ciphertext or its bound metadata was modified.
    #[error("Cannot decrypt: authentication failed")]
    AuthenticationFailure,

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] e2ee_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
