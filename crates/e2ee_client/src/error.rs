use thiserror::Error;

use e2ee_crypto::CryptoError;
use e2ee_proto::PacketError;
use e2ee_store::StoreError;

#[derive(Debug, Error)]
pub enum E2eeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Wrong PIN, or the record / ciphertext was modified.
    #[error("Authentication failed: wrong PIN or corrupted record")]
    AuthenticationFailure,

    #[error("Old PIN is incorrect")]
    OldPinInvalid,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Key directory rejected the request ({status} {code}) {}", .detail.as_deref().unwrap_or(""))]
    RemoteRejected { status: u16, code: String, detail: Option<String> },

    #[error("Stored identity belongs to device '{stored}', not '{requested}'")]
    DeviceMismatch { stored: String, requested: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt identity record: {0}")]
    CorruptRecord(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl E2eeError {
    pub(crate) fn rejected(status: u16, code: &str, detail: Option<String>) -> Self {
        E2eeError::RemoteRejected { status, code: code.to_string(), detail }
    }
}

impl From<PacketError> for E2eeError {
    fn from(e: PacketError) -> Self {
        match e {
            PacketError::InvalidArgument(msg) => E2eeError::InvalidArgument(msg),
            PacketError::AuthenticationFailure => E2eeError::AuthenticationFailure,
            PacketError::UnsupportedFormat(msg) => E2eeError::UnsupportedFormat(msg),
            PacketError::Crypto(e) => E2eeError::Crypto(e),
            PacketError::Serialisation(e) => E2eeError::CorruptRecord(e.to_string()),
        }
    }
}

impl From<StoreError> for E2eeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt(msg) => E2eeError::CorruptRecord(msg),
            StoreError::InvalidRecord(e) => E2eeError::CorruptRecord(e.to_string()),
            other => E2eeError::Store(other),
        }
    }
}
