//! Encrypted identity record: the sole persistent form of private keys.
//!
//! ```json
//! {
//!   "v": 1,
//!   "deviceId": "web-1",
//!   "kdf": { "alg": "PBKDF2", "hash": "SHA-256", "iter": 210000, "salt_b64": "…" },
//!   "enc": { "alg": "AES-GCM", "iv_b64": "…", "ct_b64": "…" },
//!   "createdAt": "…", "updatedAt": "…"
//! }
//! ```
//!
//! `enc.ct_b64` decrypts (under the PIN-derived key) to a
//! [`WrappedIdentityPayload`]. The same `kdf` + `enc` pair is what the key
//! directory stores as the device's backup (`kdf` + `wrappedPriv`).

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use e2ee_crypto::identity::{PrivateJwks, PublicJwks};
use e2ee_crypto::kdf::{MAX_PBKDF2_ITERATIONS, PBKDF2_ALGORITHM, PBKDF2_HASH};

use crate::error::PacketError;

pub const RECORD_VERSION: u8 = 1;
pub const WRAP_ALGORITHM: &str = "AES-GCM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfDescriptor {
    #[serde(rename = "alg")]
    pub algorithm: String,
    pub hash: String,
    #[serde(rename = "iter")]
    pub iterations: u32,
    pub salt_b64: String,
}

impl KdfDescriptor {
    pub fn pbkdf2_sha256(salt: &[u8], iterations: u32) -> Self {
        Self {
            algorithm: PBKDF2_ALGORITHM.to_string(),
            hash: PBKDF2_HASH.to_string(),
            iterations,
            salt_b64: STANDARD.encode(salt),
        }
    }

    pub fn salt(&self) -> Result<Vec<u8>, PacketError> {
        decode_field(&self.salt_b64, "kdf.salt_b64")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherDescriptor {
    #[serde(rename = "alg")]
    pub algorithm: String,
    pub iv_b64: String,
    pub ct_b64: String,
}

impl CipherDescriptor {
    pub fn aes_gcm(iv: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            algorithm: WRAP_ALGORITHM.to_string(),
            iv_b64: STANDARD.encode(iv),
            ct_b64: STANDARD.encode(ciphertext),
        }
    }

    pub fn iv(&self) -> Result<Vec<u8>, PacketError> {
        decode_field(&self.iv_b64, "enc.iv_b64")
    }

    pub fn ciphertext(&self) -> Result<Vec<u8>, PacketError> {
        decode_field(&self.ct_b64, "enc.ct_b64")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedIdentityRecord {
    #[serde(rename = "v")]
    pub version: u8,
    pub device_id: String,
    pub kdf: KdfDescriptor,
    #[serde(rename = "enc")]
    pub ciphertext: CipherDescriptor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EncryptedIdentityRecord {
    /// Rebuild a record from a directory backup. Missing timestamps become "now".
    pub fn from_backup(
        device_id: &str,
        kdf: KdfDescriptor,
        wrapped_priv: CipherDescriptor,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Result<Self, PacketError> {
        let now = Utc::now();
        let record = Self {
            version: RECORD_VERSION,
            device_id: device_id.to_string(),
            kdf,
            ciphertext: wrapped_priv,
            created_at: created_at.unwrap_or(now),
            updated_at: updated_at.unwrap_or(now),
        };
        record.validate()?;
        Ok(record)
    }

    /// Structural checks, applied before a record is trusted or stored.
    pub fn validate(&self) -> Result<(), PacketError> {
        if self.version != RECORD_VERSION {
            return Err(PacketError::UnsupportedFormat(format!(
                "identity record version {} (expected {RECORD_VERSION})",
                self.version
            )));
        }
        if self.device_id.trim().is_empty() {
            return Err(PacketError::UnsupportedFormat("identity record has no deviceId".into()));
        }
        if self.kdf.algorithm != PBKDF2_ALGORITHM
            || self.kdf.iterations == 0
            || self.kdf.iterations > MAX_PBKDF2_ITERATIONS
        {
            return Err(PacketError::UnsupportedFormat(format!(
                "unsupported kdf '{}' ({} iterations)",
                self.kdf.algorithm, self.kdf.iterations
            )));
        }
        if self.ciphertext.algorithm != WRAP_ALGORITHM {
            return Err(PacketError::UnsupportedFormat(format!(
                "unsupported wrapping cipher '{}'",
                self.ciphertext.algorithm
            )));
        }
        if self.kdf.salt_b64.is_empty()
            || self.ciphertext.iv_b64.is_empty()
            || self.ciphertext.ct_b64.is_empty()
        {
            return Err(PacketError::UnsupportedFormat(
                "identity record is missing salt, iv or ciphertext".into(),
            ));
        }
        Ok(())
    }
}

/// Plaintext inside `enc.ct_b64`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedIdentityPayload {
    pub device_id: String,
    pub priv_jwks: PrivateJwks,
    pub pub_jwks: PublicJwks,
}

impl WrappedIdentityPayload {
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, PacketError> {
        Ok(Zeroizing::new(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn decode_field(b64: &str, name: &str) -> Result<Vec<u8>, PacketError> {
    STANDARD
        .decode(b64)
        .map_err(|e| PacketError::InvalidArgument(format!("{name}: {e}")))
}
