//! Key directory request/response types.
//! These map directly to JSON bodies on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use e2ee_crypto::EcJwk;

use crate::record::{CipherDescriptor, KdfDescriptor};

/// Error codes returned in [`ErrorResponse::error`].
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_DEVICE_ID: &str = "INVALID_DEVICE_ID";
    pub const INVALID_USER_ID: &str = "INVALID_USER_ID";
    pub const INVALID_SIGN_PUB_JWK: &str = "INVALID_SIGN_PUB_JWK";
    pub const INVALID_DH_PUB_JWK: &str = "INVALID_DH_PUB_JWK";
    pub const INVALID_BACKUP: &str = "INVALID_BACKUP";
    pub const SERVER: &str = "SERVER";
}

// ── Register ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub device_id: String,
    pub sign_pub_jwk: EcJwk,
    pub dh_pub_jwk: EcJwk,
    /// Backup of the wrapped private keys. Sent together with `wrapped_priv` or not at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_priv: Option<CipherDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub ok: bool,
    /// True on first registration of (user, device).
    pub created: bool,
    pub user_id: String,
    pub device_id: String,
    pub updated_at: DateTime<Utc>,
}

// ── Fetch ─────────────────────────────────────────────────────────────────────

/// The caller's own row, including the wrapped-private backup if one was uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnKeysResponse {
    pub device_id: String,
    pub sign_pub_jwk: EcJwk,
    pub dh_pub_jwk: EcJwk,
    #[serde(default)]
    pub kdf: Option<KdfDescriptor>,
    #[serde(default)]
    pub wrapped_priv: Option<CipherDescriptor>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerKeyBundle {
    pub user_id: String,
    pub device_id: String,
    pub sign_pub_jwk: EcJwk,
    pub dh_pub_jwk: EcJwk,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerKeysResponse {
    pub ok: bool,
    /// Most recently updated device first.
    pub keys: Vec<PeerKeyBundle>,
}

// ── Change PIN ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePinRequest {
    pub device_id: String,
    pub kdf: KdfDescriptor,
    pub wrapped_priv: CipherDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePinResponse {
    pub ok: bool,
    pub updated_at: DateTime<Utc>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str, detail: Option<String>) -> Self {
        Self { error: error.to_string(), detail }
    }
}
