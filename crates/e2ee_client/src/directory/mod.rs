//! Remote key directory: per-(user, device) public bundles plus an optional
//! wrapped-private backup for the owner.
//!
//! Two clients implement [`KeyDirectory`]:
//! - [`HttpKeyDirectory`] talks to the chat server over HTTPS with a bearer token.
//! - [`MemoryKeyDirectory`] holds the same contract in-process. It is the
//!   test double, with fault injection for outage tests.

mod http;
mod memory;

use async_trait::async_trait;

use e2ee_proto::api::{
    ChangePinRequest, ChangePinResponse, OwnKeysResponse, PeerKeyBundle, RegisterRequest,
    RegisterResponse,
};

use crate::error::E2eeError;

pub use http::HttpKeyDirectory;
pub use memory::MemoryKeyDirectory;

pub const REGISTER_PATH: &str = "/api/e2ee/keys/register";
pub const OWN_KEYS_PATH: &str = "/api/e2ee/keys/me";
pub const CHANGE_PIN_PATH: &str = "/api/e2ee/keys/change-pin";
pub const KEYS_PATH: &str = "/api/e2ee/keys";

pub const MAX_DEVICE_ID_LEN: usize = 64;

#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Upsert the caller's bundle for `req.device_id`.
    async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, E2eeError>;

    /// The caller's own row for `device_id`, or `None` if never registered.
    async fn fetch_own(&self, device_id: &str) -> Result<Option<OwnKeysResponse>, E2eeError>;

    /// Public bundles for `user_id`, most recently updated first.
    /// No bundles at all is `NotFound`.
    async fn fetch_peer(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<Vec<PeerKeyBundle>, E2eeError>;

    /// Replace the backup of an existing (caller, device) row. Unknown row is `NotFound`.
    async fn change_pin(&self, req: &ChangePinRequest) -> Result<ChangePinResponse, E2eeError>;
}

/// Trimmed device id, 1..=64 characters.
pub fn normalize_device_id(device_id: &str) -> Result<String, E2eeError> {
    let trimmed = device_id.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(E2eeError::InvalidArgument(format!(
            "device id must be 1-{MAX_DEVICE_ID_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// True for the lowercase hyphenated form the server issues.
pub fn is_canonical_user_id(user_id: &str) -> bool {
    uuid::Uuid::parse_str(user_id)
        .map(|u| u.hyphenated().to_string() == user_id)
        .unwrap_or(false)
}
