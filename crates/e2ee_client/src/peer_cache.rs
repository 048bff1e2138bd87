//! Peer Key Cache: peer public bundles by user id.
//!
//! A peer may have several devices; the most recently updated one wins. Ties
//! go to the one the directory listed first.

use tracing::{debug, warn};

use e2ee_crypto::jwk::{validate_public_p256, USE_SIG};
use e2ee_proto::api::PeerKeyBundle;

use crate::cache::EpochCache;
use crate::directory::KeyDirectory;
use crate::error::E2eeError;

#[derive(Default)]
pub struct PeerKeyCache {
    entries: EpochCache<PeerKeyBundle>,
}

impl PeerKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<PeerKeyBundle> {
        self.entries.get(user_id)
    }

    /// Cached bundle, or fetch from `directory` and cache the winner.
    pub async fn get_or_fetch(
        &self,
        directory: &dyn KeyDirectory,
        user_id: &str,
    ) -> Result<PeerKeyBundle, E2eeError> {
        if let Some(bundle) = self.entries.get(user_id) {
            return Ok(bundle);
        }
        let epoch = self.entries.epoch();
        let bundles = directory.fetch_peer(user_id, None).await?;
        let bundle = select_most_recent(user_id, bundles)
            .ok_or_else(|| E2eeError::NotFound(format!("no usable keys for user {user_id}")))?;

        debug!(
            user_id = %user_id,
            device_id = %bundle.device_id,
            dh_fp = %bundle.dh_pub_jwk.fingerprint(),
            "[peers] bundle cached"
        );
        self.entries.insert_if_current(epoch, user_id, bundle.clone());
        Ok(bundle)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Newest valid bundle for `user_id`. Bundles for another user, or whose
/// keys are not clean P-256 public keys, are skipped.
pub fn select_most_recent(user_id: &str, bundles: Vec<PeerKeyBundle>) -> Option<PeerKeyBundle> {
    bundles
        .into_iter()
        .filter(|b| {
            let usable = b.user_id == user_id
                && validate_public_p256(&b.sign_pub_jwk, Some(USE_SIG)).is_ok()
                && validate_public_p256(&b.dh_pub_jwk, None).is_ok();
            if !usable {
                warn!(user_id = %user_id, device_id = %b.device_id, "[peers] skipping unusable bundle");
            }
            usable
        })
        .fold(None, |best: Option<PeerKeyBundle>, b| match best {
            Some(current) if current.updated_at >= b.updated_at => Some(current),
            _ => Some(b),
        })
}
