//! Identity Manager: create or unlock the per-device identity.
//!
//! A device has exactly one identity for the lifetime of the install. The
//! private halves only exist on disk inside the PIN-wrapped record; a wrong
//! PIN never deletes anything. Wiping is an explicit `forget_identity`.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use e2ee_crypto::identity::{PublicJwks, SigningKeyPair};
use e2ee_crypto::{kdf, DeviceKeys};
use e2ee_store::IdentityStore;

use crate::directory::normalize_device_id;
use crate::error::E2eeError;
use crate::wrap;

/// An unlocked device identity. Private keys live in memory only.
pub struct DeviceIdentity {
    pub device_id: String,
    pub keys: DeviceKeys,
    /// True when this call generated the keys.
    pub is_new: bool,
}

impl DeviceIdentity {
    pub fn public_jwks(&self) -> PublicJwks {
        self.keys.public_jwks()
    }

    pub fn sign_fingerprint(&self) -> String {
        self.public_jwks().sign_pub_jwk.fingerprint()
    }

    pub fn dh_fingerprint(&self) -> String {
        self.public_jwks().dh_pub_jwk.fingerprint()
    }

    /// ECDSA P-256 signature (64-byte `r || s`) with the device signing key.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.keys.sign.sign(msg)
    }

    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> Result<(), E2eeError> {
        SigningKeyPair::verify(&self.keys.sign.public_key(), msg, signature)?;
        Ok(())
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("sign", &self.sign_fingerprint())
            .field("dh", &self.dh_fingerprint())
            .field("is_new", &self.is_new)
            .finish()
    }
}

#[derive(Clone)]
pub struct IdentityManager {
    store: Arc<dyn IdentityStore>,
    kdf_iterations: u32,
}

impl IdentityManager {
    pub fn new(store: Arc<dyn IdentityStore>, kdf_iterations: u32) -> Self {
        Self { store, kdf_iterations }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Unlock the stored identity, or create one if the store is empty.
    pub async fn obtain_identity(&self, pin: &str, device_id: &str) -> Result<DeviceIdentity, E2eeError> {
        let device_id = normalize_device_id(device_id)?;
        let pin = normalize_pin(pin)?;

        match self.store.load().await? {
            None => {
                let keys = DeviceKeys::generate();
                let record = wrap::seal_identity(&keys, &device_id, &pin, self.kdf_iterations)?;
                self.store.save(&record).await?;
                let identity = DeviceIdentity { device_id, keys, is_new: true };
                info!(
                    device_id = %identity.device_id,
                    sign_fp = %identity.sign_fingerprint(),
                    "[identity] created new device identity"
                );
                Ok(identity)
            }
            Some(record) => {
                if record.device_id != device_id {
                    return Err(E2eeError::DeviceMismatch {
                        stored: record.device_id,
                        requested: device_id,
                    });
                }
                let keys = wrap::open_identity(&record, &pin).map_err(|e| {
                    if matches!(e, E2eeError::AuthenticationFailure) {
                        warn!(device_id = %device_id, "[identity] unlock failed: wrong PIN or corrupted record");
                    }
                    e
                })?;
                info!(device_id = %device_id, "[identity] unlocked");
                Ok(DeviceIdentity { device_id, keys, is_new: false })
            }
        }
    }

    /// Delete the stored record. The next `obtain_identity` creates new keys.
    pub async fn forget_identity(&self) -> Result<(), E2eeError> {
        self.store.delete().await?;
        warn!("[identity] stored identity deleted");
        Ok(())
    }
}

pub(crate) fn normalize_pin(pin: &str) -> Result<zeroize::Zeroizing<String>, E2eeError> {
    kdf::normalize_pin(pin).map_err(|_| E2eeError::InvalidArgument("PIN is required".into()))
}
