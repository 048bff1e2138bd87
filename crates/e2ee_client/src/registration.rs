//! Publishing the public bundle and restoring an identity from the
//! directory backup.

use std::sync::Arc;

use tracing::{error, info, warn};

use e2ee_crypto::identity::PublicJwks;
use e2ee_proto::api::{RegisterRequest, RegisterResponse};
use e2ee_proto::EncryptedIdentityRecord;

use crate::context::E2eeContext;
use crate::directory::normalize_device_id;
use crate::error::E2eeError;
use crate::identity::{normalize_pin, DeviceIdentity};

impl E2eeContext {
    /// Upsert this device's public keys. When the local record belongs to the
    /// same device, its wrapped private keys are uploaded as the backup.
    pub async fn register_public_bundle(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<RegisterResponse, E2eeError> {
        let jwks = identity.public_jwks();
        let backup = self
            .identities
            .store()
            .load()
            .await?
            .filter(|r| r.device_id == identity.device_id);

        let req = RegisterRequest {
            device_id: identity.device_id.clone(),
            sign_pub_jwk: jwks.sign_pub_jwk,
            dh_pub_jwk: jwks.dh_pub_jwk,
            kdf: backup.as_ref().map(|r| r.kdf.clone()),
            wrapped_priv: backup.map(|r| r.ciphertext),
        };
        let with_backup = req.kdf.is_some();

        let resp = self.directory.register(&req).await?;
        info!(
            device_id = %resp.device_id,
            created = resp.created,
            with_backup,
            "[e2ee] public bundle registered"
        );
        Ok(resp)
    }

    /// Pull the wrapped backup for `device_id` and unlock it with `pin`.
    ///
    /// Refuses to replace a local record that belongs to another device.
    pub async fn restore_from_backup(
        &self,
        device_id: &str,
        pin: &str,
    ) -> Result<Arc<DeviceIdentity>, E2eeError> {
        self.restore(device_id, pin, false).await
    }

    /// Like `restore_from_backup`, but overwrites a local record for another
    /// device. Caller must have confirmed this with the user.
    pub async fn restore_from_backup_replacing(
        &self,
        device_id: &str,
        pin: &str,
    ) -> Result<Arc<DeviceIdentity>, E2eeError> {
        self.restore(device_id, pin, true).await
    }

    async fn restore(
        &self,
        device_id: &str,
        pin: &str,
        replace_other_device: bool,
    ) -> Result<Arc<DeviceIdentity>, E2eeError> {
        let device_id = normalize_device_id(device_id)?;
        normalize_pin(pin)?;
        let store = self.identities.store();

        let prior = match store.load().await.map_err(E2eeError::from) {
            Ok(prior) => prior,
            Err(E2eeError::CorruptRecord(reason)) if replace_other_device => {
                warn!(reason = %reason, "[restore] replacing unreadable local record");
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(existing) = &prior {
            if existing.device_id != device_id && !replace_other_device {
                return Err(E2eeError::DeviceMismatch {
                    stored: existing.device_id.clone(),
                    requested: device_id,
                });
            }
        }

        let own = self
            .directory
            .fetch_own(&device_id)
            .await?
            .ok_or_else(|| E2eeError::NotFound(format!("device {device_id} is not registered")))?;
        let (kdf, wrapped_priv) = match (own.kdf, own.wrapped_priv) {
            (Some(kdf), Some(wrapped)) => (kdf, wrapped),
            _ => {
                return Err(E2eeError::NotFound(format!(
                    "device {device_id} has no key backup"
                )))
            }
        };
        let published = PublicJwks { sign_pub_jwk: own.sign_pub_jwk, dh_pub_jwk: own.dh_pub_jwk };

        let record = EncryptedIdentityRecord::from_backup(
            &device_id,
            kdf,
            wrapped_priv,
            own.created_at,
            Some(own.updated_at),
        )
        .map_err(|e| E2eeError::CorruptRecord(e.to_string()))?;
        store.save(&record).await?;

        let outcome = match self.identities.obtain_identity(pin, &device_id).await {
            Ok(identity) if !identity.keys.matches_public(&published) => Err(E2eeError::CorruptRecord(
                "backup does not match the published public keys".into(),
            )),
            other => other,
        };

        match outcome {
            Ok(identity) => {
                let identity = Arc::new(identity);
                self.install_identity(Arc::clone(&identity)).await;
                info!(device_id = %device_id, "[restore] identity restored from backup");
                Ok(identity)
            }
            Err(e) => {
                let rollback = match &prior {
                    Some(previous) => store.save(previous).await,
                    None => store.delete().await,
                };
                if let Err(rb) = rollback {
                    error!(error = %rb, "[restore] rollback of local record failed");
                }
                warn!(device_id = %device_id, error = %e, "[restore] backup rejected, local record restored");
                Err(e)
            }
        }
    }
}
