//! PIN Rotation Coordinator.
//!
//! Rotation re-wraps the same payload bytes under a new PIN; the key pairs
//! never change. The local write happens first. Publishing the new backup
//! is a separate step whose failure is reported, not rolled back, and can
//! be retried with `republish_pin_change`.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use e2ee_proto::api::{ChangePinRequest, ChangePinResponse};
use e2ee_proto::{EncryptedIdentityRecord, WrappedIdentityPayload};

use crate::context::E2eeContext;
use crate::directory::normalize_device_id;
use crate::error::E2eeError;
use crate::identity::normalize_pin;
use crate::wrap;

#[derive(Debug)]
pub enum PublishOutcome {
    /// Nothing was rotated, so nothing was sent.
    NotNeeded,
    Published { updated_at: DateTime<Utc> },
    /// Local record is rotated; the directory still holds the old backup.
    Failed(E2eeError),
}

#[derive(Debug)]
pub struct RotationResult {
    /// Old and new PIN were identical after normalisation.
    pub skipped: bool,
    /// `updatedAt` of the new local record.
    pub updated_at: Option<DateTime<Utc>>,
    pub publish: PublishOutcome,
}

impl RotationResult {
    pub fn is_published(&self) -> bool {
        matches!(self.publish, PublishOutcome::Published { .. })
    }
}

impl E2eeContext {
    pub async fn rotate_pin(
        &self,
        device_id: &str,
        old_pin: &str,
        new_pin: &str,
    ) -> Result<RotationResult, E2eeError> {
        let device_id = normalize_device_id(device_id)?;
        let old_pin = normalize_pin(old_pin)
            .map_err(|_| E2eeError::InvalidArgument("old PIN is required".into()))?;
        let new_pin = normalize_pin(new_pin)
            .map_err(|_| E2eeError::InvalidArgument("new PIN is required".into()))?;

        if *old_pin == *new_pin {
            return Ok(RotationResult { skipped: true, updated_at: None, publish: PublishOutcome::NotNeeded });
        }

        let store = self.identities.store();
        let record = store
            .load()
            .await?
            .ok_or_else(|| E2eeError::NotFound("no local identity record".into()))?;
        check_device(&record, &device_id)?;

        let payload = wrap::unwrap_payload(&record, &old_pin).map_err(|e| match e {
            E2eeError::AuthenticationFailure => E2eeError::OldPinInvalid,
            other => other,
        })?;
        let parsed = WrappedIdentityPayload::from_bytes(&payload)
            .map_err(|e| E2eeError::CorruptRecord(e.to_string()))?;
        if parsed.device_id != record.device_id {
            return Err(E2eeError::CorruptRecord("payload device id does not match record".into()));
        }

        let (kdf, ciphertext) = wrap::wrap_payload(&payload, &new_pin, record.kdf.iterations)?;
        let rotated = EncryptedIdentityRecord {
            version: record.version,
            device_id: record.device_id.clone(),
            kdf,
            ciphertext,
            created_at: record.created_at,
            updated_at: Utc::now(),
        };
        store.save(&rotated).await?;
        self.clear_caches();
        info!(device_id = %device_id, "[rotation] local record re-wrapped under new PIN");

        let publish = match self.publish_record(&rotated).await {
            Ok(resp) => PublishOutcome::Published { updated_at: resp.updated_at },
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "[rotation] directory update failed; retry with republish");
                PublishOutcome::Failed(e)
            }
        };

        Ok(RotationResult { skipped: false, updated_at: Some(rotated.updated_at), publish })
    }

    /// Send the stored record's backup to the directory again.
    pub async fn republish_pin_change(&self, device_id: &str) -> Result<ChangePinResponse, E2eeError> {
        let device_id = normalize_device_id(device_id)?;
        let record = self
            .identities
            .store()
            .load()
            .await?
            .ok_or_else(|| E2eeError::NotFound("no local identity record".into()))?;
        check_device(&record, &device_id)?;
        let resp = self.publish_record(&record).await?;
        info!(device_id = %device_id, "[rotation] backup republished");
        Ok(resp)
    }

    async fn publish_record(&self, record: &EncryptedIdentityRecord) -> Result<ChangePinResponse, E2eeError> {
        let req = ChangePinRequest {
            device_id: record.device_id.clone(),
            kdf: record.kdf.clone(),
            wrapped_priv: record.ciphertext.clone(),
        };
        self.directory.change_pin(&req).await
    }
}

fn check_device(record: &EncryptedIdentityRecord, device_id: &str) -> Result<(), E2eeError> {
    if record.device_id != device_id {
        return Err(E2eeError::DeviceMismatch {
            stored: record.device_id.clone(),
            requested: device_id.to_string(),
        });
    }
    Ok(())
}
