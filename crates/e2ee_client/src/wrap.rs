//! PIN wrapping of the identity payload.
//!
//!   wrap_key = PBKDF2-HMAC-SHA256(NFKC(pin), salt, iter) → 32 bytes
//!   enc      = AES-256-GCM(wrap_key, fresh 96-bit nonce, payload JSON)
//!
//! No AAD: records written by the browser client must stay readable.

use chrono::Utc;
use zeroize::Zeroizing;

use e2ee_crypto::{aead, kdf, CryptoError, DeviceKeys};
use e2ee_proto::record::RECORD_VERSION;
use e2ee_proto::{CipherDescriptor, EncryptedIdentityRecord, KdfDescriptor, WrappedIdentityPayload};

use crate::error::E2eeError;

/// Fresh salt + nonce, then encrypt `payload` under `pin`.
pub(crate) fn wrap_payload(
    payload: &[u8],
    pin: &str,
    iterations: u32,
) -> Result<(KdfDescriptor, CipherDescriptor), E2eeError> {
    let salt = kdf::generate_salt();
    let key = kdf::wrapping_key_from_pin(pin, &salt, iterations, kdf::PBKDF2_HASH)?;
    let (nonce, ciphertext) = aead::encrypt(key.as_bytes(), payload, b"")?;
    Ok((
        KdfDescriptor::pbkdf2_sha256(&salt, iterations),
        CipherDescriptor::aes_gcm(&nonce, &ciphertext),
    ))
}

/// Decrypt the record payload bytes. A tag mismatch is `AuthenticationFailure`.
pub(crate) fn unwrap_payload(
    record: &EncryptedIdentityRecord,
    pin: &str,
) -> Result<Zeroizing<Vec<u8>>, E2eeError> {
    if record.version != RECORD_VERSION {
        return Err(E2eeError::CorruptRecord(format!(
            "unsupported identity record version {}",
            record.version
        )));
    }
    let salt = record.kdf.salt().map_err(corrupt)?;
    let nonce = record.ciphertext.iv().map_err(corrupt)?;
    let ciphertext = record.ciphertext.ciphertext().map_err(corrupt)?;

    let key = kdf::wrapping_key_from_pin(pin, &salt, record.kdf.iterations, &record.kdf.hash)
        .map_err(|e| E2eeError::CorruptRecord(e.to_string()))?;
    aead::decrypt(key.as_bytes(), &nonce, &ciphertext, b"").map_err(|e| match e {
        CryptoError::AeadDecrypt => E2eeError::AuthenticationFailure,
        other => E2eeError::CorruptRecord(other.to_string()),
    })
}

/// Build a fresh record for `keys`.
pub(crate) fn seal_identity(
    keys: &DeviceKeys,
    device_id: &str,
    pin: &str,
    iterations: u32,
) -> Result<EncryptedIdentityRecord, E2eeError> {
    let payload = WrappedIdentityPayload {
        device_id: device_id.to_string(),
        priv_jwks: keys.to_private_jwks(),
        pub_jwks: keys.public_jwks(),
    };
    let bytes = payload.to_bytes()?;
    let (kdf, ciphertext) = wrap_payload(&bytes, pin, iterations)?;
    let now = Utc::now();
    Ok(EncryptedIdentityRecord {
        version: RECORD_VERSION,
        device_id: device_id.to_string(),
        kdf,
        ciphertext,
        created_at: now,
        updated_at: now,
    })
}

/// Decrypt and import. The payload must name the record's device and its
/// public keys must match the ones derived from the private scalars.
pub(crate) fn open_identity(
    record: &EncryptedIdentityRecord,
    pin: &str,
) -> Result<DeviceKeys, E2eeError> {
    let bytes = unwrap_payload(record, pin)?;
    let payload = WrappedIdentityPayload::from_bytes(&bytes).map_err(corrupt)?;

    if payload.device_id != record.device_id {
        return Err(E2eeError::CorruptRecord(format!(
            "payload names device '{}' but record is for '{}'",
            payload.device_id, record.device_id
        )));
    }
    let keys = DeviceKeys::from_private_jwks(&payload.priv_jwks)
        .map_err(|e| E2eeError::CorruptRecord(e.to_string()))?;
    if !keys.matches_public(&payload.pub_jwks) {
        return Err(E2eeError::CorruptRecord(
            "stored public keys do not match the private keys".into(),
        ));
    }
    Ok(keys)
}

fn corrupt(e: e2ee_proto::PacketError) -> E2eeError {
    E2eeError::CorruptRecord(e.to_string())
}
