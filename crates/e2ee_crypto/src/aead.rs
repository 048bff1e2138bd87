//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce, 128-bit tag).
//! Key size: 32 bytes.  Nonce: 12 bytes, drawn from the OS RNG on every call.
//!
//! Unlike a framed format, the nonce travels in its own field (`iv_b64` on the
//! wire), so `encrypt` returns it separately from the ciphertext.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

/// Encrypt `plaintext` under a 32-byte key with a fresh random nonce.
/// `aad`: additional associated data (authenticated but not encrypted).
///
/// Returns `(nonce, ciphertext || tag)`.
pub fn encrypt(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut nonce_out = [0u8; NONCE_LEN];
    nonce_out.copy_from_slice(&nonce);
    Ok((nonce_out, ciphertext))
}

/// Decrypt `ciphertext || tag` with the nonce it was sealed under.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidInput(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}
