//! Key derivation functions
//!
//! `wrapping_key_from_pin`: PBKDF2-HMAC-SHA256, derives the 32-byte key that
//!   wraps the device's private key material at rest.
//!
//! `hkdf_expand`: HKDF-SHA256, used for conversation key material.

use hkdf::Hkdf;
use hmac::Hmac;
use sha2::Sha256;
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroizing, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const PBKDF2_ALGORITHM: &str = "PBKDF2";
pub const PBKDF2_HASH: &str = "SHA-256";
/// Iteration count used for every newly wrapped record.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 210_000;
/// Upper bound for any iteration count read from a record or a backup.
pub const MAX_PBKDF2_ITERATIONS: u32 = 5_000_000;
pub const SALT_LEN: usize = 16;

// ── PIN handling ──────────────────────────────────────────────────────────────

/// NFKC-normalise a PIN. Whitespace is significant and not trimmed.
pub fn normalize_pin(pin: &str) -> Result<Zeroizing<String>, CryptoError> {
    let normalized: Zeroizing<String> = Zeroizing::new(pin.nfkc().collect());
    if normalized.is_empty() {
        return Err(CryptoError::InvalidInput("PIN is required".into()));
    }
    Ok(normalized)
}

// ── Wrapping key (PBKDF2) ─────────────────────────────────────────────────────

/// 32-byte key derived from the user's PIN. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct WrappingKey([u8; 32]);

impl WrappingKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive a wrapping key from an already-normalised PIN and the record salt.
///
/// Only SHA-256 is accepted for `hash`; records naming another PRF are
/// rejected rather than silently re-interpreted.
pub fn wrapping_key_from_pin(
    pin: &str,
    salt: &[u8],
    iterations: u32,
    hash: &str,
) -> Result<WrappingKey, CryptoError> {
    if hash != PBKDF2_HASH {
        return Err(CryptoError::KeyDerivation(format!(
            "unsupported PBKDF2 hash '{hash}'"
        )));
    }
    if iterations == 0 || iterations > MAX_PBKDF2_ITERATIONS {
        return Err(CryptoError::KeyDerivation(format!(
            "PBKDF2 iterations must be 1-{MAX_PBKDF2_ITERATIONS}, got {iterations}"
        )));
    }
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivation("PBKDF2 salt is empty".into()));
    }
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(pin.as_bytes(), salt, iterations, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(WrappingKey(output))
}

/// Generate a fresh random 16-byte salt (stored alongside the record, not secret).
pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

// ── HKDF-SHA256 ───────────────────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}
