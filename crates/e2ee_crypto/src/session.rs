//! Per-conversation key derivation.
//!
//! Both participants of a direct conversation derive the same AES-256 key:
//!
//!   shared = ECDH(my_dh_private, their_dh_public)                (256 bits)
//!   salt   = SHA-256("salt|" || conversation_id)
//!   info   = "e2ee-dm-v1|" || conversation_id || "|" || min(a,b) || "|" || max(a,b)
//!   key    = HKDF-SHA256(salt, shared, info) → 32 bytes
//!
//! The salt is domain separation, not entropy. Sorting the user ids makes the
//! info string identical from either side.
//!
//! Limitation: the key is a pure function of the two static key-agreement
//! keys and the conversation id. There is no ratchet and no per-message key,
//! so compromise of either device's static ECDH private key exposes every
//! message ever sent in that conversation.

use p256::PublicKey;
use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

use crate::{error::CryptoError, identity::DhKeyPair, kdf};

pub const INFO_PREFIX: &str = "e2ee-dm-v1";

/// 32-byte AES-256-GCM conversation key. In memory only; zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

pub fn conversation_salt(conversation_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"salt|");
    hasher.update(conversation_id.as_bytes());
    hasher.finalize().into()
}

pub fn conversation_info(conversation_id: &str, my_user_id: &str, their_user_id: &str) -> String {
    let a = my_user_id.trim();
    let b = their_user_id.trim();
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    format!("{INFO_PREFIX}|{conversation_id}|{low}|{high}")
}

pub fn derive_conversation_key(
    my_dh: &DhKeyPair,
    their_dh_public: &PublicKey,
    conversation_id: &str,
    my_user_id: &str,
    their_user_id: &str,
) -> Result<ConversationKey, CryptoError> {
    if conversation_id.is_empty() {
        return Err(CryptoError::InvalidInput("conversation id is required".into()));
    }
    if my_user_id.trim().is_empty() || their_user_id.trim().is_empty() {
        return Err(CryptoError::InvalidInput("both user ids are required".into()));
    }

    let shared = my_dh.diffie_hellman(their_dh_public);
    let salt = conversation_salt(conversation_id);
    let info = conversation_info(conversation_id, my_user_id, their_user_id);

    let mut key = [0u8; 32];
    kdf::hkdf_expand(shared.as_slice(), Some(&salt), info.as_bytes(), &mut key)?;
    Ok(ConversationKey(key))
}
