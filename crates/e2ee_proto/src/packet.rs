//! Encrypted message packet and the message cipher.
//!
//! ```json
//! {
//!   "v": 1, "alg": "AES-256-GCM",
//!   "conversationId": "…", "messageId": "…", "senderId": "…", "receiverId": "…",
//!   "sentAt": "2024-05-01T12:00:00.000Z",
//!   "iv_b64": "…", "ct_b64": "…"
//! }
//! ```
//!
//! The metadata travels in clear and is bound to the GCM tag as AAD:
//!
//! ```text
//! {"v":1,"conversationId":…,"messageId":…,"senderId":…,"receiverId":…,"sentAt":…}
//! ```
//!
//! On decrypt the AAD is rebuilt from the packet's own strings, never from
//! caller-supplied metadata. Packets that carry no ids at all predate AAD
//! binding and are opened without it; a packet that carries ids is never
//! retried without them.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use e2ee_crypto::{aead, ConversationKey, CryptoError};

use crate::error::PacketError;

pub const PACKET_VERSION: u8 = 1;
pub const PACKET_ALGORITHM: &str = "AES-256-GCM";

/// Display text for a message that could not be decrypted.
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "🔒 Encrypted message (could not be decrypted)";

// ── Metadata ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    pub conversation_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sent_at: DateTime<Utc>,
}

impl MessageMeta {
    pub fn new(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            sent_at,
        }
    }

    fn validate(&self) -> Result<(), PacketError> {
        for (name, value) in [
            ("conversationId", &self.conversation_id),
            ("messageId", &self.message_id),
            ("senderId", &self.sender_id),
            ("receiverId", &self.receiver_id),
        ] {
            if value.is_empty() {
                return Err(PacketError::InvalidArgument(format!("meta.{name} is required")));
            }
        }
        Ok(())
    }
}

pub fn format_sent_at(sent_at: &DateTime<Utc>) -> String {
    sent_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Canonical AAD. Field order is part of the format.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AadContext<'a> {
    v: u8,
    conversation_id: &'a str,
    message_id: &'a str,
    sender_id: &'a str,
    receiver_id: &'a str,
    sent_at: &'a str,
}

impl AadContext<'_> {
    fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        Ok(serde_json::to_vec(self)?)
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessagePacket {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "alg")]
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    /// Kept as the exact string that was bound into the AAD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    #[serde(rename = "iv_b64")]
    pub iv_b64: String,
    #[serde(rename = "ct_b64")]
    pub ct_b64: String,
}

enum Binding<'a> {
    Bound(AadContext<'a>),
    Legacy,
}

impl EncryptedMessagePacket {
    /// The participant on the other side of this packet from `local_user_id`.
    pub fn counterpart(&self, local_user_id: &str) -> Option<&str> {
        let sender = self.sender_id.as_deref()?;
        let receiver = self.receiver_id.as_deref()?;
        if sender == local_user_id {
            Some(receiver)
        } else if receiver == local_user_id {
            Some(sender)
        } else {
            None
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.conversation_id.is_none()
            && self.message_id.is_none()
            && self.sender_id.is_none()
            && self.receiver_id.is_none()
    }

    fn binding(&self) -> Result<Binding<'_>, PacketError> {
        let ids = [
            self.conversation_id.as_deref().filter(|s| !s.is_empty()),
            self.message_id.as_deref().filter(|s| !s.is_empty()),
            self.sender_id.as_deref().filter(|s| !s.is_empty()),
            self.receiver_id.as_deref().filter(|s| !s.is_empty()),
        ];
        match ids {
            [Some(conversation_id), Some(message_id), Some(sender_id), Some(receiver_id)] => {
                let sent_at = self.sent_at.as_deref().ok_or_else(|| {
                    PacketError::InvalidArgument("packet metadata is missing sentAt".into())
                })?;
                Ok(Binding::Bound(AadContext {
                    v: PACKET_VERSION,
                    conversation_id,
                    message_id,
                    sender_id,
                    receiver_id,
                    sent_at,
                }))
            }
            _ if self.is_legacy() => Ok(Binding::Legacy),
            _ => Err(PacketError::InvalidArgument(
                "packet metadata is partially present".into(),
            )),
        }
    }
}

// ── Cipher ────────────────────────────────────────────────────────────────────

pub fn encrypt_message(
    key: &ConversationKey,
    meta: &MessageMeta,
    plaintext: &str,
) -> Result<EncryptedMessagePacket, PacketError> {
    meta.validate()?;
    let sent_at = format_sent_at(&meta.sent_at);
    let aad = AadContext {
        v: PACKET_VERSION,
        conversation_id: &meta.conversation_id,
        message_id: &meta.message_id,
        sender_id: &meta.sender_id,
        receiver_id: &meta.receiver_id,
        sent_at: &sent_at,
    }
    .to_bytes()?;

    let (nonce, ciphertext) = aead::encrypt(key.as_bytes(), plaintext.as_bytes(), &aad)?;

    Ok(EncryptedMessagePacket {
        version: PACKET_VERSION,
        algorithm: PACKET_ALGORITHM.to_string(),
        conversation_id: Some(meta.conversation_id.clone()),
        message_id: Some(meta.message_id.clone()),
        sender_id: Some(meta.sender_id.clone()),
        receiver_id: Some(meta.receiver_id.clone()),
        sent_at: Some(sent_at),
        iv_b64: STANDARD.encode(nonce),
        ct_b64: STANDARD.encode(ciphertext),
    })
}

pub fn decrypt_message(
    key: &ConversationKey,
    packet: &EncryptedMessagePacket,
) -> Result<String, PacketError> {
    if packet.version != PACKET_VERSION {
        return Err(PacketError::UnsupportedFormat(format!("packet version {}", packet.version)));
    }
    if packet.algorithm != PACKET_ALGORITHM {
        return Err(PacketError::UnsupportedFormat(format!(
            "packet algorithm '{}'",
            packet.algorithm
        )));
    }

    let nonce = STANDARD
        .decode(&packet.iv_b64)
        .map_err(|e| PacketError::InvalidArgument(format!("iv_b64: {e}")))?;
    if nonce.len() != aead::NONCE_LEN {
        return Err(PacketError::InvalidArgument(format!(
            "iv must be {} bytes, got {}",
            aead::NONCE_LEN,
            nonce.len()
        )));
    }
    let ciphertext = STANDARD
        .decode(&packet.ct_b64)
        .map_err(|e| PacketError::InvalidArgument(format!("ct_b64: {e}")))?;

    let aad = match packet.binding()? {
        Binding::Bound(ctx) => ctx.to_bytes()?,
        Binding::Legacy => Vec::new(),
    };

    let plaintext = aead::decrypt(key.as_bytes(), &nonce, &ciphertext, &aad).map_err(|e| match e {
        CryptoError::AeadDecrypt => PacketError::AuthenticationFailure,
        other => PacketError::Crypto(other),
    })?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| PacketError::UnsupportedFormat("plaintext is not UTF-8".into()))
}

// ── Display ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptedBody {
    Plaintext(String),
    Undecryptable,
}

impl DecryptedBody {
    pub fn display_text(&self) -> &str {
        match self {
            DecryptedBody::Plaintext(text) => text,
            DecryptedBody::Undecryptable => UNDECRYPTABLE_PLACEHOLDER,
        }
    }
}
