//! e2ee_proto: Wire types and serialisation for WebChat E2EE
//!
//! All on-wire types are JSON with the field names the browser client and
//! the key directory already speak, and are versioned (`v`) so the format can
//! change without breaking stored data.
//!
//! # Modules
//! - `record`: Encrypted identity record (the only persisted private-key form)
//! - `packet`: Encrypted message packet + the message cipher
//! - `api`: Key directory request/response bodies
//! - `error`: packet/record error type

pub mod api;
pub mod error;
pub mod packet;
pub mod record;

pub use error::PacketError;
pub use packet::{DecryptedBody, EncryptedMessagePacket, MessageMeta};
pub use record::{CipherDescriptor, EncryptedIdentityRecord, KdfDescriptor, WrappedIdentityPayload};
