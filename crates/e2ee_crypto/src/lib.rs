//! e2ee_crypto: WebChat E2EE cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited RustCrypto crates.
//! - Zeroize all secret material on drop.
//! - Key material is only ever exported as JWK, the format WebCrypto peers
//!   use on the wire.
//!
//! # Module layout
//! - `identity`: per-device P-256 signing + key-agreement key pairs
//! - `jwk`: EC JWK encoding, public-key validation, fingerprints
//! - `session`: per-conversation key derivation (ECDH → HKDF-SHA256)
//! - `aead`: AES-256-GCM encrypt/decrypt helpers
//! - `kdf`: PIN normalisation, PBKDF2 wrapping keys, HKDF
//! - `error`: unified error type

pub mod aead;
pub mod error;
pub mod identity;
pub mod jwk;
pub mod kdf;
pub mod session;

pub use error::CryptoError;
pub use identity::DeviceKeys;
pub use jwk::EcJwk;
pub use session::ConversationKey;
