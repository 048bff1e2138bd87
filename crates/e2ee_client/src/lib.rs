//! e2ee_client: device identity lifecycle and session keys for WebChat DMs
//!
//! # Modules
//! - `identity`     Create / unlock / forget the per-device identity
//! - `context`      Per-session state: identity slot, key caches, message helpers
//! - `registration` Publish public bundle, restore from directory backup
//! - `rotation`     Re-wrap the identity under a new PIN
//! - `peer_cache`   Peer public bundles, most recent device wins
//! - `directory`    Key directory clients (HTTP and in-memory)
//! - `config`       `E2EE_*` environment configuration
//!
//! # Security notes
//! Conversation keys are static per (device pair, conversation); there is no
//! ratchet. Compromise of a device's ECDH private key exposes that device's
//! full conversation history.

mod cache;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod identity;
pub mod peer_cache;
pub mod registration;
pub mod rotation;
mod wrap;

pub use config::ClientConfig;
pub use context::E2eeContext;
pub use directory::{HttpKeyDirectory, KeyDirectory, MemoryKeyDirectory};
pub use error::E2eeError;
pub use identity::{DeviceIdentity, IdentityManager};
pub use peer_cache::PeerKeyCache;
pub use rotation::{PublishOutcome, RotationResult};

pub const DEFAULT_LOG_FILTER: &str = "e2ee_client=info,e2ee_store=info";

/// Install the fmt subscriber, honouring `RUST_LOG`. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .try_init();
}
