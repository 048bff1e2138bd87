//! e2ee_store: Durable local store for the encrypted identity record
//!
//! The store never sees plaintext key material: it persists exactly one
//! [`EncryptedIdentityRecord`] per device install, at logical key
//! [`IDENTITY_RECORD_KEY`]. Wrapping and unwrapping happen in `e2ee_client`.
//!
//! # Backends
//! - [`SqliteIdentityStore`]: sqlx SQLite file, migrations in `migrations/`
//!   run on open.
//! - [`MemoryIdentityStore`]: process-local, for tests and ephemeral sessions.

pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use e2ee_proto::EncryptedIdentityRecord;

pub use error::StoreError;
pub use memory::MemoryIdentityStore;
pub use sqlite::SqliteIdentityStore;

pub const IDENTITY_RECORD_KEY: &str = "identity_v1";

/// Single-record key-value store for the identity blob.
///
/// Writes replace the previous record atomically; there is never more than
/// one record per store.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load(&self) -> Result<Option<EncryptedIdentityRecord>, StoreError>;

    async fn save(&self, record: &EncryptedIdentityRecord) -> Result<(), StoreError>;

    /// Remove the record. Deleting an absent record is not an error.
    async fn delete(&self) -> Result<(), StoreError>;
}
