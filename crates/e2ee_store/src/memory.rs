//! In-memory identity store. Cheap to clone; clones share the record.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use e2ee_proto::EncryptedIdentityRecord;

use crate::{error::StoreError, IdentityStore};

#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    inner: Arc<RwLock<Option<EncryptedIdentityRecord>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> Result<Option<EncryptedIdentityRecord>, StoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, record: &EncryptedIdentityRecord) -> Result<(), StoreError> {
        record.validate()?;
        *self.inner.write().await = Some(record.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        *self.inner.write().await = None;
        Ok(())
    }
}
