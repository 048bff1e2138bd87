//! SQLite backend via sqlx.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use tracing::{debug, info};

use e2ee_proto::EncryptedIdentityRecord;

use crate::{error::StoreError, IdentityStore, IDENTITY_RECORD_KEY};

/// Identity store backed by a SQLite file. Cheap to clone (pool is Arc internally).
#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    /// Open (or create) the database at `db_path` and run pending migrations.
    ///
    /// WAL is set on the connection options; SQLite refuses to change
    /// `journal_mode` inside the transaction sqlx wraps each migration in.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        info!(path = %db_path.display(), "identity store opened");
        Ok(Self { pool })
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn load(&self) -> Result<Option<EncryptedIdentityRecord>, StoreError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT record_json FROM identity_records WHERE record_key = ?")
                .bind(IDENTITY_RECORD_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
        }
    }

    async fn save(&self, record: &EncryptedIdentityRecord) -> Result<(), StoreError> {
        record.validate()?;
        let json = serde_json::to_string(record)?;

        sqlx::query(
            "INSERT INTO identity_records (record_key, record_json, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(record_key) DO UPDATE SET \
             record_json = excluded.record_json, updated_at = excluded.updated_at",
        )
        .bind(IDENTITY_RECORD_KEY)
        .bind(json)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(device_id = %record.device_id, "identity record written");
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM identity_records WHERE record_key = ?")
            .bind(IDENTITY_RECORD_KEY)
            .execute(&self.pool)
            .await?;
        debug!("identity record deleted");
        Ok(())
    }
}
