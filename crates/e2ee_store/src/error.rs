use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored JSON no longer parses as an identity record.
    #[error("Stored identity record is corrupt: {0}")]
    Corrupt(String),

    #[error("Refusing to store invalid record: {0}")]
    InvalidRecord(#[from] e2ee_proto::PacketError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
