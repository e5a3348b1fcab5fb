use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend's access rules rejected the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A record expected to exist was not found.
    #[error("Record not found")]
    NotFound,

    /// The realtime connection is currently offline.
    #[error("Not connected to the realtime store")]
    Disconnected,

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (database directory, blob files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value did not match the expected record shape.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid id or path.
    #[error("Invalid key: {0}")]
    InvalidKey(#[from] ebchat_shared::SharedError),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("Blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    #[error("Blob storage error: {0}")]
    BlobStorage(String),
}

impl StoreError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
