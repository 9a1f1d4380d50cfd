use thiserror::Error;

/// Errors that can occur during conversation store operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// The requested conversation does not exist in the database.
    #[error("conversation not found: {id}")]
    NotFound { id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Usage metadata could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database directory could not be created.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An export file was written by an incompatible format version.
    #[error("unsupported export version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Another thread panicked while holding the connection.
    #[error("database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ConversationError>;
