//! Storage error types.

use thiserror::Error;

/// Storage operation errors
///
/// None of these leave a partially applied batch behind.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend read or write failure
    #[error("Database error: {0}")]
    Database(String),

    /// Key or value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored value does not decode as the requested type
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Column family not opened by this store
    #[error("Invalid column family: {0}")]
    InvalidColumnFamily(String),

    /// Batch commit rejected
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// A writer panicked while holding the in-memory tables
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
