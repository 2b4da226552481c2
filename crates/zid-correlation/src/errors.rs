//! Correlation engine error types.

use thiserror::Error;
use uuid::Uuid;

/// Correlation engine errors
///
/// Every variant is a per-request failure; none leaves partial state behind.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// Entity not found (includes malformed entity IDs)
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Alias not found (includes malformed alias IDs)
    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    /// Entity name already taken
    #[error("Entity name already in use: {0}")]
    InvalidName(String),

    /// Another alias already holds this (mount_accessor, name)
    #[error("Alias already exists: mount_accessor={mount_accessor}, name={name}")]
    AliasAlreadyExists {
        mount_accessor: String,
        name: String,
    },

    /// The request would fuse two distinct entities; use an explicit merge
    #[error(
        "Operation would merge entity {entity_id} into {other_entity_id} via alias {existing_alias_id}"
    )]
    WouldMergeEntities {
        entity_id: Uuid,
        other_entity_id: Uuid,
        existing_alias_id: Uuid,
    },

    /// Mount accessor does not denote an enabled mount
    #[error("Unknown mount accessor: {0}")]
    MountUnknown(String),

    /// Merge target also listed as a source
    #[error("Cannot merge entity {0} into itself")]
    SelfMerge(Uuid),

    /// Strict merge found a source alias on a mount the target already uses
    #[error("Merge conflict on alias {alias_id}: {reason}")]
    MergeConflict { alias_id: Uuid, reason: String },

    /// A writer panicked while holding the mount table
    #[error("Mount registry lock poisoned")]
    RegistryPoisoned,

    /// Persisted records violate an invariant
    #[error("Corrupt identity state: {0}")]
    CorruptState(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] zid_storage::StorageError),
}

impl CorrelationError {
    /// Whether the failure names a missing entity, alias or mount
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound(_) | Self::AliasNotFound(_) | Self::MountUnknown(_)
        )
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type for correlation operations
pub type Result<T> = std::result::Result<T, CorrelationError>;
