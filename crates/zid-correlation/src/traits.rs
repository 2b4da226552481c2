//! Correlation engine trait definitions.

use crate::{errors::Result, types::*};
use async_trait::async_trait;

/// Resolves mount accessors to enabled authentication mounts
///
/// Implemented by the surrounding system. Lookups may block, so the engine
/// always calls this before taking any of its own locks.
#[async_trait]
pub trait MountRegistry: Send + Sync {
    /// Resolve an accessor, `Ok(None)` if unknown or disabled
    async fn resolve(&self, mount_accessor: &str) -> Result<Option<MountEntry>>;
}

/// Identity correlation operations
///
/// All IDs are accepted as strings; malformed IDs fail as not found.
#[async_trait]
pub trait CorrelationApi: Send + Sync {
    // ========================================================================
    // Authentication path
    // ========================================================================

    /// Return the alias and entity for a login, creating both on first sight
    ///
    /// Idempotent for an existing `(mount_accessor, name)`. When
    /// `canonical_id` is given, a new alias attaches to that entity. Never
    /// merges entities.
    async fn resolve_or_create_alias(
        &self,
        mount_accessor: &str,
        name: &str,
        canonical_id: Option<&str>,
    ) -> Result<ResolvedAlias>;

    // ========================================================================
    // Entities
    // ========================================================================

    async fn create_entity(&self, request: CreateEntityRequest) -> Result<Entity>;

    async fn get_entity(&self, entity_id: &str) -> Result<Entity>;

    async fn get_entity_by_name(&self, name: &str) -> Result<Entity>;

    async fn update_entity(&self, entity_id: &str, update: EntityUpdate) -> Result<Entity>;

    /// Delete an entity together with every alias it owns
    async fn delete_entity(&self, entity_id: &str) -> Result<()>;

    /// Absorb `from_ids` into `into_id`, all or nothing
    async fn merge_entities(
        &self,
        into_id: &str,
        from_ids: &[String],
        options: MergeOptions,
    ) -> Result<Entity>;

    async fn list_entities(&self) -> Result<Listing<EntityInfo>>;

    // ========================================================================
    // Aliases
    // ========================================================================

    /// Create an alias, failing if its key is already taken
    async fn create_alias(&self, request: CreateAliasRequest) -> Result<Alias>;

    async fn get_alias(&self, alias_id: &str) -> Result<Alias>;

    async fn lookup_alias(&self, mount_accessor: &str, name: &str) -> Result<Alias>;

    /// Rename an alias without ever changing its owner
    async fn rename_alias(&self, alias_id: &str, new_name: &str) -> Result<Alias>;

    async fn update_alias_metadata(&self, alias_id: &str, metadata: Metadata) -> Result<Alias>;

    async fn delete_alias(&self, alias_id: &str) -> Result<()>;

    async fn list_aliases(&self) -> Result<Listing<AliasInfo>>;
}
