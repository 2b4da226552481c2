//! Correlation service implementation.

mod alias;
mod entity;
mod list;
mod merge;

use crate::{
    errors::*,
    index::{ChangeSet, Index},
    locks::{LockGuard, LockManager},
    traits::*,
    types::*,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;
use zid_storage::{Storage, CF_ALIASES, CF_ENTITIES};

/// Correlation service implementation
///
/// Owns the in-memory index over the storage backend. Every mutation takes
/// its locks, validates against the index, commits one storage batch and
/// only then applies the same records to the index.
pub struct CorrelationService<M, S>
where
    M: MountRegistry,
    S: Storage,
{
    pub(super) mounts: Arc<M>,
    pub(super) storage: Arc<S>,
    pub(super) index: Arc<RwLock<Index>>,
    pub(super) locks: LockManager,
}

impl<M, S> CorrelationService<M, S>
where
    M: MountRegistry,
    S: Storage,
{
    /// Rebuild the index from storage and return a ready service
    pub async fn load(mounts: Arc<M>, storage: Arc<S>, config: CorrelationConfig) -> Result<Self> {
        let entities: Vec<(Vec<u8>, Entity)> = storage.scan_all(CF_ENTITIES).await?;
        let aliases: Vec<(Vec<u8>, Alias)> = storage.scan_all(CF_ALIASES).await?;

        let index = Index::from_records(
            entities.into_iter().map(|(_, e)| e),
            aliases.into_iter().map(|(_, a)| a),
        )?;

        info!(
            entities = index.entity_count(),
            aliases = index.alias_count(),
            "Loaded identity index"
        );

        Ok(Self {
            mounts,
            storage,
            index: Arc::new(RwLock::new(index)),
            locks: LockManager::new(config.lock_slots),
        })
    }

    /// Verify every invariant over the current index
    pub async fn check_invariants(&self) -> Result<()> {
        self.index.read().await.check_invariants()
    }

    /// Copy of the current index
    pub async fn snapshot(&self) -> Index {
        self.index.read().await.clone()
    }

    /// Resolve a mount accessor. Must be called before taking any lock.
    pub(super) async fn resolve_mount(&self, mount_accessor: &str) -> Result<MountEntry> {
        self.mounts
            .resolve(mount_accessor)
            .await?
            .ok_or_else(|| CorrelationError::MountUnknown(mount_accessor.to_string()))
    }

    /// Persist a change set, then apply it to the index
    ///
    /// `guard` holds the locks covering every record in `changes`. The
    /// durable commit and the index apply run in their own task together
    /// with the guard, so dropping the caller cannot separate them. On a
    /// failed commit the index is left untouched.
    pub(super) async fn commit(&self, changes: ChangeSet, guard: LockGuard) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut batch = self.storage.begin_transaction().await?;
        if let Err(e) = changes.write_to(batch.as_mut()) {
            batch.rollback();
            return Err(e.into());
        }

        let index = Arc::clone(&self.index);
        let task = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = batch.commit().await {
                warn!(error = %e, "Identity commit failed; index unchanged");
                return Err(CorrelationError::from(e));
            }
            index.write().await.apply(changes);
            Ok(())
        });

        task.await.map_err(|e| {
            CorrelationError::CorruptState(format!("identity commit task failed: {e}"))
        })?
    }
}

/// Parse an entity ID, treating malformed input as not found
pub(super) fn parse_entity_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| CorrelationError::EntityNotFound(id.to_string()))
}

/// Parse an alias ID, treating malformed input as not found
pub(super) fn parse_alias_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| CorrelationError::AliasNotFound(id.to_string()))
}

#[async_trait]
impl<M, S> CorrelationApi for CorrelationService<M, S>
where
    M: MountRegistry + 'static,
    S: Storage + 'static,
{
    async fn resolve_or_create_alias(
        &self,
        mount_accessor: &str,
        name: &str,
        canonical_id: Option<&str>,
    ) -> Result<ResolvedAlias> {
        self.resolve_or_create_alias_internal(mount_accessor, name, canonical_id)
            .await
    }

    async fn create_entity(&self, request: CreateEntityRequest) -> Result<Entity> {
        self.create_entity_internal(request).await
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Entity> {
        let id = parse_entity_id(entity_id)?;
        self.index
            .read()
            .await
            .entity(&id)
            .cloned()
            .ok_or_else(|| CorrelationError::EntityNotFound(entity_id.to_string()))
    }

    async fn get_entity_by_name(&self, name: &str) -> Result<Entity> {
        self.index
            .read()
            .await
            .entity_by_name(name)
            .cloned()
            .ok_or_else(|| CorrelationError::EntityNotFound(name.to_string()))
    }

    async fn update_entity(&self, entity_id: &str, update: EntityUpdate) -> Result<Entity> {
        self.update_entity_internal(entity_id, update).await
    }

    async fn delete_entity(&self, entity_id: &str) -> Result<()> {
        self.delete_entity_internal(entity_id).await
    }

    async fn merge_entities(
        &self,
        into_id: &str,
        from_ids: &[String],
        options: MergeOptions,
    ) -> Result<Entity> {
        self.merge_entities_internal(into_id, from_ids, options)
            .await
    }

    async fn list_entities(&self) -> Result<Listing<EntityInfo>> {
        Ok(self.list_entities_internal().await)
    }

    async fn create_alias(&self, request: CreateAliasRequest) -> Result<Alias> {
        self.create_alias_internal(request).await
    }

    async fn get_alias(&self, alias_id: &str) -> Result<Alias> {
        let id = parse_alias_id(alias_id)?;
        self.index
            .read()
            .await
            .alias(&id)
            .cloned()
            .ok_or_else(|| CorrelationError::AliasNotFound(alias_id.to_string()))
    }

    async fn lookup_alias(&self, mount_accessor: &str, name: &str) -> Result<Alias> {
        self.index
            .read()
            .await
            .alias_by_key(&AliasKey::new(mount_accessor, name))
            .cloned()
            .ok_or_else(|| CorrelationError::AliasNotFound(format!("{mount_accessor}/{name}")))
    }

    async fn rename_alias(&self, alias_id: &str, new_name: &str) -> Result<Alias> {
        self.rename_alias_internal(alias_id, new_name).await
    }

    async fn update_alias_metadata(&self, alias_id: &str, metadata: Metadata) -> Result<Alias> {
        self.update_alias_metadata_internal(alias_id, metadata)
            .await
    }

    async fn delete_alias(&self, alias_id: &str) -> Result<()> {
        self.delete_alias_internal(alias_id).await
    }

    async fn list_aliases(&self) -> Result<Listing<AliasInfo>> {
        Ok(self.list_aliases_internal().await)
    }
}
