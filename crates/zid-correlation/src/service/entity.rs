//! Entity operations: create, update, delete.

use crate::{
    errors::*,
    index::ChangeSet,
    locks::LockKey,
    traits::MountRegistry,
    types::*,
};
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;
use zid_storage::Storage;

use super::{parse_entity_id, CorrelationService};

impl<M, S> CorrelationService<M, S>
where
    M: MountRegistry + 'static,
    S: Storage + 'static,
{
    pub(crate) async fn create_entity_internal(
        &self,
        request: CreateEntityRequest,
    ) -> Result<Entity> {
        let name = normalize_name(request.name);
        let name_lock = name.clone().map(LockKey::EntityName);
        let guard = self.locks.acquire(name_lock.iter(), []).await;

        if let Some(name) = &name {
            if self.index.read().await.entity_by_name(name).is_some() {
                return Err(CorrelationError::InvalidName(name.clone()));
            }
        }

        let now = current_timestamp();
        let entity = Entity {
            id: Uuid::new_v4(),
            name,
            aliases: BTreeSet::new(),
            metadata: request.metadata,
            disabled: false,
            merged_entity_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let changes = ChangeSet {
            put_entities: vec![entity.clone()],
            ..Default::default()
        };
        self.commit(changes, guard).await?;

        info!(entity_id = %entity.id, name = ?entity.name, "Created entity");
        Ok(entity)
    }

    pub(crate) async fn update_entity_internal(
        &self,
        entity_id: &str,
        update: EntityUpdate,
    ) -> Result<Entity> {
        let id = parse_entity_id(entity_id)?;

        // Some(None) clears the name
        let new_name = update.name.map(|n| normalize_name(Some(n)));
        let name_lock = new_name.clone().flatten().map(LockKey::EntityName);
        let guard = self.locks.acquire(name_lock.iter(), [&id]).await;

        let mut entity = {
            let index = self.index.read().await;
            let entity = index
                .entity(&id)
                .cloned()
                .ok_or_else(|| CorrelationError::EntityNotFound(entity_id.to_string()))?;

            if let Some(Some(name)) = &new_name {
                if matches!(index.entity_by_name(name), Some(other) if other.id != id) {
                    return Err(CorrelationError::InvalidName(name.clone()));
                }
            }
            entity
        };

        if let Some(name) = new_name {
            entity.name = name;
        }
        if let Some(metadata) = update.metadata {
            entity.metadata = metadata;
        }
        if let Some(disabled) = update.disabled {
            entity.disabled = disabled;
        }
        entity.updated_at = current_timestamp();

        let changes = ChangeSet {
            put_entities: vec![entity.clone()],
            ..Default::default()
        };
        self.commit(changes, guard).await?;

        info!(entity_id = %id, "Updated entity");
        Ok(entity)
    }

    pub(crate) async fn delete_entity_internal(&self, entity_id: &str) -> Result<()> {
        let id = parse_entity_id(entity_id)?;
        let not_found = || CorrelationError::EntityNotFound(entity_id.to_string());

        loop {
            let owned = {
                let index = self.index.read().await;
                let entity = index.entity(&id).ok_or_else(not_found)?;
                owned_keys(&index, entity)
            };

            let lock_keys: Vec<LockKey> = owned
                .iter()
                .map(|(_, key)| LockKey::Alias(key.clone()))
                .collect();
            let guard = self.locks.acquire(&lock_keys, [&id]).await;

            let changes = {
                let index = self.index.read().await;
                let entity = index.entity(&id).ok_or_else(not_found)?;
                if owned_keys(&index, entity) != owned {
                    // Aliases changed between the read and the lock; retry
                    continue;
                }
                ChangeSet {
                    delete_entities: vec![id],
                    delete_aliases: owned.iter().map(|(alias_id, _)| *alias_id).collect(),
                    ..Default::default()
                }
            };

            self.commit(changes, guard).await?;
            info!(entity_id = %id, aliases = owned.len(), "Deleted entity");
            return Ok(());
        }
    }
}

fn owned_keys(index: &crate::index::Index, entity: &Entity) -> Vec<(Uuid, AliasKey)> {
    index
        .aliases_of(entity)
        .map(|alias| (alias.id, alias.key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::test_support::service;
    use crate::{CorrelationApi, CorrelationError, CreateEntityRequest, EntityUpdate};

    #[tokio::test]
    async fn test_create_entity_rejects_duplicate_name() {
        let (svc, _mounts) = service().await;
        svc.create_entity(CreateEntityRequest {
            name: Some("bob-smith".into()),
            ..Default::default()
        })
        .await
        .unwrap();

        let err = svc
            .create_entity(CreateEntityRequest {
                name: Some("bob-smith".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::InvalidName(name) if name == "bob-smith"));
    }

    #[tokio::test]
    async fn test_unnamed_entities_do_not_collide() {
        let (svc, _mounts) = service().await;
        for _ in 0..3 {
            svc.create_entity(CreateEntityRequest {
                name: Some(String::new()),
                ..Default::default()
            })
            .await
            .unwrap();
        }
        assert_eq!(svc.list_entities().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_entity_name_and_flags() {
        let (svc, _mounts) = service().await;
        let entity = svc
            .create_entity(CreateEntityRequest {
                name: Some("old".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = entity.id.to_string();

        let updated = svc
            .update_entity(
                &id,
                EntityUpdate {
                    name: Some("new".into()),
                    disabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("new"));
        assert!(updated.disabled);

        // The old name is free again and the new one resolves
        assert!(svc.get_entity_by_name("old").await.is_err());
        assert_eq!(svc.get_entity_by_name("new").await.unwrap().id, entity.id);

        // Renaming to its own name is fine
        svc.update_entity(
            &id,
            EntityUpdate {
                name: Some("new".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_update_entity_name_collision() {
        let (svc, _mounts) = service().await;
        svc.create_entity(CreateEntityRequest {
            name: Some("taken".into()),
            ..Default::default()
        })
        .await
        .unwrap();
        let other = svc.create_entity(CreateEntityRequest::default()).await.unwrap();

        let err = svc
            .update_entity(
                &other.id.to_string(),
                EntityUpdate {
                    name: Some("taken".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::InvalidName(_)));
        assert_eq!(svc.get_entity(&other.id.to_string()).await.unwrap(), other);
    }

    #[tokio::test]
    async fn test_malformed_ids_are_not_found() {
        let (svc, _mounts) = service().await;
        let err = svc.get_entity("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, CorrelationError::EntityNotFound(_)));
        assert!(svc.delete_entity("???").await.unwrap_err().is_not_found());
    }
}
