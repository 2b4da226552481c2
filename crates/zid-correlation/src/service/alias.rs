//! Alias operations: login resolution, create, rename, metadata, delete.

use crate::{
    errors::*,
    index::{ChangeSet, Index},
    locks::LockKey,
    traits::MountRegistry,
    types::*,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zid_storage::Storage;

use super::{parse_alias_id, parse_entity_id, CorrelationService};

/// Where a new alias should live
struct Attachment<'a> {
    key: &'a AliasKey,
    mount: MountEntry,
    /// Parsed and raw canonical ID, `None` to create a fresh entity
    canonical: Option<(Uuid, &'a str)>,
    metadata: Metadata,
}

/// Build the records for a new alias and its owner
fn attach_alias(index: &Index, attachment: Attachment<'_>) -> Result<(Alias, ChangeSet)> {
    let now = current_timestamp();

    let mut owner = match attachment.canonical {
        Some((id, raw)) => {
            let mut entity = index
                .entity(&id)
                .cloned()
                .ok_or_else(|| CorrelationError::EntityNotFound(raw.to_string()))?;
            entity.updated_at = now;
            entity
        }
        None => Entity {
            id: Uuid::new_v4(),
            name: None,
            aliases: BTreeSet::new(),
            metadata: Metadata::new(),
            disabled: false,
            merged_entity_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        },
    };

    let alias = Alias {
        id: Uuid::new_v4(),
        name: attachment.key.name.clone(),
        mount_accessor: attachment.key.mount_accessor.clone(),
        mount_path: attachment.mount.mount_path,
        mount_type: attachment.mount.mount_type,
        canonical_id: owner.id,
        metadata: attachment.metadata,
        created_at: now,
        updated_at: now,
    };
    owner.aliases.insert(alias.id);

    let changes = ChangeSet {
        put_entities: vec![owner],
        put_aliases: vec![alias.clone()],
        ..Default::default()
    };
    Ok((alias, changes))
}

/// Reject attaching `existing` to a different requested entity
fn check_same_owner(existing: &Alias, canonical: Option<Uuid>) -> Result<()> {
    match canonical {
        Some(requested) if requested != existing.canonical_id => {
            Err(CorrelationError::WouldMergeEntities {
                entity_id: requested,
                other_entity_id: existing.canonical_id,
                existing_alias_id: existing.id,
            })
        }
        _ => Ok(()),
    }
}

impl<M, S> CorrelationService<M, S>
where
    M: MountRegistry + 'static,
    S: Storage + 'static,
{
    pub(crate) async fn resolve_or_create_alias_internal(
        &self,
        mount_accessor: &str,
        name: &str,
        canonical_id: Option<&str>,
    ) -> Result<ResolvedAlias> {
        let mount = self.resolve_mount(mount_accessor).await?;
        let canonical = canonical_id.map(parse_entity_id).transpose()?;

        let key = AliasKey::new(mount_accessor, name);
        let lock_key = LockKey::Alias(key.clone());
        let guard = self.locks.acquire([&lock_key], canonical.iter()).await;

        let (alias, changes) = {
            let index = self.index.read().await;
            if let Some(existing) = index.alias_by_key(&key) {
                check_same_owner(existing, canonical)?;
                debug!(alias_id = %existing.id, "Resolved existing alias");
                return Ok(ResolvedAlias {
                    entity_id: existing.canonical_id,
                    alias_id: existing.id,
                    created: false,
                });
            }

            attach_alias(
                &index,
                Attachment {
                    key: &key,
                    mount,
                    canonical: canonical.zip(canonical_id),
                    metadata: Metadata::new(),
                },
            )?
        };

        self.commit(changes, guard).await?;

        info!(
            alias_id = %alias.id,
            entity_id = %alias.canonical_id,
            mount_accessor,
            "Created alias on login"
        );
        Ok(ResolvedAlias {
            entity_id: alias.canonical_id,
            alias_id: alias.id,
            created: true,
        })
    }

    pub(crate) async fn create_alias_internal(&self, request: CreateAliasRequest) -> Result<Alias> {
        let mount = self.resolve_mount(&request.mount_accessor).await?;
        let canonical = request
            .canonical_id
            .as_deref()
            .map(parse_entity_id)
            .transpose()?;

        let key = AliasKey::new(&request.mount_accessor, &request.name);
        let lock_key = LockKey::Alias(key.clone());
        let guard = self.locks.acquire([&lock_key], canonical.iter()).await;

        let (alias, changes) = {
            let index = self.index.read().await;
            if let Some(existing) = index.alias_by_key(&key) {
                check_same_owner(existing, canonical)?;
                return Err(CorrelationError::AliasAlreadyExists {
                    mount_accessor: key.mount_accessor,
                    name: key.name,
                });
            }

            attach_alias(
                &index,
                Attachment {
                    key: &key,
                    mount,
                    canonical: canonical.zip(request.canonical_id.as_deref()),
                    metadata: request.metadata,
                },
            )?
        };

        self.commit(changes, guard).await?;

        info!(
            alias_id = %alias.id,
            entity_id = %alias.canonical_id,
            mount_accessor = %alias.mount_accessor,
            "Created alias"
        );
        Ok(alias)
    }

    /// Rename an alias within its mount
    ///
    /// The owner never changes. A name held by another entity's alias is a
    /// hard failure, never a reason to move ownership.
    pub(crate) async fn rename_alias_internal(
        &self,
        alias_id: &str,
        new_name: &str,
    ) -> Result<Alias> {
        let id = parse_alias_id(alias_id)?;
        let not_found = || CorrelationError::AliasNotFound(alias_id.to_string());

        loop {
            let (current_key, owner) = {
                let index = self.index.read().await;
                let alias = index.alias(&id).ok_or_else(not_found)?;
                (alias.key(), alias.canonical_id)
            };
            let new_key = AliasKey::new(&current_key.mount_accessor, new_name);

            let lock_keys = [
                LockKey::Alias(current_key.clone()),
                LockKey::Alias(new_key.clone()),
            ];
            let guard = self.locks.acquire(&lock_keys, [&owner]).await;

            let renamed = {
                let index = self.index.read().await;
                let alias = index.alias(&id).ok_or_else(not_found)?;
                if alias.key() != current_key || alias.canonical_id != owner {
                    continue;
                }

                match index.alias_by_key(&new_key) {
                    Some(other) if other.id == alias.id => return Ok(alias.clone()),
                    Some(other) if other.canonical_id == alias.canonical_id => {
                        return Err(CorrelationError::AliasAlreadyExists {
                            mount_accessor: new_key.mount_accessor,
                            name: new_key.name,
                        });
                    }
                    Some(other) => {
                        warn!(
                            alias_id = %alias.id,
                            entity_id = %alias.canonical_id,
                            other_entity_id = %other.canonical_id,
                            "Rejected rename that would merge entities"
                        );
                        return Err(CorrelationError::WouldMergeEntities {
                            entity_id: alias.canonical_id,
                            other_entity_id: other.canonical_id,
                            existing_alias_id: other.id,
                        });
                    }
                    None => {}
                }

                let mut renamed = alias.clone();
                renamed.name = new_name.to_string();
                renamed.updated_at = current_timestamp();
                renamed
            };

            let changes = ChangeSet {
                put_aliases: vec![renamed.clone()],
                ..Default::default()
            };
            self.commit(changes, guard).await?;

            info!(alias_id = %id, from = %current_key.name, to = new_name, "Renamed alias");
            return Ok(renamed);
        }
    }

    pub(crate) async fn update_alias_metadata_internal(
        &self,
        alias_id: &str,
        metadata: Metadata,
    ) -> Result<Alias> {
        let id = parse_alias_id(alias_id)?;
        let not_found = || CorrelationError::AliasNotFound(alias_id.to_string());

        loop {
            let owner = self
                .index
                .read()
                .await
                .alias(&id)
                .map(|alias| alias.canonical_id)
                .ok_or_else(not_found)?;
            let guard = self.locks.acquire([], [&owner]).await;

            let updated = {
                let index = self.index.read().await;
                let alias = index.alias(&id).ok_or_else(not_found)?;
                if alias.canonical_id != owner {
                    continue;
                }
                let mut updated = alias.clone();
                updated.metadata = metadata.clone();
                updated.updated_at = current_timestamp();
                updated
            };

            let changes = ChangeSet {
                put_aliases: vec![updated.clone()],
                ..Default::default()
            };
            self.commit(changes, guard).await?;

            debug!(alias_id = %id, "Updated alias metadata");
            return Ok(updated);
        }
    }

    pub(crate) async fn delete_alias_internal(&self, alias_id: &str) -> Result<()> {
        let id = parse_alias_id(alias_id)?;
        let not_found = || CorrelationError::AliasNotFound(alias_id.to_string());

        loop {
            let (key, owner) = {
                let index = self.index.read().await;
                let alias = index.alias(&id).ok_or_else(not_found)?;
                (alias.key(), alias.canonical_id)
            };
            let lock_key = LockKey::Alias(key.clone());
            let guard = self.locks.acquire([&lock_key], [&owner]).await;

            let changes = {
                let index = self.index.read().await;
                let alias = index.alias(&id).ok_or_else(not_found)?;
                if alias.key() != key || alias.canonical_id != owner {
                    continue;
                }
                let mut entity = index.entity(&owner).cloned().ok_or_else(|| {
                    CorrelationError::CorruptState(format!(
                        "alias {} references missing entity {}",
                        id, owner
                    ))
                })?;
                entity.aliases.remove(&id);
                entity.updated_at = current_timestamp();

                ChangeSet {
                    put_entities: vec![entity],
                    delete_aliases: vec![id],
                    ..Default::default()
                }
            };

            self.commit(changes, guard).await?;
            info!(alias_id = %id, entity_id = %owner, "Deleted alias");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::service;
    use crate::{CorrelationApi, CorrelationError, CreateAliasRequest, Metadata};

    #[tokio::test]
    async fn test_login_is_idempotent() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("userpass", "userpass").unwrap();

        let first = svc
            .resolve_or_create_alias(&accessor, "bsmith", None)
            .await
            .unwrap();
        let second = svc
            .resolve_or_create_alias(&accessor, "bsmith", None)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.alias_id, second.alias_id);
        assert_eq!(first.entity_id, second.entity_id);
        assert_eq!(svc.list_entities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_login_with_foreign_canonical_id_never_reassigns() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("userpass", "userpass").unwrap();
        let existing = svc
            .resolve_or_create_alias(&accessor, "bsmith", None)
            .await
            .unwrap();
        let other = svc.create_entity(Default::default()).await.unwrap();

        let err = svc
            .resolve_or_create_alias(&accessor, "bsmith", Some(&other.id.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::WouldMergeEntities { .. }));

        let alias = svc.get_alias(&existing.alias_id.to_string()).await.unwrap();
        assert_eq!(alias.canonical_id, existing.entity_id);
    }

    #[tokio::test]
    async fn test_create_alias_unknown_mount() {
        let (svc, _mounts) = service().await;
        let err = svc
            .create_alias(CreateAliasRequest {
                name: "bob".into(),
                mount_accessor: "auth_userpass_missing".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::MountUnknown(_)));
        assert!(svc.list_entities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_alias_missing_canonical_entity() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("github", "github").unwrap();
        let err = svc
            .create_alias(CreateAliasRequest {
                name: "octocat".into(),
                mount_accessor: accessor,
                canonical_id: Some(uuid::Uuid::new_v4().to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::EntityNotFound(_)));
        assert!(svc.list_aliases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_alias_duplicate_key() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("github", "github").unwrap();
        let request = CreateAliasRequest {
            name: "octocat".into(),
            mount_accessor: accessor,
            ..Default::default()
        };

        svc.create_alias(request.clone()).await.unwrap();
        let err = svc.create_alias(request).await.unwrap_err();
        assert!(matches!(err, CorrelationError::AliasAlreadyExists { .. }));
        assert_eq!(svc.list_entities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_within_same_entity_collision() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("userpass", "userpass").unwrap();
        let first = svc
            .create_alias(CreateAliasRequest {
                name: "bob".into(),
                mount_accessor: accessor.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = svc
            .create_alias(CreateAliasRequest {
                name: "robert".into(),
                mount_accessor: accessor,
                canonical_id: Some(first.canonical_id.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = svc
            .rename_alias(&second.id.to_string(), "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::AliasAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_rename_to_own_name_is_noop() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("userpass", "userpass").unwrap();
        let alias = svc
            .create_alias(CreateAliasRequest {
                name: "bob".into(),
                mount_accessor: accessor,
                ..Default::default()
            })
            .await
            .unwrap();

        let renamed = svc.rename_alias(&alias.id.to_string(), "bob").await.unwrap();
        assert_eq!(renamed, alias);
    }

    #[tokio::test]
    async fn test_rename_frees_old_key() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("userpass", "userpass").unwrap();
        let alias = svc
            .create_alias(CreateAliasRequest {
                name: "bob".into(),
                mount_accessor: accessor.clone(),
                ..Default::default()
            })
            .await
            .unwrap();

        svc.rename_alias(&alias.id.to_string(), "robert").await.unwrap();

        assert!(svc.lookup_alias(&accessor, "bob").await.is_err());
        let found = svc.lookup_alias(&accessor, "robert").await.unwrap();
        assert_eq!(found.id, alias.id);
        assert_eq!(found.canonical_id, alias.canonical_id);

        let fresh = svc
            .resolve_or_create_alias(&accessor, "bob", None)
            .await
            .unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.entity_id, alias.canonical_id);
    }

    #[tokio::test]
    async fn test_update_alias_metadata() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("github", "github").unwrap();
        let alias = svc
            .create_alias(CreateAliasRequest {
                name: "octocat".into(),
                mount_accessor: accessor,
                ..Default::default()
            })
            .await
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("team".into(), "infra".into());
        let updated = svc
            .update_alias_metadata(&alias.id.to_string(), metadata.clone())
            .await
            .unwrap();
        assert_eq!(updated.metadata, metadata);
        assert_eq!(updated.canonical_id, alias.canonical_id);
    }

    #[tokio::test]
    async fn test_delete_alias_detaches_from_owner() {
        let (svc, mounts) = service().await;
        let accessor = mounts.enable_auth("github", "github").unwrap();
        let alias = svc
            .create_alias(CreateAliasRequest {
                name: "octocat".into(),
                mount_accessor: accessor.clone(),
                ..Default::default()
            })
            .await
            .unwrap();

        svc.delete_alias(&alias.id.to_string()).await.unwrap();

        let owner = svc.get_entity(&alias.canonical_id.to_string()).await.unwrap();
        assert!(owner.aliases.is_empty());
        assert!(svc.lookup_alias(&accessor, "octocat").await.is_err());
        assert!(svc.delete_alias(&alias.id.to_string()).await.unwrap_err().is_not_found());
        svc.check_invariants().await.unwrap();
    }
}
