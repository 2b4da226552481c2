//! Listing with denormalized info records.

use crate::{traits::MountRegistry, types::*};
use zid_storage::Storage;

use super::CorrelationService;

impl<M, S> CorrelationService<M, S>
where
    M: MountRegistry + 'static,
    S: Storage + 'static,
{
    /// All aliases, built from one read of the index
    pub(crate) async fn list_aliases_internal(&self) -> Listing<AliasInfo> {
        let index = self.index.read().await;
        let listing = index
            .aliases()
            .map(|alias| {
                let info = AliasInfo {
                    name: alias.name.clone(),
                    mount_accessor: alias.mount_accessor.clone(),
                    mount_path: alias.mount_path.clone(),
                    mount_type: alias.mount_type.clone(),
                    canonical_id: alias.canonical_id.to_string(),
                };
                (alias.id.to_string(), info)
            })
            .collect();
        listing
    }

    /// All entities with their aliases, built from one read of the index
    pub(crate) async fn list_entities_internal(&self) -> Listing<EntityInfo> {
        let index = self.index.read().await;
        let listing = index
            .entities()
            .map(|entity| {
                let aliases = index
                    .aliases_of(entity)
                    .map(|alias| EntityAliasInfo {
                        id: alias.id.to_string(),
                        name: alias.name.clone(),
                        mount_accessor: alias.mount_accessor.clone(),
                        mount_path: alias.mount_path.clone(),
                        mount_type: alias.mount_type.clone(),
                    })
                    .collect();
                let info = EntityInfo {
                    name: entity.name.clone(),
                    metadata: entity.metadata.clone(),
                    aliases,
                };
                (entity.id.to_string(), info)
            })
            .collect();
        listing
    }
}
