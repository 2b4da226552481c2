//! Explicit entity merge.

use crate::{errors::*, index::ChangeSet, traits::MountRegistry, types::*};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;
use zid_storage::Storage;

use super::{parse_entity_id, CorrelationService};

impl<M, S> CorrelationService<M, S>
where
    M: MountRegistry + 'static,
    S: Storage + 'static,
{
    /// Move every alias of `from_ids` onto `into_id` and delete the sources
    ///
    /// Validation covers every source before anything is written, so the
    /// merge either commits as a whole or leaves all entities untouched.
    pub(crate) async fn merge_entities_internal(
        &self,
        into_id: &str,
        from_ids: &[String],
        options: MergeOptions,
    ) -> Result<Entity> {
        let into = parse_entity_id(into_id)?;

        let mut sources: Vec<(Uuid, &str)> = Vec::with_capacity(from_ids.len());
        for raw in from_ids {
            let id = parse_entity_id(raw)?;
            if id == into {
                return Err(CorrelationError::SelfMerge(into));
            }
            if !sources.iter().any(|(seen, _)| *seen == id) {
                sources.push((id, raw.as_str()));
            }
        }

        let participants: Vec<Uuid> = std::iter::once(into)
            .chain(sources.iter().map(|(id, _)| *id))
            .collect();
        let guard = self.locks.acquire([], participants.iter()).await;

        let (target, changes) = {
            let index = self.index.read().await;
            let mut target = index
                .entity(&into)
                .cloned()
                .ok_or_else(|| CorrelationError::EntityNotFound(into_id.to_string()))?;

            if sources.is_empty() {
                return Ok(target);
            }

            let target_mounts: HashSet<String> = index
                .aliases_of(&target)
                .map(|alias| alias.mount_accessor.clone())
                .collect();

            let now = current_timestamp();
            let mut changes = ChangeSet::default();

            for (source_id, raw) in &sources {
                let source = index
                    .entity(source_id)
                    .ok_or_else(|| CorrelationError::EntityNotFound(raw.to_string()))?;

                for alias in index.aliases_of(source) {
                    if options.reject_shared_mounts
                        && target_mounts.contains(alias.mount_accessor.as_str())
                    {
                        return Err(CorrelationError::MergeConflict {
                            alias_id: alias.id,
                            reason: format!(
                                "target entity already has an alias on mount {}",
                                alias.mount_accessor
                            ),
                        });
                    }

                    let mut moved = alias.clone();
                    moved.canonical_id = into;
                    moved.updated_at = now;
                    target.aliases.insert(moved.id);
                    changes.put_aliases.push(moved);
                }

                for (key, value) in &source.metadata {
                    target
                        .metadata
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                target.merged_entity_ids.push(source.id);
                target
                    .merged_entity_ids
                    .extend(source.merged_entity_ids.iter().copied());
                changes.delete_entities.push(source.id);
            }

            target.updated_at = now;
            changes.put_entities.push(target.clone());
            (target, changes)
        };

        let moved = changes.put_aliases.len();
        self.commit(changes, guard).await?;

        info!(
            entity_id = %into,
            merged = sources.len(),
            aliases_moved = moved,
            "Merged entities"
        );
        Ok(target)
    }
}
