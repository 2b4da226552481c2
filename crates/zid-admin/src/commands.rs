//! Subcommand handlers. Each prints its result as pretty JSON on stdout.

use anyhow::{anyhow, Result};
use serde::Serialize;
use zid_correlation::{
    CorrelationApi, CorrelationService, CreateAliasRequest, CreateEntityRequest, EntityUpdate,
    MergeOptions, Metadata, MountRegistry,
};
use zid_storage::Storage;

use crate::Commands;

pub async fn run<M, S>(api: &CorrelationService<M, S>, command: Commands) -> Result<()>
where
    M: MountRegistry + 'static,
    S: Storage + 'static,
{
    match command {
        Commands::ListEntities => print(&api.list_entities().await?),

        Commands::ListAliases => print(&api.list_aliases().await?),

        Commands::CreateEntity { name, metadata } => {
            let entity = api
                .create_entity(CreateEntityRequest {
                    name,
                    metadata: metadata.into_iter().collect(),
                })
                .await?;
            print(&entity)
        }

        Commands::CreateAlias {
            mount_accessor,
            name,
            canonical_id,
            metadata,
        } => {
            let alias = api
                .create_alias(CreateAliasRequest {
                    name,
                    mount_accessor,
                    canonical_id,
                    metadata: metadata.into_iter().collect::<Metadata>(),
                })
                .await?;
            print(&alias)
        }

        Commands::Login {
            mount_accessor,
            name,
            canonical_id,
        } => {
            let resolved = api
                .resolve_or_create_alias(&mount_accessor, &name, canonical_id.as_deref())
                .await?;
            print(&resolved)
        }

        Commands::UpdateEntity {
            entity_id,
            name,
            metadata,
            clear_metadata,
            disabled,
        } => {
            let metadata = (clear_metadata || !metadata.is_empty())
                .then(|| metadata.into_iter().collect::<Metadata>());
            let entity = api
                .update_entity(
                    &entity_id,
                    EntityUpdate {
                        name,
                        metadata,
                        disabled,
                    },
                )
                .await?;
            print(&entity)
        }

        Commands::RenameAlias { alias_id, new_name } => {
            print(&api.rename_alias(&alias_id, &new_name).await?)
        }

        Commands::UpdateAliasMetadata { alias_id, metadata } => {
            let alias = api
                .update_alias_metadata(&alias_id, metadata.into_iter().collect())
                .await?;
            print(&alias)
        }

        Commands::Merge {
            into_id,
            from_ids,
            reject_shared_mounts,
        } => {
            let entity = api
                .merge_entities(
                    &into_id,
                    &from_ids,
                    MergeOptions {
                        reject_shared_mounts,
                    },
                )
                .await?;
            print(&entity)
        }

        Commands::DeleteEntity { entity_id } => {
            api.delete_entity(&entity_id).await?;
            print(&serde_json::json!({ "deleted": entity_id }))
        }

        Commands::DeleteAlias { alias_id } => {
            api.delete_alias(&alias_id).await?;
            print(&serde_json::json!({ "deleted": alias_id }))
        }

        Commands::ReadEntity { entity_id } => print(&api.get_entity(&entity_id).await?),

        Commands::ReadAlias { alias_id } => print(&api.get_alias(&alias_id).await?),

        Commands::Check => {
            api.check_invariants().await?;
            let entities = api.list_entities().await?;
            let aliases = api.list_aliases().await?;
            let listed: usize = entities.key_info.values().map(|e| e.aliases.len()).sum();
            if listed != aliases.len() {
                return Err(anyhow!(
                    "entities list {} aliases but {} exist",
                    listed,
                    aliases.len()
                ));
            }
            print(&serde_json::json!({
                "entities": entities.len(),
                "aliases": aliases.len(),
                "ok": true,
            }))
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a `key=value` metadata argument
pub fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}
