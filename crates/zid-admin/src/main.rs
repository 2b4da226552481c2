/*!
 * zid-admin
 *
 * Operator tool for the identity correlation store:
 * 1. Inspect entities and aliases
 * 2. Create entities and aliases, or simulate a login
 * 3. Update, rename, merge and delete
 * 4. Verify index invariants
 *
 * Usage:
 *   cargo run -p zid-admin -- list-entities
 *   cargo run -p zid-admin -- login <mount_accessor> <name>
 *   cargo run -p zid-admin -- merge <into_id> <from_id>...
 *   cargo run -p zid-admin -- check
 */

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zid_correlation::{CorrelationService, StaticMountRegistry};
use zid_storage::RocksDbStorage;

use config::Config;

#[derive(Parser)]
#[command(name = "zid-admin")]
#[command(about = "Administer zero-id entities and aliases")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every entity with its aliases
    ListEntities,
    /// List every alias
    ListAliases,
    /// Create an entity
    CreateEntity {
        /// Unique entity name
        #[arg(short, long)]
        name: Option<String>,

        /// Metadata entries as key=value
        #[arg(short, long, value_parser = commands::parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Create an alias on a mount
    CreateAlias {
        /// Mount accessor
        mount_accessor: String,

        /// Alias name as the mount reports it
        name: String,

        /// Entity to attach to (a new entity is created when omitted)
        #[arg(short, long)]
        canonical_id: Option<String>,

        /// Metadata entries as key=value
        #[arg(short, long, value_parser = commands::parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Resolve a login, creating the alias and entity on first sight
    Login {
        mount_accessor: String,
        name: String,

        /// Entity a newly created alias should attach to
        #[arg(short, long)]
        canonical_id: Option<String>,
    },
    /// Update an entity's name, metadata or disabled flag
    UpdateEntity {
        entity_id: String,

        /// New unique entity name
        #[arg(short, long)]
        name: Option<String>,

        /// Replacement metadata entries as key=value
        #[arg(short, long, value_parser = commands::parse_key_value)]
        metadata: Vec<(String, String)>,

        /// Replace the metadata with an empty map
        #[arg(long, conflicts_with = "metadata")]
        clear_metadata: bool,

        /// Set or clear the disabled flag
        #[arg(long)]
        disabled: Option<bool>,
    },
    /// Rename an alias within its mount
    RenameAlias { alias_id: String, new_name: String },
    /// Replace an alias's metadata
    UpdateAliasMetadata {
        alias_id: String,

        /// Metadata entries as key=value
        #[arg(short, long, value_parser = commands::parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Merge entities into a target
    Merge {
        into_id: String,

        #[arg(required = true)]
        from_ids: Vec<String>,

        /// Refuse when a source alias shares a mount with the target
        #[arg(long)]
        reject_shared_mounts: bool,
    },
    /// Delete an entity and all of its aliases
    DeleteEntity { entity_id: String },
    /// Delete an alias
    DeleteAlias { alias_id: String },
    /// Show one entity
    ReadEntity { entity_id: String },
    /// Show one alias
    ReadAlias { alias_id: String },
    /// Verify index invariants
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zid_admin=info,zid_correlation=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    tracing::debug!(path = %config.database_path.display(), "Opening identity store");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let storage = Arc::new(
        RocksDbStorage::open(&config.database_path).context("Failed to open identity store")?,
    );

    let mounts = Arc::new(StaticMountRegistry::new());
    for mount in &config.mounts {
        mounts.register(&mount.accessor, &mount.path, &mount.mount_type)?;
    }

    let svc = CorrelationService::load(mounts, storage, config.correlation())
        .await
        .context("Failed to load identity index")?;

    commands::run(&svc, cli.command).await
}
