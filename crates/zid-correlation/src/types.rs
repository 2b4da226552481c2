//! Correlation engine type definitions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Opaque key/value attributes attached to entities and aliases
pub type Metadata = BTreeMap<String, String>;

/// Canonical representation of one principal across authentication mounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: Option<String>,
    /// Aliases owned by this entity. Every member's `canonical_id` is `id`.
    pub aliases: BTreeSet<Uuid>,
    pub metadata: Metadata,
    pub disabled: bool,
    /// Entities absorbed into this one by explicit merges
    pub merged_entity_ids: Vec<Uuid>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A principal's identity as known to one authentication mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub id: Uuid,
    pub name: String,
    pub mount_accessor: String,
    /// Snapshot of the mount path at creation time
    pub mount_path: String,
    /// Snapshot of the mount type at creation time
    pub mount_type: String,
    /// Owning entity. Changes only through an explicit merge.
    pub canonical_id: Uuid,
    pub metadata: Metadata,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Alias {
    /// The `(mount_accessor, name)` pair that must be unique across all aliases
    pub fn key(&self) -> AliasKey {
        AliasKey::new(&self.mount_accessor, &self.name)
    }
}

/// Uniqueness key of an alias
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AliasKey {
    pub mount_accessor: String,
    pub name: String,
}

impl AliasKey {
    pub fn new(mount_accessor: &str, name: &str) -> Self {
        Self {
            mount_accessor: mount_accessor.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for AliasKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.mount_accessor, self.name)
    }
}

/// Identity of an enabled authentication mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// e.g. `auth/github/`
    pub mount_path: String,
    /// e.g. `github`
    pub mount_type: String,
}

/// Create entity request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEntityRequest {
    pub name: Option<String>,
    pub metadata: Metadata,
}

/// Partial update of an entity. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub name: Option<String>,
    pub metadata: Option<Metadata>,
    pub disabled: Option<bool>,
}

/// Create alias request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAliasRequest {
    pub name: String,
    pub mount_accessor: String,
    /// Existing entity to attach to. A new entity is created when absent.
    pub canonical_id: Option<String>,
    pub metadata: Metadata,
}

/// Result of a lookup-or-create call from an authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAlias {
    pub entity_id: Uuid,
    pub alias_id: Uuid,
    /// Whether this call created the alias
    pub created: bool,
}

/// Merge behaviour switches
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Refuse the merge when a source alias shares a mount accessor with an
    /// alias the target already owns.
    pub reject_shared_mounts: bool,
}

/// Listed alias details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasInfo {
    pub name: String,
    pub mount_accessor: String,
    pub mount_path: String,
    pub mount_type: String,
    pub canonical_id: String,
}

/// Alias summary embedded in [`EntityInfo`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAliasInfo {
    pub id: String,
    pub name: String,
    pub mount_accessor: String,
    pub mount_path: String,
    pub mount_type: String,
}

/// Listed entity details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub name: Option<String>,
    pub metadata: Metadata,
    pub aliases: Vec<EntityAliasInfo>,
}

/// IDs sorted ascending plus an info record per ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing<T> {
    pub keys: Vec<String>,
    pub key_info: BTreeMap<String, T>,
}

impl<T> Listing<T> {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<T> FromIterator<(String, T)> for Listing<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let key_info: BTreeMap<String, T> = iter.into_iter().collect();
        Self {
            keys: key_info.keys().cloned().collect(),
            key_info,
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Number of lock slots per lock class. Distinct keys may share a slot.
    pub lock_slots: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { lock_slots: 256 }
    }
}

/// Current Unix timestamp in seconds
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Treat an empty entity name as no name
pub(crate) fn normalize_name(name: Option<String>) -> Option<String> {
    name.filter(|n| !n.is_empty())
}
