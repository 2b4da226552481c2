//! In-process mount registry.

use crate::{
    errors::{CorrelationError, Result},
    traits::MountRegistry,
    types::MountEntry,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

type Mounts = HashMap<String, MountEntry>;

/// Mount registry held in memory
///
/// Stands in for the surrounding system's auth mount table when the engine
/// is embedded or tested.
#[derive(Debug, Default)]
pub struct StaticMountRegistry {
    mounts: RwLock<Mounts>,
}

impl StaticMountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Mounts>> {
        self.mounts
            .read()
            .map_err(|_| CorrelationError::RegistryPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Mounts>> {
        self.mounts
            .write()
            .map_err(|_| CorrelationError::RegistryPoisoned)
    }

    /// Register a mount under an explicit accessor
    pub fn register(&self, mount_accessor: &str, mount_path: &str, mount_type: &str) -> Result<()> {
        let entry = MountEntry {
            mount_path: mount_path.to_string(),
            mount_type: mount_type.to_string(),
        };
        self.write()?.insert(mount_accessor.to_string(), entry);
        Ok(())
    }

    /// Enable an auth mount at `auth/<path>/` and return its generated accessor
    pub fn enable_auth(&self, path: &str, mount_type: &str) -> Result<String> {
        let suffix = Uuid::new_v4().simple().to_string();
        let accessor = format!("auth_{}_{}", mount_type, &suffix[..8]);
        let mount_path = format!("auth/{}/", path.trim_matches('/'));
        self.register(&accessor, &mount_path, mount_type)?;
        Ok(accessor)
    }

    /// Disable a mount; returns whether it was registered
    pub fn disable(&self, mount_accessor: &str) -> Result<bool> {
        Ok(self.write()?.remove(mount_accessor).is_some())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }
}

#[async_trait]
impl MountRegistry for StaticMountRegistry {
    async fn resolve(&self, mount_accessor: &str) -> Result<Option<MountEntry>> {
        let entry = self.read()?.get(mount_accessor).cloned();
        Ok(entry)
    }
}
