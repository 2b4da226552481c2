//! Striped mutual exclusion for mutations.
//!
//! Two lock classes exist: key locks (alias `(mount_accessor, name)` keys
//! and entity names) and entity locks (entity IDs). Each key hashes onto one
//! of a fixed number of slots per class. An acquisition always takes every
//! key slot before any entity slot, and within a class ascends by slot index
//! with duplicates collapsed. Every caller following that order makes
//! deadlock impossible.

use crate::types::AliasKey;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;
use uuid::Uuid;

/// A key-class lock target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockKey {
    Alias(AliasKey),
    EntityName(String),
}

impl LockKey {
    pub fn alias(mount_accessor: &str, name: &str) -> Self {
        Self::Alias(AliasKey::new(mount_accessor, name))
    }

    fn material(&self) -> Vec<u8> {
        // NUL separators keep ("a", "bc") and ("ab", "c") apart
        let mut out = Vec::new();
        match self {
            Self::Alias(key) => {
                out.extend_from_slice(b"alias\0");
                out.extend_from_slice(key.mount_accessor.as_bytes());
                out.push(0);
                out.extend_from_slice(key.name.as_bytes());
            }
            Self::EntityName(name) => {
                out.extend_from_slice(b"entity-name\0");
                out.extend_from_slice(name.as_bytes());
            }
        }
        out
    }
}

/// Held locks; released on drop
///
/// Owns its slots, so it can move into a task that outlives the caller.
#[must_use]
pub struct LockGuard {
    _keys: Vec<OwnedMutexGuard<()>>,
    _entities: Vec<OwnedMutexGuard<()>>,
}

/// Lock slots for both classes
pub struct LockManager {
    key_slots: Vec<Arc<Mutex<()>>>,
    entity_slots: Vec<Arc<Mutex<()>>>,
}

impl LockManager {
    /// Create a manager with `slots` slots per class (at least one)
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            key_slots: (0..slots).map(|_| Arc::new(Mutex::new(()))).collect(),
            entity_slots: (0..slots).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    pub fn key_slot(&self, key: &LockKey) -> usize {
        slot_of(&key.material(), self.key_slots.len())
    }

    pub fn entity_slot(&self, entity_id: &Uuid) -> usize {
        slot_of(entity_id.as_bytes(), self.entity_slots.len())
    }

    /// Acquire every listed key and entity lock in the global order
    pub async fn acquire<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k LockKey>,
        entities: impl IntoIterator<Item = &'k Uuid>,
    ) -> LockGuard {
        let key_slots: BTreeSet<usize> = keys.into_iter().map(|k| self.key_slot(k)).collect();
        let entity_slots: BTreeSet<usize> =
            entities.into_iter().map(|id| self.entity_slot(id)).collect();

        trace!(?key_slots, ?entity_slots, "Acquiring locks");

        let mut key_guards = Vec::with_capacity(key_slots.len());
        for slot in key_slots {
            key_guards.push(Arc::clone(&self.key_slots[slot]).lock_owned().await);
        }

        let mut entity_guards = Vec::with_capacity(entity_slots.len());
        for slot in entity_slots {
            entity_guards.push(Arc::clone(&self.entity_slots[slot]).lock_owned().await);
        }

        LockGuard {
            _keys: key_guards,
            _entities: entity_guards,
        }
    }
}

fn slot_of(material: &[u8], slots: usize) -> usize {
    let digest = Sha256::digest(material);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % slots as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn distinct_keys(manager: &LockManager) -> (LockKey, LockKey) {
        let first = LockKey::alias("auth_userpass_0001", "bsmith");
        let slot = manager.key_slot(&first);
        let second = (0..)
            .map(|i| LockKey::alias("auth_userpass_0001", &format!("user{i}")))
            .find(|k| manager.key_slot(k) != slot)
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_slots_are_stable() {
        let manager = LockManager::new(64);
        let key = LockKey::EntityName("bob-smith".into());
        assert_eq!(manager.key_slot(&key), manager.key_slot(&key.clone()));

        let id = Uuid::new_v4();
        assert!(manager.entity_slot(&id) < 64);
    }

    #[test]
    fn test_lock_material_separates_fields() {
        let a = LockKey::alias("a", "bc");
        let b = LockKey::alias("ab", "c");
        assert_ne!(a.material(), b.material());
        assert_ne!(
            LockKey::alias("x", "y").material(),
            LockKey::EntityName("x".into()).material()
        );
    }

    #[tokio::test]
    async fn test_duplicate_targets_do_not_self_deadlock() {
        let manager = LockManager::new(1);
        let id = Uuid::new_v4();
        let keys = vec![LockKey::alias("m", "a"), LockKey::alias("m", "b")];

        let guard = tokio::time::timeout(
            Duration::from_secs(1),
            manager.acquire(&keys, [&id, &id]),
        )
        .await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_same_key_blocks() {
        let manager = Arc::new(LockManager::new(16));
        let key = LockKey::alias("auth_github_0001", "octocat");

        let _held = manager.acquire([&key], []).await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), manager.acquire([&key], [])).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_guard_moved_into_task_holds_slot() {
        let manager = LockManager::new(16);
        let key = LockKey::alias("auth_github_0001", "octocat");

        let guard = manager.acquire([&key], []).await;
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let holder = tokio::spawn(async move {
            let _guard = guard;
            let _ = released.await;
        });

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), manager.acquire([&key], [])).await;
        assert!(blocked.is_err());

        release.send(()).unwrap();
        holder.await.unwrap();
        let reacquired =
            tokio::time::timeout(Duration::from_secs(1), manager.acquire([&key], [])).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_unrelated_keys_do_not_block() {
        let manager = LockManager::new(16);
        let (first, second) = distinct_keys(&manager);

        let _held = manager.acquire([&first], []).await;
        let other =
            tokio::time::timeout(Duration::from_millis(200), manager.acquire([&second], [])).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_opposite_request_order_completes() {
        let manager = Arc::new(LockManager::new(16));
        let (first, second) = distinct_keys(&manager);

        let mut tasks = Vec::new();
        for i in 0..50 {
            let manager = Arc::clone(&manager);
            let keys = if i % 2 == 0 {
                vec![first.clone(), second.clone()]
            } else {
                vec![second.clone(), first.clone()]
            };
            tasks.push(tokio::spawn(async move {
                let _guard = manager.acquire(&keys, []).await;
                tokio::task::yield_now().await;
            }));
        }

        let all = async {
            for task in tasks {
                task.await.unwrap();
            }
        };
        assert!(tokio::time::timeout(Duration::from_secs(5), all).await.is_ok());
    }
}
