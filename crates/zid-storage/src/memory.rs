//! In-memory storage implementation.
//!
//! Column families are ordered byte maps guarded by a single mutex, so a
//! committed batch becomes visible all at once. Data does not survive the
//! process; clones share the same underlying maps.

use crate::{
    column_families::all_column_families,
    errors::{Result, StorageError},
    traits::{deserialize_value, serialize_key, serialize_value, Batch, Storage},
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type Tables = HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>;

/// In-memory storage backed by ordered maps
#[derive(Clone)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create an empty store with every known column family
    pub fn new() -> Self {
        let tables = all_column_families()
            .into_iter()
            .map(|cf| (cf.to_string(), BTreeMap::new()))
            .collect();

        Self {
            tables: Arc::new(Mutex::new(tables)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        lock_tables(&self.tables)
    }
}

fn lock_tables(tables: &Mutex<Tables>) -> Result<MutexGuard<'_, Tables>> {
    tables
        .lock()
        .map_err(|_| StorageError::Poisoned)
}

fn table<'a>(tables: &'a Tables, cf: &str) -> Result<&'a BTreeMap<Vec<u8>, Vec<u8>>> {
    tables
        .get(cf)
        .ok_or_else(|| StorageError::InvalidColumnFamily(cf.to_string()))
}

fn table_mut<'a>(tables: &'a mut Tables, cf: &str) -> Result<&'a mut BTreeMap<Vec<u8>, Vec<u8>>> {
    tables
        .get_mut(cf)
        .ok_or_else(|| StorageError::InvalidColumnFamily(cf.to_string()))
}

fn decode_rows<V: DeserializeOwned>(rows: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<(Vec<u8>, V)>> {
    rows.into_iter()
        .map(|(key, value)| Ok((key, deserialize_value(&value)?)))
        .collect()
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get<K, V>(&self, cf: &str, key: &K) -> Result<Option<V>>
    where
        K: Serialize + Send + Sync,
        V: DeserializeOwned + Send,
    {
        let key_bytes = serialize_key(key)?;
        let bytes = {
            let tables = self.lock()?;
            table(&tables, cf)?.get(&key_bytes).cloned()
        };
        bytes.map(|bytes| deserialize_value(&bytes)).transpose()
    }

    async fn put<K, V>(&self, cf: &str, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + Send + Sync,
        V: Serialize + Send + Sync,
    {
        let key_bytes = serialize_key(key)?;
        let value_bytes = serialize_value(value)?;
        let mut tables = self.lock()?;
        table_mut(&mut tables, cf)?.insert(key_bytes, value_bytes);
        Ok(())
    }

    async fn delete<K>(&self, cf: &str, key: &K) -> Result<()>
    where
        K: Serialize + Send + Sync,
    {
        let key_bytes = serialize_key(key)?;
        let mut tables = self.lock()?;
        table_mut(&mut tables, cf)?.remove(&key_bytes);
        Ok(())
    }

    async fn exists<K>(&self, cf: &str, key: &K) -> Result<bool>
    where
        K: Serialize + Send + Sync,
    {
        let key_bytes = serialize_key(key)?;
        let tables = self.lock()?;
        let found = table(&tables, cf)?.contains_key(&key_bytes);
        Ok(found)
    }

    async fn get_by_prefix<K, V>(&self, cf: &str, prefix: &K) -> Result<Vec<(Vec<u8>, V)>>
    where
        K: Serialize + Send + Sync,
        V: DeserializeOwned + Send,
    {
        let prefix_bytes = serialize_key(prefix)?;
        let rows: Vec<(Vec<u8>, Vec<u8>)> = {
            let tables = self.lock()?;
            table(&tables, cf)?
                .range(prefix_bytes.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix_bytes))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        decode_rows(rows)
    }

    async fn scan_all<V>(&self, cf: &str) -> Result<Vec<(Vec<u8>, V)>>
    where
        V: DeserializeOwned + Send,
    {
        let rows: Vec<(Vec<u8>, Vec<u8>)> = {
            let tables = self.lock()?;
            table(&tables, cf)?
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        decode_rows(rows)
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(MemoryBatch {
            tables: Arc::clone(&self.tables),
            ops: Vec::new(),
        })
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Batch>> {
        Ok(self.batch())
    }
}

enum BatchOp {
    Put {
        cf: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: String,
        key: Vec<u8>,
    },
}

/// Batch of pending operations against a [`MemoryStorage`]
pub struct MemoryBatch {
    tables: Arc<Mutex<Tables>>,
    ops: Vec<BatchOp>,
}

impl MemoryBatch {
    fn check_cf(&self, cf: &str) -> Result<()> {
        if all_column_families().contains(&cf) {
            Ok(())
        } else {
            Err(StorageError::InvalidColumnFamily(cf.to_string()))
        }
    }
}

#[async_trait]
impl Batch for MemoryBatch {
    fn put_raw(&mut self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_cf(cf)?;
        self.ops.push(BatchOp::Put {
            cf: cf.to_string(),
            key,
            value,
        });
        Ok(())
    }

    fn delete_raw(&mut self, cf: &str, key: Vec<u8>) -> Result<()> {
        self.check_cf(cf)?;
        self.ops.push(BatchOp::Delete {
            cf: cf.to_string(),
            key,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryBatch { tables: shared, ops } = *self;
        let count = ops.len();
        let mut tables = lock_tables(&shared)?;

        for op in ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    table_mut(&mut tables, &cf)?.insert(key, value);
                }
                BatchOp::Delete { cf, key } => {
                    table_mut(&mut tables, &cf)?.remove(&key);
                }
            }
        }

        debug!(ops = count, "Memory batch committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        debug!(ops = self.ops.len(), "Memory batch rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BatchExt;
    use crate::{CF_ALIASES, CF_ENTITIES};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_batch_is_invisible_until_commit() {
        let storage = MemoryStorage::new();
        let key = Uuid::new_v4();

        let mut batch = storage.batch();
        batch.put(CF_ENTITIES, &key, &"entity".to_string()).unwrap();
        assert!(!storage.exists(CF_ENTITIES, &key).await.unwrap());

        batch.commit().await.unwrap();
        let value: Option<String> = storage.get(CF_ENTITIES, &key).await.unwrap();
        assert_eq!(value.as_deref(), Some("entity"));
    }

    #[tokio::test]
    async fn test_batch_rejects_unknown_column_family() {
        let storage = MemoryStorage::new();
        let mut batch = storage.batch();
        let err = batch.put("identities", &1u8, &1u8).unwrap_err();
        assert!(matches!(err, StorageError::InvalidColumnFamily(_)));
    }

    #[tokio::test]
    async fn test_batch_delete_and_scan() {
        let storage = MemoryStorage::new();
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        storage.put(CF_ALIASES, &keep, &1u32).await.unwrap();
        storage.put(CF_ALIASES, &drop, &2u32).await.unwrap();

        let mut batch = storage.batch();
        batch.delete(CF_ALIASES, &drop).unwrap();
        batch.commit().await.unwrap();

        let all: Vec<(Vec<u8>, u32)> = storage.scan_all(CF_ALIASES).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1, 1);
    }

    #[tokio::test]
    async fn test_get_by_prefix() {
        let storage = MemoryStorage::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        storage
            .put(CF_ALIASES, &(owner, Uuid::new_v4()), &())
            .await
            .unwrap();
        storage
            .put(CF_ALIASES, &(owner, Uuid::new_v4()), &())
            .await
            .unwrap();
        storage
            .put(CF_ALIASES, &(other, Uuid::new_v4()), &())
            .await
            .unwrap();

        let results: Vec<(Vec<u8>, ())> = storage.get_by_prefix(CF_ALIASES, &owner).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_tables() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        let key = Uuid::new_v4();

        storage.put(CF_ENTITIES, &key, &7u8).await.unwrap();
        assert!(clone.exists(CF_ENTITIES, &key).await.unwrap());
    }
}
