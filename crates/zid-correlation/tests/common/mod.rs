//! Shared fixtures for correlation integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zid_correlation::{CorrelationConfig, CorrelationService, StaticMountRegistry};
use zid_storage::{Batch, MemoryStorage, Result, Storage, StorageError};

pub type MemoryService = CorrelationService<StaticMountRegistry, MemoryStorage>;
pub type FlakyService = CorrelationService<StaticMountRegistry, FlakyStorage>;

/// Service over fresh in-memory storage
pub async fn memory_service() -> (MemoryService, Arc<StaticMountRegistry>, MemoryStorage) {
    let mounts = Arc::new(StaticMountRegistry::new());
    let storage = MemoryStorage::new();
    let svc = CorrelationService::load(
        Arc::clone(&mounts),
        Arc::new(storage.clone()),
        CorrelationConfig::default(),
    )
    .await
    .unwrap();
    (svc, mounts, storage)
}

/// Service whose storage commits can be made to fail on demand
pub async fn flaky_service() -> (FlakyService, Arc<StaticMountRegistry>, FlakyStorage) {
    let mounts = Arc::new(StaticMountRegistry::new());
    let storage = FlakyStorage::new();
    let svc = CorrelationService::load(
        Arc::clone(&mounts),
        Arc::new(storage.clone()),
        CorrelationConfig::default(),
    )
    .await
    .unwrap();
    (svc, mounts, storage)
}

/// Memory storage wrapper that rejects batch commits while `failing` is set
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing: Arc<AtomicBool>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

struct FlakyBatch {
    inner: Box<dyn Batch>,
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl Batch for FlakyBatch {
    fn put_raw(&mut self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.inner.put_raw(cf, key, value)
    }

    fn delete_raw(&mut self, cf: &str, key: Vec<u8>) -> Result<()> {
        self.inner.delete_raw(cf, key)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.inner.rollback();
            return Err(StorageError::TransactionError(
                "injected commit failure".to_string(),
            ));
        }
        self.inner.commit().await
    }

    fn rollback(self: Box<Self>) {
        self.inner.rollback();
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get<K, V>(&self, cf: &str, key: &K) -> Result<Option<V>>
    where
        K: Serialize + Send + Sync,
        V: DeserializeOwned + Send,
    {
        self.inner.get(cf, key).await
    }

    async fn put<K, V>(&self, cf: &str, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + Send + Sync,
        V: Serialize + Send + Sync,
    {
        self.inner.put(cf, key, value).await
    }

    async fn delete<K>(&self, cf: &str, key: &K) -> Result<()>
    where
        K: Serialize + Send + Sync,
    {
        self.inner.delete(cf, key).await
    }

    async fn exists<K>(&self, cf: &str, key: &K) -> Result<bool>
    where
        K: Serialize + Send + Sync,
    {
        self.inner.exists(cf, key).await
    }

    async fn get_by_prefix<K, V>(&self, cf: &str, prefix: &K) -> Result<Vec<(Vec<u8>, V)>>
    where
        K: Serialize + Send + Sync,
        V: DeserializeOwned + Send,
    {
        self.inner.get_by_prefix(cf, prefix).await
    }

    async fn scan_all<V>(&self, cf: &str) -> Result<Vec<(Vec<u8>, V)>>
    where
        V: DeserializeOwned + Send,
    {
        self.inner.scan_all(cf).await
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(FlakyBatch {
            inner: self.inner.batch(),
            failing: Arc::clone(&self.failing),
        })
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Batch>> {
        Ok(self.batch())
    }
}
