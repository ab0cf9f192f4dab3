//! Recording gateways for unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::LockCache;
use crate::error::{BoxError, CacheError, MultiError, StoreError};
use crate::key::{Key, KeyId};
use crate::lock::CacheItem;
use crate::store::PrimaryStore;

#[derive(Default)]
pub struct RecordingCache {
    pub sets: Mutex<Vec<Vec<CacheItem>>>,
    pub deletes: Mutex<Vec<Vec<String>>>,
    pub fail_set: AtomicBool,
    pub fail_delete: AtomicBool,
    pub delete_delay: Option<Duration>,
}

impl RecordingCache {
    pub fn failing_set() -> Self {
        let cache = Self::default();
        cache.fail_set.store(true, Ordering::SeqCst);
        cache
    }

    pub fn failing_delete() -> Self {
        let cache = Self::default();
        cache.fail_delete.store(true, Ordering::SeqCst);
        cache
    }

    pub fn slow_delete(delay: Duration) -> Self {
        Self {
            delete_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_calls(&self) -> Vec<Vec<CacheItem>> {
        self.sets.lock().unwrap().clone()
    }

    pub fn delete_calls(&self) -> Vec<Vec<String>> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl LockCache for RecordingCache {
    async fn set_multi(&self, items: &[CacheItem]) -> Result<(), CacheError> {
        self.sets.lock().unwrap().push(items.to_vec());
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("cache unavailable".into()));
        }
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        self.deletes.lock().unwrap().push(keys.to_vec());
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("cache unavailable".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingStore {
    pub calls: Mutex<Vec<Vec<Key>>>,
    next_id: AtomicI64,
    /// Indices of the batch that fail with a per-key error.
    pub fail_indices: Vec<usize>,
    pub fail_all: bool,
    pub delay: Option<Duration>,
    /// Drop the last resolved key, simulating a misbehaving store.
    pub truncate: bool,
}

impl RecordingStore {
    pub fn failing_at(indices: &[usize]) -> Self {
        Self {
            fail_indices: indices.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn truncating() -> Self {
        Self {
            truncate: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl<V> PrimaryStore<V> for RecordingStore
where
    V: Send + Sync,
{
    async fn put_multi(&self, keys: &[Key], _records: &[V]) -> Result<Vec<Key>, StoreError> {
        self.calls.lock().unwrap().push(keys.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_all {
            return Err(StoreError::Backend("datastore unavailable".into()));
        }

        if !self.fail_indices.is_empty() {
            let errors: Vec<Option<BoxError>> = (0..keys.len())
                .map(|i| {
                    self.fail_indices
                        .contains(&i)
                        .then(|| BoxError::from(format!("entity {} rejected", i)))
                })
                .collect();
            return Err(StoreError::Multi(MultiError::new(errors)));
        }

        let mut resolved: Vec<Key> = keys
            .iter()
            .map(|key| {
                if key.is_incomplete() {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    key.resolved(KeyId::Int(id))
                } else {
                    key.clone()
                }
            })
            .collect();
        if self.truncate {
            resolved.pop();
        }
        Ok(resolved)
    }
}
