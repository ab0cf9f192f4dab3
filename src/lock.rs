//! Cache lock entries
//!
//! A lock entry marks "a write to this key is in flight". Readers that find a
//! lock must not populate the cache for that key until the lock is gone.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::{Key, LockKeyFormatter};

/// Payload stored in every lock entry. Never a valid serialized value.
pub const LOCK_PAYLOAD: &[u8] = b"\x00pcache-lock\x00";

/// Distinguishes lock entries from real cached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemTag {
    Lock,
    Value,
}

/// A single cache entry as sent to the cache gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub key: String,
    pub tag: ItemTag,
    pub payload: Vec<u8>,
    pub ttl: Duration,
}

impl CacheItem {
    pub fn lock(key: String, ttl: Duration) -> Self {
        Self {
            key,
            tag: ItemTag::Lock,
            payload: LOCK_PAYLOAD.to_vec(),
            ttl,
        }
    }

    pub fn is_lock(&self) -> bool {
        self.tag == ItemTag::Lock
    }
}

/// Lock entries for one batch, index-aligned with each other.
#[derive(Debug, Default)]
pub struct LockItems {
    pub keys: Vec<String>,
    pub items: Vec<CacheItem>,
}

impl LockItems {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Build a lock entry for every complete key, in input order.
///
/// Incomplete keys have no cache entry to protect and are skipped.
pub fn build_lock_items<KF>(keys: &[Key], formatter: &KF, ttl: Duration) -> LockItems
where
    KF: LockKeyFormatter + ?Sized,
{
    let mut locks = LockItems {
        keys: Vec::with_capacity(keys.len()),
        items: Vec::with_capacity(keys.len()),
    };

    for key in keys.iter().filter(|k| !k.is_incomplete()) {
        let item = CacheItem::lock(formatter.format_key(key), ttl);
        locks.keys.push(item.key.clone());
        locks.items.push(item);
    }

    locks
}
