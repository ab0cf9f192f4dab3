//! Cache gateway
//!
//! Batched set/delete against the distributed cache:
//! - `RedisLockCache`: Redis, shared across instances
//! - `MemoryLockCache`: in-process Moka cache for single-instance deployments

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde::Serialize;
use tracing::debug;

use crate::error::CacheError;
use crate::lock::{CacheItem, ItemTag};

/// Batched cache operations used by the writer.
///
/// Implementations decide their own retry policy; the writer never retries.
#[async_trait]
pub trait LockCache: Send + Sync + 'static {
    /// Store every item, each with its own TTL.
    async fn set_multi(&self, items: &[CacheItem]) -> Result<(), CacheError>;

    /// Remove every key. Missing keys are not an error.
    async fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError>;
}

/// JSON envelope stored as the Redis string value.
#[derive(Serialize)]
struct StoredItem<'a> {
    tag: ItemTag,
    payload: &'a [u8],
}

fn encode_item(item: &CacheItem) -> Result<String, CacheError> {
    Ok(serde_json::to_string(&StoredItem {
        tag: item.tag,
        payload: &item.payload,
    })?)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// One `SET key value PX ttl` per item.
fn set_pipeline(items: &[CacheItem]) -> Result<redis::Pipeline, CacheError> {
    let mut pipe = redis::pipe();
    for item in items {
        pipe.cmd("SET")
            .arg(&item.key)
            .arg(encode_item(item)?)
            .arg("PX")
            .arg(ttl_millis(item.ttl))
            .ignore();
    }
    Ok(pipe)
}

fn delete_cmd(keys: &[String]) -> redis::Cmd {
    let mut cmd = redis::cmd("DEL");
    for key in keys {
        cmd.arg(key);
    }
    cmd
}

/// Redis-backed lock cache
#[derive(Clone)]
pub struct RedisLockCache {
    redis: redis::aio::ConnectionManager,
}

impl RedisLockCache {
    pub async fn new(redis_client: redis::Client) -> Result<Self, redis::RedisError> {
        let redis = redis::aio::ConnectionManager::new(redis_client).await?;
        Ok(Self { redis })
    }

    pub fn from_connection_manager(redis: redis::aio::ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl LockCache for RedisLockCache {
    async fn set_multi(&self, items: &[CacheItem]) -> Result<(), CacheError> {
        if items.is_empty() {
            return Ok(());
        }

        let pipe = set_pipeline(items)?;
        let mut conn = self.redis.clone();
        pipe.query_async::<()>(&mut conn).await?;
        debug!("Redis SET {} cache items", items.len());
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        delete_cmd(keys).query_async::<()>(&mut conn).await?;
        debug!("Redis DEL {} cache keys", keys.len());
        Ok(())
    }
}

/// Expires each entry after its own TTL.
struct ItemExpiry;

impl Expiry<String, CacheItem> for ItemExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheItem,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheItem,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process lock cache
#[derive(Clone)]
pub struct MemoryLockCache {
    cache: Cache<String, CacheItem>,
}

impl MemoryLockCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(ItemExpiry)
            .build();
        Self { cache }
    }

    /// Current entry for `key`, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<CacheItem> {
        self.cache.get(key).await
    }

    /// Whether `key` currently holds a lock entry.
    pub async fn is_locked(&self, key: &str) -> bool {
        self.get(key).await.is_some_and(|item| item.is_lock())
    }
}

#[async_trait]
impl LockCache for MemoryLockCache {
    async fn set_multi(&self, items: &[CacheItem]) -> Result<(), CacheError> {
        for item in items {
            self.cache.insert(item.key.clone(), item.clone()).await;
        }
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.cache.invalidate(key).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LOCK_PAYLOAD;

    #[test]
    fn test_encode_lock_item() {
        let item = CacheItem::lock("k".to_owned(), Duration::from_secs(32));
        let json: serde_json::Value = serde_json::from_str(&encode_item(&item).unwrap()).unwrap();

        assert_eq!(json["tag"], "lock");
        let payload: Vec<u8> = serde_json::from_value(json["payload"].clone()).unwrap();
        assert_eq!(payload, LOCK_PAYLOAD);
    }

    #[test]
    fn test_set_pipeline_commands() {
        let items = vec![
            CacheItem::lock("pcache:v1:|A,1".to_owned(), Duration::from_secs(32)),
            CacheItem::lock("pcache:v1:|A,2".to_owned(), Duration::from_millis(1500)),
        ];
        let packed = set_pipeline(&items).unwrap().get_packed_pipeline();
        let packed = String::from_utf8(packed).unwrap();

        let value = encode_item(&items[0]).unwrap();
        let expected_first = format!(
            "*5\r\n$3\r\nSET\r\n$14\r\npcache:v1:|A,1\r\n${}\r\n{}\r\n$2\r\nPX\r\n$5\r\n32000\r\n",
            value.len(),
            value
        );
        assert!(packed.starts_with(&expected_first));
        assert_eq!(packed.matches("*5\r\n$3\r\nSET\r\n").count(), 2);
        assert!(packed.ends_with("$2\r\nPX\r\n$4\r\n1500\r\n"));
    }

    #[test]
    fn test_delete_command() {
        let keys = vec!["a".to_owned(), "bc".to_owned()];
        let packed = String::from_utf8(delete_cmd(&keys).get_packed_command()).unwrap();
        assert_eq!(packed, "*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$2\r\nbc\r\n");
    }

    // Needs a Redis server on localhost: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_set_and_delete() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let cache = RedisLockCache::new(client.clone()).await.unwrap();
        let items = vec![CacheItem::lock(
            "pcache:test:|A,1".to_owned(),
            Duration::from_secs(30),
        )];

        cache.set_multi(&items).await.unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let stored: Option<String> = redis::cmd("GET")
            .arg("pcache:test:|A,1")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(stored, Some(encode_item(&items[0]).unwrap()));
        let ttl: i64 = redis::cmd("PTTL")
            .arg("pcache:test:|A,1")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(ttl > 0 && ttl <= 30_000);

        cache.delete_multi(&["pcache:test:|A,1".to_owned()]).await.unwrap();
        let stored: Option<String> = redis::cmd("GET")
            .arg("pcache:test:|A,1")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(32)), 32_000);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_memory_set_and_delete() {
        let cache = MemoryLockCache::new(100);
        let items = vec![
            CacheItem::lock("a".to_owned(), Duration::from_secs(30)),
            CacheItem::lock("b".to_owned(), Duration::from_secs(30)),
        ];

        cache.set_multi(&items).await.unwrap();
        assert!(cache.is_locked("a").await);
        assert!(cache.is_locked("b").await);

        cache.delete_multi(&["a".to_owned()]).await.unwrap();
        assert!(!cache.is_locked("a").await);
        assert!(cache.is_locked("b").await);

        // Deleting a missing key is fine
        cache.delete_multi(&["missing".to_owned()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_lock_expires() {
        let cache = MemoryLockCache::new(100);
        let item = CacheItem::lock("a".to_owned(), Duration::from_millis(50));

        cache.set_multi(&[item]).await.unwrap();
        assert!(cache.is_locked("a").await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("a").await.is_none());
    }
}
