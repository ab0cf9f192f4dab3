//! pcache-lockwrite - Write-path cache locking
//!
//! This library keeps a distributed cache consistent with an authoritative
//! primary store on writes:
//! - Before a batch is written, a short-lived lock entry is placed in the
//!   cache for every key that already has an identity
//! - The batch is then written to the primary store
//! - Finally the locks are removed, letting readers repopulate the cache
//!
//! Readers that find a lock must not cache what they read. Writes issued
//! inside a store transaction buffer their locks in a [`Transaction`]
//! instead, and the transaction owner disposes of them once it finishes.
//!
//! The cache and store are pluggable:
//! - [`LockCache`]: Redis ([`RedisLockCache`]) or in-process Moka ([`MemoryLockCache`])
//! - [`PrimaryStore`]: any batched authoritative store

mod cache;
mod config;
mod error;
mod key;
mod lock;
mod store;
mod transaction;
mod validate;
mod writer;

#[cfg(test)]
mod testing;

pub use cache::{LockCache, MemoryLockCache, RedisLockCache};
pub use config::{DEFAULT_MAX_BATCH_SIZE, WriteConfig};
pub use error::{
    BoxError, CacheError, CleanupError, Interrupted, MultiError, PutError, StoreError,
    ValidationError,
};
pub use key::{Key, KeyId, LockKeyFormatter, PrefixKeyFormatter};
pub use lock::{CacheItem, ItemTag, LOCK_PAYLOAD, LockItems, build_lock_items};
pub use store::PrimaryStore;
pub use transaction::{Transaction, WriteContext};
pub use validate::check_multi_args;
pub use writer::{Committed, LockRelease, LockingWriter, WriteStage};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export for building cancellable write contexts
pub use tokio_util::sync::CancellationToken;
