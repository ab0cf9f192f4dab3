//! Locking batch writer
//!
//! Every write to the primary store is bracketed by cache locks:
//! 1. install a lock entry for every complete key (or buffer it in the
//!    enclosing transaction)
//! 2. write the batch to the primary store
//! 3. delete the lock entries (skipped inside a transaction)
//!
//! Readers that find a lock never cache what they read, so no stale entry can
//! survive a write accepted by the store. The three steps run strictly in
//! order; if the lock cannot be installed the store is not written, and if
//! the store write fails the locks stay until they expire.

use std::fmt;
use std::future::Future;
use std::slice;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::cache::LockCache;
use crate::config::WriteConfig;
use crate::error::{CleanupError, Interrupted, MultiError, PutError, StoreError};
use crate::key::{Key, LockKeyFormatter, PrefixKeyFormatter};
use crate::lock::build_lock_items;
use crate::store::PrimaryStore;
use crate::transaction::WriteContext;
use crate::validate::check_multi_args;

/// Progress of a batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Validating,
    Locking,
    Storing,
    Unlocking,
    Done,
    Aborted,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validating => "validating",
            Self::Locking => "locking",
            Self::Storing => "storing",
            Self::Unlocking => "unlocking",
            Self::Done => "done",
            Self::Aborted => "aborted",
        })
    }
}

/// What happened to the locks of a successful write.
#[derive(Debug)]
pub enum LockRelease {
    /// Locks were deleted from the cache.
    Released,
    /// The write ran inside a transaction, which now owns the locks.
    Deferred,
    /// Deleting the locks failed. They expire after the lock TTL.
    Failed(CleanupError),
}

/// Successful batch write.
#[derive(Debug)]
pub struct Committed {
    /// One key per input record, incomplete keys resolved by the store.
    pub keys: Vec<Key>,
    pub release: LockRelease,
}

/// Batch writer that keeps the cache consistent with the primary store.
pub struct LockingWriter<S, C, KF = PrefixKeyFormatter>
where
    C: LockCache,
    KF: LockKeyFormatter,
{
    store: Arc<S>,
    cache: Arc<C>,
    key_formatter: Arc<KF>,
    config: Arc<WriteConfig>,
}

impl<S, C, KF> Clone for LockingWriter<S, C, KF>
where
    C: LockCache,
    KF: LockKeyFormatter,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            key_formatter: Arc::clone(&self.key_formatter),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, C> LockingWriter<S, C, PrefixKeyFormatter>
where
    C: LockCache,
{
    /// Create a writer deriving cache keys with `config.key_prefix`.
    pub fn new(store: S, cache: C, config: WriteConfig) -> Self {
        let key_formatter = PrefixKeyFormatter::new(config.key_prefix.clone());
        Self::with_key_formatter(store, cache, config, key_formatter)
    }
}

impl<S, C, KF> LockingWriter<S, C, KF>
where
    C: LockCache,
    KF: LockKeyFormatter,
{
    pub fn with_key_formatter(store: S, cache: C, config: WriteConfig, key_formatter: KF) -> Self {
        Self {
            store: Arc::new(store),
            cache: Arc::new(cache),
            key_formatter: Arc::new(key_formatter),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &WriteConfig {
        &self.config
    }

    pub fn key_formatter(&self) -> &KF {
        &self.key_formatter
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write a batch of records to the primary store, locking their cache
    /// entries for the duration of the write.
    ///
    /// On failure nothing is rolled back: a failed store write leaves its
    /// locks in place until they expire.
    #[instrument(skip_all, fields(batch = keys.len()))]
    pub async fn put_multi<V>(
        &self,
        ctx: &WriteContext,
        keys: &[Key],
        records: &[V],
    ) -> Result<Committed, PutError>
    where
        S: PrimaryStore<V>,
        V: Send + Sync,
    {
        debug!("put_multi {}", WriteStage::Validating);
        if let Err(e) = check_multi_args(keys, records, self.config.max_batch_size) {
            debug!("put_multi {}: {}", WriteStage::Aborted, e);
            return Err(e.into());
        }

        let locks = build_lock_items(keys, self.key_formatter.as_ref(), self.config.lock_ttl);
        debug!("put_multi {}: {} lock items", WriteStage::Locking, locks.len());

        let transaction = ctx.transaction();
        match transaction {
            Some(tx) => tx.append(locks.items).await,
            None => match self.round_trip(ctx, self.cache.set_multi(&locks.items)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("put_multi cache lock failed: {}", e);
                    return Err(PutError::CacheLock(e));
                }
                Err(reason) => return Err(interrupted(WriteStage::Locking, reason)),
            },
        }

        debug!("put_multi {}", WriteStage::Storing);
        let resolved = match self.round_trip(ctx, self.store.put_multi(keys, records)).await {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                error!("put_multi store write failed: {}", e);
                return Err(PutError::Store(e));
            }
            Err(reason) => return Err(interrupted(WriteStage::Storing, reason)),
        };

        if resolved.len() != keys.len() {
            let e = StoreError::Backend(
                format!(
                    "store returned {} keys for {} records",
                    resolved.len(),
                    keys.len()
                )
                .into(),
            );
            error!("put_multi store write failed: {}", e);
            return Err(PutError::Store(e));
        }

        let release = if transaction.is_some() {
            LockRelease::Deferred
        } else {
            debug!("put_multi {}", WriteStage::Unlocking);
            match self.round_trip(ctx, self.cache.delete_multi(&locks.keys)).await {
                Ok(Ok(())) => LockRelease::Released,
                Ok(Err(e)) => {
                    warn!("put_multi cache lock release failed: {}", e);
                    LockRelease::Failed(e.into())
                }
                Err(reason) => {
                    warn!("put_multi cache lock release {}", reason);
                    LockRelease::Failed(CleanupError::Interrupted(reason))
                }
            }
        };

        debug!("put_multi {}", WriteStage::Done);
        Ok(Committed {
            keys: resolved,
            release,
        })
    }

    /// Write a single record. Returns the resolved key.
    ///
    /// A per-key store failure is returned as the underlying error rather than
    /// a one-element [`MultiError`].
    pub async fn put<V>(&self, ctx: &WriteContext, key: &Key, record: &V) -> Result<Key, PutError>
    where
        S: PrimaryStore<V>,
        V: Send + Sync,
    {
        match self
            .put_multi(ctx, slice::from_ref(key), slice::from_ref(record))
            .await
        {
            Ok(committed) => committed.keys.into_iter().next().ok_or_else(|| {
                PutError::Store(StoreError::Backend("store returned no key".into()))
            }),
            Err(PutError::Store(StoreError::Multi(multi))) => {
                Err(PutError::Store(into_scalar_error(multi)))
            }
            Err(e) => Err(e),
        }
    }

    /// Await one cache or store call, giving up when the context is cancelled
    /// or the configured round trip timeout elapses.
    async fn round_trip<T>(
        &self,
        ctx: &WriteContext,
        call: impl Future<Output = T>,
    ) -> Result<T, Interrupted> {
        let limited = async {
            match self.config.round_trip_timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| Interrupted::TimedOut(limit)),
                None => Ok(call.await),
            }
        };

        tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(Interrupted::Cancelled),
            result = limited => result,
        }
    }
}

fn interrupted(stage: WriteStage, reason: Interrupted) -> PutError {
    error!("put_multi {} in {} stage: {}", WriteStage::Aborted, stage, reason);
    PutError::Interrupted { stage, reason }
}

fn into_scalar_error(multi: MultiError) -> StoreError {
    match <[_; 1]>::try_from(multi.into_inner()) {
        Ok([Some(err)]) => StoreError::Backend(err),
        Ok(single) => StoreError::Multi(MultiError::new(Vec::from(single))),
        Err(errors) => StoreError::Multi(MultiError::new(errors)),
    }
}
