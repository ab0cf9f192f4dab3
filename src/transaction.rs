//! Transaction lock buffer and per-call write context

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::LockCache;
use crate::error::CacheError;
use crate::lock::CacheItem;

/// Lock entries collected by writes issued inside one store transaction.
///
/// Writes made inside a transaction only become visible when it commits, so
/// their locks are buffered here instead of being installed and released
/// around each individual write. Any number of concurrent writers may append;
/// whoever finishes the transaction drains the buffer once.
#[derive(Debug, Default)]
pub struct Transaction {
    pending: Mutex<Vec<CacheItem>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer lock entries. Never touches the cache.
    pub async fn append(&self, items: Vec<CacheItem>) {
        if items.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().await;
        pending.extend(items);
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Drain every buffered lock entry.
    pub async fn take_pending(&self) -> Vec<CacheItem> {
        std::mem::take(&mut *self.pending.lock().await)
    }

    /// Install the buffered locks after the transaction committed.
    ///
    /// Readers that fetched pre-commit data cannot cache it while the locks
    /// are in place; the locks are not deleted and expire on their own.
    /// Returns the number of locks installed. On failure the locks stay
    /// buffered so the flush can be retried.
    pub async fn flush_locks<C>(&self, cache: &C) -> Result<usize, CacheError>
    where
        C: LockCache + ?Sized,
    {
        let items = self.take_pending().await;
        if let Err(e) = cache.set_multi(&items).await {
            // Put the locks back ahead of anything appended meanwhile so a
            // retry installs them all.
            let mut pending = self.pending.lock().await;
            let appended = std::mem::replace(&mut *pending, items);
            pending.extend(appended);
            warn!("Transaction lock flush failed, {} locks kept: {}", pending.len(), e);
            return Err(e);
        }
        debug!("Transaction flushed {} cache locks", items.len());
        Ok(items.len())
    }
}

/// Per-call context for a batch write.
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    transaction: Option<Arc<Transaction>>,
    cancel: CancellationToken,
}

impl WriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the write inside `transaction`: locks are buffered there and
    /// never released by the writer.
    pub fn with_transaction(mut self, transaction: Arc<Transaction>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Abort pending round trips when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn transaction(&self) -> Option<&Arc<Transaction>> {
        self.transaction.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
