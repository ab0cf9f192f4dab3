//! Primary store gateway

use async_trait::async_trait;

use crate::error::StoreError;
use crate::key::Key;

/// Batched authoritative write.
///
/// On success returns one key per input record, in input order, with
/// incomplete keys replaced by store-assigned ones. Per-record failures are
/// reported as [`StoreError::Multi`] aligned with the input batch.
#[async_trait]
pub trait PrimaryStore<V>: Send + Sync + 'static
where
    V: Send + Sync,
{
    async fn put_multi(&self, keys: &[Key], records: &[V]) -> Result<Vec<Key>, StoreError>;
}
