//! Write-path error types

use std::fmt;
use std::time::Duration;

use redis::RedisError;

use crate::writer::WriteStage;

/// Boxed error returned by gateway implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A batch failed its precondition checks. Nothing was sent anywhere.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("keys and records have different lengths ({keys} != {records})")]
    LengthMismatch { keys: usize, records: usize },

    #[error("batch of {len} exceeds the maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("invalid key at index {index}: {reason}")]
    InvalidKey { index: usize, reason: &'static str },
}

/// Cache gateway errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(BoxError),
}

/// Per-index errors from a batched store write.
///
/// `errors[i]` is `Some` when the record at index `i` of the input batch failed.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Option<BoxError>>,
}

impl MultiError {
    pub fn new(errors: Vec<Option<BoxError>>) -> Self {
        Self { errors }
    }

    /// Number of entries, equal to the size of the failed batch.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Error for the record at `index`, if that record failed.
    pub fn get(&self, index: usize) -> Option<&BoxError> {
        self.errors.get(index).and_then(Option::as_ref)
    }

    /// Indices of the records that failed.
    pub fn failed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| i))
    }

    pub fn into_inner(self) -> Vec<Option<BoxError>> {
        self.errors
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failed = self.errors.iter().flatten();
        match failed.next() {
            None => write!(f, "(0 errors)"),
            Some(first) => {
                let others = failed.count();
                match others {
                    0 => write!(f, "{}", first),
                    1 => write!(f, "{} (and 1 other error)", first),
                    n => write!(f, "{} (and {} other errors)", first, n),
                }
            }
        }
    }
}

impl std::error::Error for MultiError {}

/// Primary store gateway errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Multi(MultiError),

    #[error("Store error: {0}")]
    Backend(BoxError),
}

/// A round trip that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failure of a batch write. Returned only when the write did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Locks could not be installed, so the store was not written.
    #[error("Cache lock error: {0}")]
    CacheLock(#[source] CacheError),

    /// The store write failed. Installed locks are left to expire.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{stage} {reason}")]
    Interrupted {
        stage: WriteStage,
        #[source]
        reason: Interrupted,
    },
}

/// Lock cleanup failure after a successful write. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("lock release {0}")]
    Interrupted(Interrupted),
}
