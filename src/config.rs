//! Write configuration

use std::time::Duration;

/// Maximum number of records the primary store accepts in one batched write.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Configuration for the locking writer
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// Time-to-live for cache lock entries. Bounds how long a crashed writer
    /// can leave a lock behind.
    pub lock_ttl: Duration,
    /// Largest batch accepted by `put_multi`. Larger batches are rejected.
    pub max_batch_size: usize,
    /// Prefix for cache keys derived from store keys
    pub key_prefix: String,
    /// Optional limit applied to each cache or store round trip
    pub round_trip_timeout: Option<Duration>,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(32),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            key_prefix: "pcache:v1:".to_owned(),
            round_trip_timeout: None,
        }
    }
}
