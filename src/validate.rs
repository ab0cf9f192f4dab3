//! Batch precondition checks

use crate::error::ValidationError;
use crate::key::{Key, KeyId};

/// Check that a batch can be written. Performs no I/O.
pub fn check_multi_args<V>(
    keys: &[Key],
    records: &[V],
    max_batch_size: usize,
) -> Result<(), ValidationError> {
    if keys.len() != records.len() {
        return Err(ValidationError::LengthMismatch {
            keys: keys.len(),
            records: records.len(),
        });
    }

    if keys.len() > max_batch_size {
        return Err(ValidationError::BatchTooLarge {
            len: keys.len(),
            max: max_batch_size,
        });
    }

    for (index, key) in keys.iter().enumerate() {
        if let Some(reason) = invalid_key_reason(key) {
            return Err(ValidationError::InvalidKey { index, reason });
        }
    }

    Ok(())
}

fn invalid_key_reason(key: &Key) -> Option<&'static str> {
    if key.kind().is_empty() {
        return Some("empty kind");
    }
    if matches!(key.id(), KeyId::Name(name) if name.is_empty()) {
        return Some("empty name");
    }
    match key.parent() {
        Some(parent) if parent.is_incomplete() => Some("incomplete parent"),
        Some(parent) => invalid_key_reason(parent),
        None => None,
    }
}
