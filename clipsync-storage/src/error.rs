//! Storage error types.

use clipsync_types::ItemId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("stale version for item {item_id}: caller saw updated_at {expected}, store has {stored}")]
    Conflict {
        item_id: ItemId,
        expected: i64,
        stored: i64,
    },

    #[error("store is full: cap reached with {0} pinned items, nothing evictable")]
    StorageFull(usize),

    #[error("device limit exceeded: account already has {0} active device sessions")]
    DeviceLimitExceeded(usize),

    #[error("session expired")]
    AuthExpired,

    #[error("invalid data: {0}")]
    InvalidData(String),
}
