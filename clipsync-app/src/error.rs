//! Application-level errors.

use clipsync_types::ItemId;
use thiserror::Error;

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    /// Key mismatch or corruption on a specific item. Fatal for that
    /// item, never silently dropped.
    #[error("cannot decrypt item {item_id}: {source}")]
    ItemDecryption {
        item_id: ItemId,
        source: clipsync_crypto::CryptoError,
    },

    #[error(transparent)]
    Storage(#[from] clipsync_storage::StorageError),

    #[error(transparent)]
    Crypto(#[from] clipsync_crypto::CryptoError),

    #[error(transparent)]
    Sync(#[from] clipsync_sync::SyncError),

    #[error(transparent)]
    Capture(#[from] clipsync_capture::CaptureError),
}
