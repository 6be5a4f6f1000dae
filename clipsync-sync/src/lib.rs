//! Sync engine: conflict resolution, relay wire protocol, and the
//! client-side connection state machine.
//!
//! The [`SyncClient`] owns all I/O and drives two loops from one task:
//! draining the offline queue to the relay (single-flight, in sequence
//! order) and applying inbound changes through the [`resolver`]. The
//! resolver itself is a pure function over item versions and never
//! touches storage.

pub mod client;
pub mod protocol;
pub mod resolver;
pub mod transport;

pub use client::{
    create_sync_client, SyncClient, SyncClientConfig, SyncEvent, SyncHandle, SyncState,
};
pub use protocol::{ClientFrame, RelayFrame};
pub use resolver::{resolve, resolve_all};
pub use transport::{ChannelRelay, ChannelTransport, RelayTransport};

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Recoverable. The client transitions to Disconnected and retries
    /// with backoff; it is never surfaced as fatal.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("no acknowledgment for seq {seq} within {timeout_ms}ms")]
    AckTimeout { seq: i64, timeout_ms: u64 },

    #[error("session expired, re-authentication required")]
    AuthExpired,

    #[error("sync client not running")]
    ChannelClosed,

    #[error("unexpected relay frame: {0}")]
    Protocol(String),

    #[error("storage error: {0}")]
    Storage(#[from] clipsync_storage::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
