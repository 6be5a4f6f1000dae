//! Clipboard item model and the versions fed to the conflict resolver.

use crate::{now_millis, DeviceId, HybridClock, ItemId};
use serde::{Deserialize, Serialize};

/// MIME type for plain text content, the default for captured clipboard data.
pub const TEXT_PLAIN: &str = "text/plain";

/// A clipboard item as stored locally and shipped over the relay.
///
/// `content` is opaque bytes: plaintext when `encrypted` is false,
/// ciphertext (nonce-prefixed) when true. The storage layer never looks
/// inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub id: ItemId,
    pub user_id: String,
    pub content: Vec<u8>,
    pub title: String,
    pub content_type: String,
    /// Unix millis. Never changes after creation.
    pub created_at: i64,
    /// Unix millis. Monotonically non-decreasing across edits; doubles as
    /// the physical component of the item's hybrid clock.
    pub updated_at: i64,
    pub is_pinned: bool,
    pub encrypted: bool,
    /// Device that performed the last mutation (clock tie-break).
    pub clock_device: DeviceId,
}

impl ClipboardItem {
    pub fn new(
        user_id: &str,
        content: Vec<u8>,
        title: &str,
        content_type: &str,
        encrypted: bool,
        device: DeviceId,
    ) -> Self {
        let now = now_millis();
        Self {
            id: ItemId::new(),
            user_id: user_id.to_string(),
            content,
            title: title.to_string(),
            content_type: content_type.to_string(),
            created_at: now,
            updated_at: now,
            is_pinned: false,
            encrypted,
            clock_device: device,
        }
    }

    /// Hybrid clock of the item's last mutation.
    pub fn clock(&self) -> HybridClock {
        HybridClock::new(self.updated_at, self.clock_device.clone())
    }
}

/// Per-item sync tracking, 1:1 with `ClipboardItem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub item_id: ItemId,
    pub is_synced: bool,
    pub last_sync_attempt: Option<i64>,
}

/// The state side of an [`ItemVersion`]: a live item or a delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionPayload {
    Item(ClipboardItem),
    Tombstone,
}

/// One version of an item as seen by the conflict resolver.
///
/// Updates and deletions are versions alike; the resolver only looks at
/// the clock, so delete-beats-update and update-beats-delete both fall out
/// of the same comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVersion {
    pub item_id: ItemId,
    pub clock: HybridClock,
    pub payload: VersionPayload,
}

impl ItemVersion {
    pub fn from_item(item: ClipboardItem) -> Self {
        Self {
            item_id: item.id,
            clock: item.clock(),
            payload: VersionPayload::Item(item),
        }
    }

    pub fn tombstone(item_id: ItemId, clock: HybridClock) -> Self {
        Self {
            item_id,
            clock,
            payload: VersionPayload::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.payload, VersionPayload::Tombstone)
    }
}
