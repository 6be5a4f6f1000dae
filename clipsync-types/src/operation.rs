//! Offline queue entries.

use crate::{HybridClock, ItemId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation carried by a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    /// This device has applied another device's tombstone. The relay fans
    /// the acknowledgment out so every peer can track deletion coverage.
    #[serde(rename = "ack_delete")]
    AckDelete,
}

impl OperationKind {
    /// Kinds that carry item state and update the item's sync status.
    pub fn mutates_item(self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Update)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::AckDelete => write!(f, "ack_delete"),
        }
    }
}

/// A durable, pending mutation awaiting relay acknowledgment.
///
/// `seq` is monotonic per device and assigned by the queue store on
/// enqueue. Together with the device id and item id it forms the
/// idempotency key the relay uses to drop duplicate resends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub seq: i64,
    pub kind: OperationKind,
    pub item_id: ItemId,
    /// Encrypted item payload; empty for deletes.
    pub payload: Vec<u8>,
    pub clock: HybridClock,
}
