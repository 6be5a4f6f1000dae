//! Relay wire protocol frames.
//!
//! JSON over a persistent bidirectional channel, authenticated per device
//! with session token + device id at connect time. Payload bytes are
//! ciphertext by the time they reach a frame; the relay never sees
//! plaintext.

use clipsync_types::{DeviceId, HybridClock, ItemId, ItemVersion, OperationKind, PendingOperation};
use serde::{Deserialize, Serialize};

/// Client → relay: one queued mutation.
///
/// `(device_id, item_id, seq)` in the surrounding session is the
/// idempotency key the relay uses to drop duplicate resends, so replaying
/// a frame after a crash is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub op: OperationKind,
    pub item_id: ItemId,
    /// Encrypted item bytes; empty for deletes.
    #[serde(with = "serde_bytes_base64")]
    pub payload: Vec<u8>,
    pub clock: HybridClock,
    pub seq: i64,
}

impl ClientFrame {
    pub fn from_operation(op: &PendingOperation) -> Self {
        Self {
            op: op.kind,
            item_id: op.item_id,
            payload: op.payload.clone(),
            clock: op.clock.clone(),
            seq: op.seq,
        }
    }
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RelayFrame {
    /// An inbound change from another device, fed to the resolver.
    Apply { item: ItemVersion },
    /// Acknowledgment of a [`ClientFrame`] by queue sequence number.
    Ack { seq: i64 },
    /// Fan-out of a peer's `ack_delete` frame: `device` has applied the
    /// tombstone for `item_id`. Once every registered device is covered
    /// the tombstone can be reaped.
    #[serde(rename = "tombstone_ack")]
    TombstoneAck { item_id: ItemId, device: DeviceId },
}

/// Payload bytes travel as base64 strings inside JSON frames.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
