//! Durable offline operation queue.
//!
//! Append-only, ordered by the AUTOINCREMENT `seq` column, which is
//! monotonic per device and survives restarts. Entries leave the queue
//! only through [`QueueStore::ack`], so a crash-and-restart replays
//! exactly the unacknowledged operations in their original order.

use crate::error::{StorageError, StorageResult};
use crate::SharedConn;
use clipsync_types::{
    now_millis, DeviceId, HybridClock, ItemId, OperationKind, PendingOperation,
};
use rusqlite::params;

#[derive(Clone)]
pub struct QueueStore {
    conn: SharedConn,
    device: DeviceId,
}

impl QueueStore {
    pub(crate) fn new(conn: SharedConn, device: DeviceId) -> Self {
        Self { conn, device }
    }

    /// Appends an operation, returning it with its assigned sequence
    /// number.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        item_id: ItemId,
        payload: Vec<u8>,
        clock: HybridClock,
    ) -> StorageResult<PendingOperation> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_operations \
             (device_id, item_id, kind, payload, clock_ts, clock_device, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                self.device.to_string(),
                item_id.to_string(),
                kind.to_string(),
                payload,
                clock.ts,
                clock.device_id.to_string(),
                now_millis(),
            ],
        )?;
        let seq = conn.last_insert_rowid();
        Ok(PendingOperation {
            seq,
            kind,
            item_id,
            payload,
            clock,
        })
    }

    /// All unacknowledged operations for this device, in sequence order.
    pub fn pending(&self) -> StorageResult<Vec<PendingOperation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seq, kind, item_id, payload, clock_ts, clock_device \
             FROM pending_operations WHERE device_id = ? ORDER BY seq ASC",
        )?;
        let ops = stmt
            .query_map(params![self.device.to_string()], row_to_operation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ops)
    }

    /// Removes an acknowledged operation. Returns false when the sequence
    /// number was already gone (duplicate ack).
    pub fn ack(&self, seq: i64) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM pending_operations WHERE device_id = ? AND seq = ?",
            params![self.device.to_string(), seq],
        )?;
        Ok(removed > 0)
    }

    pub fn len(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_operations WHERE device_id = ?",
            params![self.device.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn row_to_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingOperation> {
    let kind_str: String = row.get(1)?;
    let kind = match kind_str.as_str() {
        "create" => OperationKind::Create,
        "update" => OperationKind::Update,
        "delete" => OperationKind::Delete,
        "ack_delete" => OperationKind::AckDelete,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(StorageError::InvalidData(format!(
                    "unknown operation kind: {other}"
                ))),
            ))
        }
    };
    let item_id_str: String = row.get(2)?;
    let item_id = item_id_str.parse::<ItemId>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(PendingOperation {
        seq: row.get(0)?,
        kind,
        item_id,
        payload: row.get(3)?,
        clock: HybridClock::new(row.get(4)?, DeviceId::from(row.get::<_, String>(5)?)),
    })
}
