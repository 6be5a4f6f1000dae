//! Clipboard item store — items, sync status, tombstones, eviction.
//!
//! Item content is opaque bytes (ciphertext when the encryption layer is
//! on); no query here ever inspects it beyond the optional plaintext text
//! filter, which skips encrypted rows.
//!
//! Concurrency: all mutations go through the shared connection mutex, and
//! logical races on the same item are caught by the optimistic
//! `updated_at` check — the caller passes the `updated_at` it last
//! observed, and a mismatch fails with `Conflict` instead of silently
//! overwriting.

use crate::error::{StorageError, StorageResult};
use crate::SharedConn;
use clipsync_types::{
    now_millis, ClipboardItem, DeviceId, HybridClock, ItemId, ItemVersion, SyncStatus,
    VersionPayload,
};
use rusqlite::{params, Connection};
use tracing::debug;

const ITEM_COLS: &str =
    "id, content, title, created_at, updated_at, is_pinned, user_id, content_type, encrypted, clock_device";

/// Mutable fields for [`ItemStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub content: Option<Vec<u8>>,
    pub title: Option<String>,
    pub content_type: Option<String>,
    pub is_pinned: Option<bool>,
    pub encrypted: Option<bool>,
}

/// Filters for [`ItemStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Substring match against title (and plaintext content).
    pub text: Option<String>,
    /// Only pinned items.
    pub pinned_only: bool,
    /// Only items updated at or after this unix-millis timestamp.
    pub since: Option<i64>,
    pub limit: Option<i64>,
}

/// Sort orders for [`ItemStore::list`]. Pinned items always come first
/// regardless of the chosen order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    DateDesc,
    DateAsc,
    TitleAsc,
    TitleDesc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::DateDesc => "updated_at DESC",
            SortOrder::DateAsc => "updated_at ASC",
            SortOrder::TitleAsc => "title COLLATE NOCASE ASC, updated_at DESC",
            SortOrder::TitleDesc => "title COLLATE NOCASE DESC, updated_at DESC",
        }
    }
}

/// Store for clipboard items and their sync bookkeeping.
#[derive(Clone)]
pub struct ItemStore {
    conn: SharedConn,
    device: DeviceId,
    max_items: usize,
}

impl ItemStore {
    pub(crate) fn new(conn: SharedConn, device: DeviceId, max_items: usize) -> Self {
        Self {
            conn,
            device,
            max_items,
        }
    }

    /// Creates an item, evicting the least-recently-updated unpinned item
    /// first when the active cap is reached. Fails `StorageFull` when
    /// everything at the cap is pinned.
    pub fn create(
        &self,
        user_id: &str,
        content: Vec<u8>,
        title: &str,
        content_type: &str,
        encrypted: bool,
    ) -> StorageResult<ClipboardItem> {
        let item = ClipboardItem::new(
            user_id,
            content,
            title,
            content_type,
            encrypted,
            self.device.clone(),
        );

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let count = active_count(&tx, user_id)?;
        if count >= self.max_items {
            let mut need = count + 1 - self.max_items;
            while need > 0 {
                match lru_unpinned(&tx, user_id)? {
                    Some(victim) => {
                        remove_item(&tx, &victim)?;
                        debug!(item_id = %victim, "evicted unpinned item at cap");
                        need -= 1;
                    }
                    None => {
                        return Err(StorageError::StorageFull(active_count(&tx, user_id)?));
                    }
                }
            }
        }

        insert_item(&tx, &item)?;
        tx.execute(
            "INSERT INTO sync_status (item_id, is_synced, last_sync_attempt) VALUES (?, 0, NULL)",
            params![item.id.to_string()],
        )?;
        tx.commit()?;

        Ok(item)
    }

    /// Fetches an item, failing `NotFound` when absent.
    pub fn get(&self, id: ItemId) -> StorageResult<ClipboardItem> {
        self.get_opt(id)?
            .ok_or_else(|| StorageError::NotFound(format!("item {id}")))
    }

    pub fn get_opt(&self, id: ItemId) -> StorageResult<Option<ClipboardItem>> {
        let conn = self.conn.lock().unwrap();
        fetch_item(&conn, id)
    }

    /// Applies a partial update under an optimistic version check.
    ///
    /// `expected_updated_at` is the `updated_at` the caller last observed;
    /// a mismatch fails with `Conflict` carrying both values. On success
    /// `updated_at` is bumped monotonically (`max(now, prev + 1)`) and the
    /// item is marked unsynced.
    pub fn update(
        &self,
        id: ItemId,
        fields: ItemUpdate,
        expected_updated_at: i64,
    ) -> StorageResult<ClipboardItem> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut item =
            fetch_item(&tx, id)?.ok_or_else(|| StorageError::NotFound(format!("item {id}")))?;
        if item.updated_at != expected_updated_at {
            return Err(StorageError::Conflict {
                item_id: id,
                expected: expected_updated_at,
                stored: item.updated_at,
            });
        }

        if let Some(content) = fields.content {
            item.content = content;
        }
        if let Some(title) = fields.title {
            item.title = title;
        }
        if let Some(content_type) = fields.content_type {
            item.content_type = content_type;
        }
        if let Some(is_pinned) = fields.is_pinned {
            item.is_pinned = is_pinned;
        }
        if let Some(encrypted) = fields.encrypted {
            item.encrypted = encrypted;
        }
        item.updated_at = bump(item.updated_at);
        item.clock_device = self.device.clone();

        tx.execute(
            "UPDATE clipboard_items SET content = ?, title = ?, content_type = ?, is_pinned = ?, \
             encrypted = ?, updated_at = ?, clock_device = ? WHERE id = ?",
            params![
                item.content,
                item.title,
                item.content_type,
                item.is_pinned,
                item.encrypted,
                item.updated_at,
                self.device.to_string(),
                id.to_string(),
            ],
        )?;
        tx.execute(
            "UPDATE sync_status SET is_synced = 0 WHERE item_id = ?",
            params![id.to_string()],
        )?;
        tx.commit()?;

        Ok(item)
    }

    /// Converts an item into a tombstone, removing it from active listing
    /// immediately. Returns the tombstone's clock so the caller can
    /// enqueue the delete for sync. The tombstone is retained until every
    /// registered device acknowledges it (see [`ItemStore::reap_tombstones`]).
    pub fn delete(&self, id: ItemId) -> StorageResult<HybridClock> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let item =
            fetch_item(&tx, id)?.ok_or_else(|| StorageError::NotFound(format!("item {id}")))?;
        let clock = HybridClock::new(bump(item.updated_at), self.device.clone());

        tx.execute(
            "INSERT OR REPLACE INTO tombstones (item_id, user_id, clock_ts, clock_device, deleted_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                id.to_string(),
                item.user_id,
                clock.ts,
                clock.device_id.to_string(),
                now_millis(),
            ],
        )?;
        remove_item(&tx, &id)?;
        tx.commit()?;

        Ok(clock)
    }

    /// Lists active items. Pinned items always sort before unpinned ones,
    /// ties broken by `updated_at` descending within the chosen order.
    pub fn list(
        &self,
        user_id: &str,
        filter: &ItemFilter,
        sort: SortOrder,
    ) -> StorageResult<Vec<ClipboardItem>> {
        let mut sql = format!("SELECT {ITEM_COLS} FROM clipboard_items WHERE user_id = ?");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];

        if filter.pinned_only {
            sql.push_str(" AND is_pinned = 1");
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND updated_at >= ?");
            params_vec.push(Box::new(since));
        }
        if let Some(text) = &filter.text {
            sql.push_str(
                " AND (title LIKE ? OR (encrypted = 0 AND CAST(content AS TEXT) LIKE ?))",
            );
            let pattern = format!("%{text}%");
            params_vec.push(Box::new(pattern.clone()));
            params_vec.push(Box::new(pattern));
        }

        sql.push_str(" ORDER BY is_pinned DESC, ");
        sql.push_str(sort.sql());
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params_vec.push(Box::new(limit));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(rusqlite::params_from_iter(params_vec.iter()), row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Removes every unpinned item for a user (local history clear).
    /// Like eviction this is a cache trim, not a synced delete.
    pub fn clear_unpinned(&self, user_id: &str) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM sync_status WHERE item_id IN \
             (SELECT id FROM clipboard_items WHERE user_id = ? AND is_pinned = 0)",
            params![user_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM clipboard_items WHERE user_id = ? AND is_pinned = 0",
            params![user_id],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    // ── Resolver integration ────────────────────────────────────

    /// The item's current version as the conflict resolver sees it:
    /// the live item, the tombstone, or nothing.
    pub fn current_version(&self, id: ItemId) -> StorageResult<Option<ItemVersion>> {
        let conn = self.conn.lock().unwrap();
        fetch_version(&conn, id)
    }

    /// Writes a resolved winning version. Idempotent: re-applying the same
    /// version leaves the store unchanged.
    ///
    /// `basis` is the local version the resolver compared against (`None`
    /// when the item was absent). The check is re-run inside the write
    /// transaction: if a local edit committed since the caller's read, the
    /// stored clock no longer matches and the write fails `Conflict`
    /// instead of regressing the item — the caller reloads and re-resolves.
    pub fn apply_remote(
        &self,
        user_id: &str,
        version: &ItemVersion,
        basis: Option<&HybridClock>,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let stored = fetch_version(&tx, version.item_id)?;
        if stored.as_ref().map(|v| &v.clock) != basis {
            return Err(StorageError::Conflict {
                item_id: version.item_id,
                expected: basis.map(|c| c.ts).unwrap_or(0),
                stored: stored.map(|v| v.clock.ts).unwrap_or(0),
            });
        }

        match &version.payload {
            VersionPayload::Item(item) => {
                tx.execute(
                    "DELETE FROM tombstones WHERE item_id = ?",
                    params![version.item_id.to_string()],
                )?;
                insert_item(&tx, item)?;
                tx.execute(
                    "INSERT INTO sync_status (item_id, is_synced, last_sync_attempt) \
                     VALUES (?1, 1, ?2) \
                     ON CONFLICT(item_id) DO UPDATE SET is_synced = 1, last_sync_attempt = ?2",
                    params![version.item_id.to_string(), now_millis()],
                )?;
            }
            VersionPayload::Tombstone => {
                remove_item(&tx, &version.item_id)?;
                tx.execute(
                    "INSERT OR REPLACE INTO tombstones (item_id, user_id, clock_ts, clock_device, deleted_at) \
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        version.item_id.to_string(),
                        user_id,
                        version.clock.ts,
                        version.clock.device_id.to_string(),
                        now_millis(),
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // ── Tombstone lifecycle ─────────────────────────────────────

    /// Records that a device has acknowledged a deletion.
    pub fn ack_tombstone(&self, item_id: ItemId, device: &DeviceId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tombstone_acks (item_id, device_id, acked_at) VALUES (?, ?, ?)",
            params![item_id.to_string(), device.to_string(), now_millis()],
        )?;
        Ok(())
    }

    /// Physically removes tombstones acknowledged by every registered
    /// device. Returns the number reaped.
    pub fn reap_tombstones(&self, registered: &[DeviceId]) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT item_id FROM tombstones")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut reaped = 0usize;
        for id in ids {
            let mut covered = true;
            for device in registered {
                let acked: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM tombstone_acks WHERE item_id = ? AND device_id = ?)",
                    params![id, device.to_string()],
                    |row| row.get(0),
                )?;
                if !acked {
                    covered = false;
                    break;
                }
            }
            if covered {
                tx.execute("DELETE FROM tombstones WHERE item_id = ?", params![id])?;
                tx.execute("DELETE FROM tombstone_acks WHERE item_id = ?", params![id])?;
                reaped += 1;
            }
        }

        tx.commit()?;
        if reaped > 0 {
            debug!(reaped, "reaped fully acknowledged tombstones");
        }
        Ok(reaped)
    }

    // ── Sync status ─────────────────────────────────────────────

    /// Marks an item as synced (sync client only).
    pub fn mark_synced(&self, item_id: ItemId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_status SET is_synced = 1, last_sync_attempt = ? WHERE item_id = ?",
            params![now_millis(), item_id.to_string()],
        )?;
        Ok(())
    }

    /// Records a failed sync attempt without changing the synced flag.
    pub fn mark_sync_attempt(&self, item_id: ItemId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_status SET last_sync_attempt = ? WHERE item_id = ?",
            params![now_millis(), item_id.to_string()],
        )?;
        Ok(())
    }

    pub fn sync_status(&self, item_id: ItemId) -> StorageResult<Option<SyncStatus>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT item_id, is_synced, last_sync_attempt FROM sync_status WHERE item_id = ?",
            params![item_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        );
        match result {
            Ok((id_str, is_synced, last_sync_attempt)) => {
                let item_id = id_str
                    .parse::<ItemId>()
                    .map_err(|e| StorageError::InvalidData(e.to_string()))?;
                Ok(Some(SyncStatus {
                    item_id,
                    is_synced,
                    last_sync_attempt,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Items whose sync status is still pending, oldest first.
    pub fn unsynced_items(&self, user_id: &str) -> StorageResult<Vec<ClipboardItem>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {cols} FROM clipboard_items i \
             JOIN sync_status s ON s.item_id = i.id \
             WHERE i.user_id = ? AND s.is_synced = 0 \
             ORDER BY i.updated_at ASC",
            cols = ITEM_COLS
                .split(", ")
                .map(|c| format!("i.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![user_id], row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn active_count(&self, user_id: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        active_count(&conn, user_id)
    }
}

/// Next value for a monotonic `updated_at`: wall clock, or previous + 1
/// when the wall clock has not advanced.
fn bump(prev: i64) -> i64 {
    now_millis().max(prev + 1)
}

fn active_count(conn: &Connection, user_id: &str) -> StorageResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM clipboard_items WHERE user_id = ?",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn lru_unpinned(conn: &Connection, user_id: &str) -> StorageResult<Option<ItemId>> {
    let result = conn.query_row(
        "SELECT id FROM clipboard_items WHERE user_id = ? AND is_pinned = 0 \
         ORDER BY updated_at ASC LIMIT 1",
        params![user_id],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(id_str) => Ok(Some(
            id_str
                .parse::<ItemId>()
                .map_err(|e| StorageError::InvalidData(e.to_string()))?,
        )),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn insert_item(conn: &Connection, item: &ClipboardItem) -> StorageResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO clipboard_items \
         (id, content, title, created_at, updated_at, is_pinned, user_id, content_type, encrypted, clock_device) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            item.id.to_string(),
            item.content,
            item.title,
            item.created_at,
            item.updated_at,
            item.is_pinned,
            item.user_id,
            item.content_type,
            item.encrypted,
            item.clock_device.to_string(),
        ],
    )?;
    Ok(())
}

fn remove_item(conn: &Connection, id: &ItemId) -> StorageResult<()> {
    conn.execute(
        "DELETE FROM clipboard_items WHERE id = ?",
        params![id.to_string()],
    )?;
    conn.execute(
        "DELETE FROM sync_status WHERE item_id = ?",
        params![id.to_string()],
    )?;
    Ok(())
}

fn fetch_item(conn: &Connection, id: ItemId) -> StorageResult<Option<ClipboardItem>> {
    let result = conn.query_row(
        &format!("SELECT {ITEM_COLS} FROM clipboard_items WHERE id = ?"),
        params![id.to_string()],
        row_to_item,
    );
    match result {
        Ok(item) => Ok(Some(item)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Live item, tombstone, or nothing — the resolver's view of an item.
fn fetch_version(conn: &Connection, id: ItemId) -> StorageResult<Option<ItemVersion>> {
    if let Some(item) = fetch_item(conn, id)? {
        return Ok(Some(ItemVersion::from_item(item)));
    }
    let result = conn.query_row(
        "SELECT clock_ts, clock_device FROM tombstones WHERE item_id = ?",
        params![id.to_string()],
        |row| {
            Ok(HybridClock::new(
                row.get(0)?,
                DeviceId::from(row.get::<_, String>(1)?),
            ))
        },
    );
    match result {
        Ok(clock) => Ok(Some(ItemVersion::tombstone(id, clock))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClipboardItem> {
    let id_str: String = row.get(0)?;
    let id = id_str.parse::<ItemId>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ClipboardItem {
        id,
        content: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        is_pinned: row.get(5)?,
        user_id: row.get(6)?,
        content_type: row.get(7)?,
        encrypted: row.get(8)?,
        clock_device: DeviceId::from(row.get::<_, String>(9)?),
    })
}
