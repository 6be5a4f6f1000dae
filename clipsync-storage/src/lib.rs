//! SQLite storage layer for clipsync.
//!
//! All persistence lives in a single SQLite database shared by facet
//! stores over one `Arc<Mutex<Connection>>`:
//!
//! - [`ItemStore`] — clipboard items, sync status, tombstones, eviction
//! - [`QueueStore`] — the durable offline operation queue
//! - [`SessionStore`] — accounts, device sessions, codes and resets
//! - [`KeyStore`] — per-account encryption keys and atomic rotation
//! - [`SettingsStore`] — the `user_settings` key/value table
//!
//! Item content is treated as opaque bytes throughout; encryption and
//! decryption happen above this crate.

mod error;
mod item_store;
mod key_store;
mod queue_store;
mod session_store;
mod settings_store;

pub use error::{StorageError, StorageResult};
pub use item_store::{ItemFilter, ItemStore, ItemUpdate, SortOrder};
pub use key_store::KeyStore;
pub use queue_store::QueueStore;
pub use session_store::{SessionStore, MAX_DEVICES};
pub use settings_store::SettingsStore;

use clipsync_types::DeviceId;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Connection handle shared by all facet stores.
pub type SharedConn = Arc<Mutex<Connection>>;

/// An open clipsync database.
#[derive(Clone)]
pub struct Database {
    conn: SharedConn,
}

impl Database {
    /// Opens or creates a database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Item store for a device, with the configured active-item cap.
    pub fn items(&self, device: DeviceId, max_items: usize) -> ItemStore {
        ItemStore::new(self.conn.clone(), device, max_items)
    }

    /// Offline queue for a device.
    pub fn queue(&self, device: DeviceId) -> QueueStore {
        QueueStore::new(self.conn.clone(), device)
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.conn.clone())
    }

    pub fn keys(&self) -> KeyStore {
        KeyStore::new(self.conn.clone())
    }

    pub fn settings(&self) -> SettingsStore {
        SettingsStore::new(self.conn.clone())
    }
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            email         TEXT NOT NULL UNIQUE,
            username      TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at    INTEGER NOT NULL,
            updated_at    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token      TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            device_id  TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

        CREATE TABLE IF NOT EXISTS verification_codes (
            email      TEXT PRIMARY KEY,
            code       TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS password_resets (
            email      TEXT NOT NULL,
            token      TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clipboard_items (
            id           TEXT PRIMARY KEY,
            content      BLOB NOT NULL,
            title        TEXT NOT NULL,
            created_at   INTEGER NOT NULL,
            updated_at   INTEGER NOT NULL,
            is_pinned    INTEGER NOT NULL DEFAULT 0,
            user_id      TEXT NOT NULL,
            content_type TEXT NOT NULL,
            encrypted    INTEGER NOT NULL DEFAULT 0,
            clock_device TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_items_user_updated
            ON clipboard_items(user_id, updated_at);

        CREATE TABLE IF NOT EXISTS sync_status (
            item_id           TEXT PRIMARY KEY,
            is_synced         INTEGER NOT NULL DEFAULT 0,
            last_sync_attempt INTEGER
        );

        CREATE TABLE IF NOT EXISTS user_settings (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS encryption_keys (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            key_data   BLOB NOT NULL,
            nonce      BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_keys_user ON encryption_keys(user_id);

        CREATE TABLE IF NOT EXISTS pending_operations (
            seq          INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id    TEXT NOT NULL,
            item_id      TEXT NOT NULL,
            kind         TEXT NOT NULL,
            payload      BLOB NOT NULL,
            clock_ts     INTEGER NOT NULL,
            clock_device TEXT NOT NULL,
            created_at   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_device ON pending_operations(device_id);

        CREATE TABLE IF NOT EXISTS tombstones (
            item_id      TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            clock_ts     INTEGER NOT NULL,
            clock_device TEXT NOT NULL,
            deleted_at   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tombstone_acks (
            item_id  TEXT NOT NULL,
            device_id TEXT NOT NULL,
            acked_at INTEGER NOT NULL,
            PRIMARY KEY (item_id, device_id)
        );
        "#,
    )?;
    Ok(())
}
