//! Encryption key persistence and atomic rotation.
//!
//! At most one active key per account: the newest row in
//! `encryption_keys` for a user. Rotation swaps the key and rewrites
//! every re-encrypted item in a single transaction, so a failure at any
//! point leaves the prior key active and all content readable.

use crate::error::{StorageError, StorageResult};
use crate::SharedConn;
use clipsync_crypto::{AccountKey, KeyMaterial, NONCE_SIZE};
use clipsync_types::ItemId;
use rusqlite::params;
use tracing::info;

#[derive(Clone)]
pub struct KeyStore {
    conn: SharedConn,
}

impl KeyStore {
    pub(crate) fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// The account's active key, if one exists.
    pub fn active_key(&self, user_id: &str) -> StorageResult<Option<AccountKey>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, user_id, key_data, nonce, created_at FROM encryption_keys \
             WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
            params![user_id],
            row_to_key,
        );
        match result {
            Ok(key) => Ok(Some(key?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the account's active key, generating and persisting one on
    /// first use.
    pub fn ensure_key(&self, user_id: &str) -> StorageResult<AccountKey> {
        if let Some(key) = self.active_key(user_id)? {
            return Ok(key);
        }
        let key = AccountKey::generate(user_id);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO encryption_keys (id, user_id, key_data, nonce, created_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                key.id,
                key.user_id,
                key.material.as_bytes().as_slice(),
                key.nonce.as_slice(),
                key.created_at,
            ],
        )?;
        info!(user_id, key_id = %key.id, "generated account encryption key");
        Ok(key)
    }

    /// Commits a key rotation: rewrites each item's content and each
    /// queued payload with its re-encrypted bytes, drops the old key
    /// rows, and installs the new key — all in one transaction. The
    /// caller performs the actual re-encryption beforehand and never
    /// calls this if anything failed.
    ///
    /// Each item rewrite carries the `updated_at` the caller re-encrypted
    /// from; an edit committing since then fails `Conflict` so the stale
    /// ciphertext never reverts it — the caller re-encrypts and retries.
    /// A queued payload whose operation was acknowledged in the meantime
    /// is simply skipped.
    ///
    /// Rotation only swaps ciphertext; it is not an edit, so item clocks
    /// and sync status are untouched.
    pub fn rotate(
        &self,
        user_id: &str,
        new_key: &AccountKey,
        reencrypted: &[(ItemId, i64, Vec<u8>)],
        requeued: &[(i64, Vec<u8>)],
    ) -> StorageResult<()> {
        if new_key.user_id != user_id {
            return Err(StorageError::InvalidData(
                "rotation key belongs to a different account".to_string(),
            ));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for (item_id, basis, content) in reencrypted {
            let changed = tx.execute(
                "UPDATE clipboard_items SET content = ? \
                 WHERE id = ? AND user_id = ? AND updated_at = ?",
                params![content, item_id.to_string(), user_id, basis],
            )?;
            if changed == 0 {
                // Edited or deleted since re-encryption; abort so the old
                // key stays active and nothing is half-rotated.
                let stored = tx
                    .query_row(
                        "SELECT updated_at FROM clipboard_items WHERE id = ? AND user_id = ?",
                        params![item_id.to_string(), user_id],
                        |row| row.get::<_, i64>(0),
                    )
                    .ok();
                return match stored {
                    Some(stored) => Err(StorageError::Conflict {
                        item_id: *item_id,
                        expected: *basis,
                        stored,
                    }),
                    None => Err(StorageError::NotFound(format!("item {item_id}"))),
                };
            }
        }

        for (seq, payload) in requeued {
            tx.execute(
                "UPDATE pending_operations SET payload = ? WHERE seq = ?",
                params![payload, seq],
            )?;
        }

        tx.execute(
            "DELETE FROM encryption_keys WHERE user_id = ?",
            params![user_id],
        )?;
        tx.execute(
            "INSERT INTO encryption_keys (id, user_id, key_data, nonce, created_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                new_key.id,
                new_key.user_id,
                new_key.material.as_bytes().as_slice(),
                new_key.nonce.as_slice(),
                new_key.created_at,
            ],
        )?;
        tx.commit()?;

        info!(
            user_id,
            key_id = %new_key.id,
            items = reencrypted.len(),
            queued = requeued.len(),
            "rotated account encryption key"
        );
        Ok(())
    }
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<StorageResult<AccountKey>> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let key_data: Vec<u8> = row.get(2)?;
    let nonce_data: Vec<u8> = row.get(3)?;
    let created_at: i64 = row.get(4)?;

    Ok((|| {
        let material = KeyMaterial::from_slice(&key_data)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let nonce: [u8; NONCE_SIZE] = nonce_data
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::InvalidData("bad nonce length".to_string()))?;
        Ok(AccountKey {
            id,
            user_id,
            material,
            nonce,
            created_at,
        })
    })())
}
