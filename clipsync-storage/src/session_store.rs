//! Accounts, device sessions, verification codes, and password resets.
//!
//! The five-device cap lives here: a device session is the unit the cap
//! counts, and registration fails `DeviceLimitExceeded` once an account
//! has five concurrently valid sessions on distinct devices.

use crate::error::{StorageError, StorageResult};
use crate::SharedConn;
use clipsync_types::{now_millis, DeviceId, Session, User};
use rusqlite::params;
use tracing::info;

/// Maximum number of concurrently registered devices per account.
pub const MAX_DEVICES: usize = 5;

/// Verification codes expire after ten minutes.
const CODE_TTL_MS: i64 = 10 * 60 * 1000;
/// Password reset tokens expire after one hour.
const RESET_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Clone)]
pub struct SessionStore {
    conn: SharedConn,
}

impl SessionStore {
    pub(crate) fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    // ── Users ───────────────────────────────────────────────────

    /// Creates an account. The password hash is produced by the caller
    /// (clipsync-crypto); raw passwords never reach this crate.
    pub fn create_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> StorageResult<User> {
        let now = now_millis();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            updated_at: now,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, username, password_hash, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                user.id,
                user.email,
                user.username,
                user.password_hash,
                user.created_at,
                user.updated_at,
            ],
        )?;
        Ok(user)
    }

    pub fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, email, username, password_hash, created_at, updated_at \
             FROM users WHERE email = ?",
            params![email],
            row_to_user,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, user_id: &str) -> StorageResult<User> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, email, username, password_hash, created_at, updated_at \
             FROM users WHERE id = ?",
            params![user_id],
            row_to_user,
        );
        match result {
            Ok(user) => Ok(user),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StorageError::NotFound(format!("user {user_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Updates the account's profile fields. Email uniqueness is enforced
    /// by the schema.
    pub fn update_user_profile(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
    ) -> StorageResult<User> {
        {
            let conn = self.conn.lock().unwrap();
            let changed = conn.execute(
                "UPDATE users SET username = ?, email = ?, updated_at = ? WHERE id = ?",
                params![username, email, now_millis(), user_id],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound(format!("user {user_id}")));
            }
        }
        self.get_user(user_id)
    }

    /// Installs a new password hash after a reset.
    pub fn update_password_hash(&self, user_id: &str, password_hash: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?",
            params![password_hash, now_millis(), user_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    // ── Device sessions ─────────────────────────────────────────

    /// Registers a device, creating its session. Re-registering a device
    /// that already holds a valid session replaces that session and never
    /// counts against the cap; a sixth distinct device fails
    /// `DeviceLimitExceeded` until one is revoked.
    pub fn register_device(
        &self,
        user_id: &str,
        device: &DeviceId,
        ttl_ms: i64,
    ) -> StorageResult<Session> {
        let now = now_millis();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM sessions WHERE user_id = ? AND expires_at <= ?",
            params![user_id, now],
        )?;

        let already_registered: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE user_id = ? AND device_id = ?)",
            params![user_id, device.to_string()],
            |row| row.get(0),
        )?;
        if !already_registered {
            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM sessions WHERE user_id = ?",
                params![user_id],
                |row| row.get(0),
            )?;
            if active as usize >= MAX_DEVICES {
                return Err(StorageError::DeviceLimitExceeded(active as usize));
            }
        } else {
            tx.execute(
                "DELETE FROM sessions WHERE user_id = ? AND device_id = ?",
                params![user_id, device.to_string()],
            )?;
        }

        let session = Session {
            token: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_id: device.clone(),
            created_at: now,
            expires_at: now + ttl_ms,
        };
        tx.execute(
            "INSERT INTO sessions (token, user_id, device_id, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                session.token,
                session.user_id,
                session.device_id.to_string(),
                session.created_at,
                session.expires_at,
            ],
        )?;
        tx.commit()?;

        info!(user_id, device = %device, "registered device session");
        Ok(session)
    }

    /// Revokes a device's session, freeing its slot under the cap.
    pub fn revoke_device(&self, user_id: &str, device: &DeviceId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM sessions WHERE user_id = ? AND device_id = ?",
            params![user_id, device.to_string()],
        )?;
        Ok(removed > 0)
    }

    pub fn revoke_token(&self, token: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM sessions WHERE token = ?", params![token])?;
        Ok(removed > 0)
    }

    /// Looks up a session by token, failing `AuthExpired` when it has
    /// lapsed and `NotFound` when it does not exist.
    pub fn verify_session(&self, token: &str) -> StorageResult<Session> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT token, user_id, device_id, created_at, expires_at \
             FROM sessions WHERE token = ?",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    device_id: DeviceId::from(row.get::<_, String>(2)?),
                    created_at: row.get(3)?,
                    expires_at: row.get(4)?,
                })
            },
        );
        let session = match result {
            Ok(s) => s,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StorageError::NotFound("session".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if session.is_expired(now_millis()) {
            return Err(StorageError::AuthExpired);
        }
        Ok(session)
    }

    /// Devices with a currently valid session, the set a tombstone must
    /// be acknowledged by before it is reaped.
    pub fn active_devices(&self, user_id: &str) -> StorageResult<Vec<DeviceId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT device_id FROM sessions WHERE user_id = ? AND expires_at > ? \
             ORDER BY created_at ASC",
        )?;
        let devices = stmt
            .query_map(params![user_id, now_millis()], |row| {
                Ok(DeviceId::from(row.get::<_, String>(0)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    // ── Verification codes ──────────────────────────────────────

    /// Generates and stores a six-digit verification code for an email,
    /// replacing any previous one. Valid for ten minutes.
    pub fn issue_verification_code(&self, email: &str) -> StorageResult<String> {
        let code = format!("{:06}", rand::random::<u32>() % 1_000_000);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO verification_codes (email, code, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(email) DO UPDATE SET code = ?2, expires_at = ?3",
            params![email, code, now_millis() + CODE_TTL_MS],
        )?;
        Ok(code)
    }

    pub fn verify_code(&self, email: &str, code: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT code FROM verification_codes WHERE email = ? AND expires_at > ?",
            params![email, now_millis()],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(stored) => Ok(stored == code),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // ── Password resets ─────────────────────────────────────────

    /// Issues a reset token for an existing account. Valid for one hour.
    pub fn issue_password_reset(&self, email: &str) -> StorageResult<String> {
        let user = self
            .find_user_by_email(email)?
            .ok_or_else(|| StorageError::NotFound(format!("user {email}")))?;
        let token = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO password_resets (email, token, user_id, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![email, token, user.id, now, now + RESET_TTL_MS],
        )?;
        Ok(token)
    }

    /// Consumes a reset token, returning the user id it was issued for.
    pub fn consume_password_reset(&self, email: &str, token: &str) -> StorageResult<String> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = tx.query_row(
            "SELECT user_id FROM password_resets WHERE email = ? AND token = ? AND expires_at > ?",
            params![email, token, now_millis()],
            |row| row.get::<_, String>(0),
        );
        let user_id = match result {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StorageError::NotFound("password reset".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        tx.execute(
            "DELETE FROM password_resets WHERE token = ?",
            params![token],
        )?;
        tx.commit()?;
        Ok(user_id)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
