//! Account and device session models.

use crate::DeviceId;
use serde::{Deserialize, Serialize};

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    /// Argon2id PHC string. Never leaves storage.
    pub password_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A device session. One concurrently valid session per device; at most
/// five active device sessions per account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub device_id: DeviceId,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
