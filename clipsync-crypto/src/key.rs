//! Account key material.

use crate::cipher::{KEY_SIZE, NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use clipsync_types::now_millis;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32 bytes of symmetric key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_SIZE]);

impl KeyMaterial {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Reconstructs key material from a database blob.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key bytes
        write!(f, "KeyMaterial(..)")
    }
}

/// Generates fresh random key material.
pub fn generate_key_material() -> KeyMaterial {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    KeyMaterial(bytes)
}

/// The active symmetric key for an account, as persisted in
/// `encryption_keys`.
#[derive(Debug, Clone)]
pub struct AccountKey {
    pub id: String,
    pub user_id: String,
    pub material: KeyMaterial,
    /// Nonce seed recorded at key creation. Payload encryption draws a
    /// fresh nonce per call; this seed only identifies the key generation.
    pub nonce: [u8; NONCE_SIZE],
    pub created_at: i64,
}

impl AccountKey {
    /// Generates a new key for an account.
    pub fn generate(user_id: &str) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            material: generate_key_material(),
            nonce,
            created_at: now_millis(),
        }
    }
}
