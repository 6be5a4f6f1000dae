//! Encryption layer for clipsync.
//!
//! Item payloads are protected with ChaCha20-Poly1305 under a per-account
//! symmetric key. A fresh random nonce is generated for every encryption
//! and prepended to the ciphertext, so a stored or transmitted payload is
//! self-contained: `nonce || ciphertext || tag`.
//!
//! Account passwords are hashed with Argon2id; the hash never leaves the
//! local database.
//!
//! Key material is zeroized on drop. Rotation (generate a new key, eagerly
//! re-encrypt everything, swap atomically) is driven by the app layer — this
//! crate only provides the primitives.

mod cipher;
mod error;
mod key;
mod password;

pub use cipher::{decrypt, encrypt, KEY_SIZE, NONCE_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{generate_key_material, AccountKey, KeyMaterial};
pub use password::{hash_password, verify_password};
