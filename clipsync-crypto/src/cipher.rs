//! ChaCha20-Poly1305 authenticated encryption with nonce-prefixed blobs.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KeyMaterial;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

/// Symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;
/// ChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Encrypts `plaintext`, returning `nonce || ciphertext || tag`.
///
/// A fresh random nonce is drawn per call; reusing a nonce under the same
/// key would break Poly1305, so callers must never cache the output nonce
/// for later encryptions.
pub fn encrypt(key: &KeyMaterial, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a `nonce || ciphertext || tag` blob produced by [`encrypt`].
///
/// Fails with [`CryptoError::DecryptionFailure`] when the key does not
/// match or the data was tampered with.
pub fn decrypt(key: &KeyMaterial, blob: &[u8]) -> CryptoResult<Vec<u8>> {
    if blob.len() < NONCE_SIZE {
        return Err(CryptoError::TruncatedPayload(blob.len()));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::DecryptionFailure(e.to_string()))
}
