//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed (wrong key or corrupted data): {0}")]
    DecryptionFailure(String),

    #[error("ciphertext too short: {0} bytes")]
    TruncatedPayload(usize),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}
