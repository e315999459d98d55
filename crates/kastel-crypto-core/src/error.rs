//! Cryptographic error types for `kastel-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Symmetric encryption failure (key/IV setup, padding).
    #[error("encryption error: {0}")]
    Encrypt(String),

    /// Symmetric decryption failure (ciphertext shape, padding in strict mode).
    #[error("decryption error: {0}")]
    Decrypt(String),

    /// Invalid key material (wrong length, corrupted bytes).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// The system entropy source failed or is unavailable.
    #[error("entropy source unavailable: {0}")]
    Rng(String),

    /// Secure memory allocation failure.
    #[error("secure memory error: {0}")]
    SecureMemory(String),

    /// Cooperative cancellation was requested between work units.
    #[error("operation cancelled")]
    Cancelled,
}
