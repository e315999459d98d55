//! Domain error types for the KDB engine.

use kastel_crypto_core::CryptoError;
use thiserror::Error;

/// Errors surfaced by the KDB load/save pipeline and the field codecs.
#[derive(Debug, Error)]
pub enum KdbError {
    /// The stream ended before a declared field was fully read.
    #[error("unexpected end of data")]
    PrematureEnd,

    /// Bad signature, version, or cipher flags in the file header.
    #[error("corrupted header: {0}")]
    CorruptedHeader(String),

    /// A malformed field inside a group or entry record.
    #[error("corrupted field: {field}")]
    CorruptedField {
        field: &'static str,
    },

    /// An entry references a group id that does not exist.
    #[error("entry references unknown group id {group_id}")]
    OrphanedEntry {
        group_id: i32,
    },

    /// The decrypted content does not match the header's content hash.
    /// Almost always a wrong composite key; distinct from [`Self::DecryptError`]
    /// so callers can prompt for the password again.
    #[error("content hash mismatch: wrong key or tampered data")]
    InvalidKey,

    /// The bulk cipher failed structurally (ciphertext shape, key setup).
    #[error("decryption failed: {0}")]
    DecryptError(String),

    /// The bulk cipher failed while writing.
    #[error("encryption failed: {0}")]
    EncryptError(String),

    /// The entropy source failed while randomizing seeds.
    #[error("entropy source unavailable: {0}")]
    RngError(String),

    /// Cooperative cancellation was honored.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<CryptoError> for KdbError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decrypt(msg) => Self::DecryptError(msg),
            CryptoError::Encrypt(msg) | CryptoError::InvalidKeyMaterial(msg) => {
                Self::EncryptError(msg)
            }
            CryptoError::Rng(msg) | CryptoError::SecureMemory(msg) => Self::RngError(msg),
            CryptoError::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_errors_map_onto_domain_kinds() {
        assert!(matches!(
            KdbError::from(CryptoError::Decrypt("pad".into())),
            KdbError::DecryptError(_)
        ));
        assert!(matches!(
            KdbError::from(CryptoError::Encrypt("key".into())),
            KdbError::EncryptError(_)
        ));
        assert!(matches!(
            KdbError::from(CryptoError::Rng("closed".into())),
            KdbError::RngError(_)
        ));
        assert!(matches!(
            KdbError::from(CryptoError::Cancelled),
            KdbError::Cancelled
        ));
    }

    #[test]
    fn display_distinguishes_invalid_key_from_decrypt_failure() {
        let invalid = KdbError::InvalidKey.to_string();
        let decrypt = KdbError::DecryptError("block".into()).to_string();
        assert_ne!(invalid, decrypt);
        assert!(invalid.contains("wrong key"));
    }
}
