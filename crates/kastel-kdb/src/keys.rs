//! Composite key construction.
//!
//! The engine consumes a 32-byte composite key already combined from
//! the user's credentials:
//! - password only: `SHA-256(UTF-8(password))`
//! - password + key file: `SHA-256(SHA-256(password) ‖ key_file_hash)`

use kastel_crypto_core::SecretBytes;
use sha2::{Digest, Sha256};

/// The 32-byte pre-hash of user credentials fed into the key transform.
/// Wiped on drop; not cloneable.
#[derive(Debug)]
pub struct CompositeKey(SecretBytes<32>);

impl CompositeKey {
    /// Derive from a password alone.
    #[must_use]
    pub fn from_password(password: &str) -> Self {
        Self(SecretBytes::new(
            Sha256::digest(password.as_bytes()).into(),
        ))
    }

    /// Derive from a password combined with a key file's hash.
    #[must_use]
    pub fn from_password_and_key_file(password: &str, key_file_hash: &[u8; 32]) -> Self {
        let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        let mut digest = Sha256::new();
        digest.update(password_hash);
        digest.update(key_file_hash);
        Self(SecretBytes::new(digest.finalize().into()))
    }

    /// Wrap an externally combined 32-byte key.
    #[must_use]
    pub fn from_raw(key: [u8; 32]) -> Self {
        Self(SecretBytes::new(key))
    }

    pub(crate) fn secret(&self) -> &SecretBytes<32> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn password_key_is_sha256_of_utf8() {
        let key = CompositeKey::from_password("abc");
        assert_eq!(
            key.secret().expose(),
            &hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn key_file_changes_the_composite() {
        let plain = CompositeKey::from_password("password");
        let with_file = CompositeKey::from_password_and_key_file("password", &[0x42; 32]);
        assert_ne!(plain.secret().expose(), with_file.secret().expose());
    }

    #[test]
    fn combined_key_is_hash_of_hashes() {
        let password_hash: [u8; 32] = Sha256::digest(b"pw").into();
        let file_hash = [0x17u8; 32];
        let mut digest = Sha256::new();
        digest.update(password_hash);
        digest.update(file_hash);
        let expected: [u8; 32] = digest.finalize().into();

        let key = CompositeKey::from_password_and_key_file("pw", &file_hash);
        assert_eq!(key.secret().expose(), &expected);
    }

    #[test]
    fn debug_output_is_masked() {
        let key = CompositeKey::from_password("secret");
        assert!(!format!("{key:?}").contains("secret"));
    }
}
