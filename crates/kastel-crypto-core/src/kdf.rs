//! The KDB key transform: N rounds of AES-256-ECB, finalized by SHA-256.
//!
//! The composite key (32 bytes) is split into two 16-byte halves; each
//! half is run through `rounds` single-block AES encryptions keyed by
//! the transform seed, the halves are hashed back down to 32 bytes, and
//! the bulk-cipher master key is `SHA-256(master_seed ‖ transformed)`.
//!
//! The round loop polls the [`ProgressHandle`] cancel flag every round,
//! so a cancel request is honored within one round and all intermediate
//! key material is wiped before returning.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use crate::progress::ProgressHandle;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Transform seed and output length in bytes.
pub const TRANSFORM_KEY_LEN: usize = 32;

/// How often the percent value is refreshed. Cancellation is still
/// polled every round.
const PROGRESS_STRIDE: u32 = 4096;

/// Run the composite key through the AES-ECB round transform.
///
/// # Errors
///
/// Returns [`CryptoError::Cancelled`] if cancellation is requested while
/// the rounds run; intermediate buffers are wiped first.
pub fn transform_key(
    composite: &SecretBytes<32>,
    transform_seed: &[u8; TRANSFORM_KEY_LEN],
    rounds: u32,
    progress: &ProgressHandle,
) -> Result<SecretBytes<32>, CryptoError> {
    let cipher = aes::Aes256Enc::new(GenericArray::from_slice(transform_seed));

    let mut lo = [0u8; 16];
    let mut hi = [0u8; 16];
    lo.copy_from_slice(&composite.expose()[..16]);
    hi.copy_from_slice(&composite.expose()[16..]);

    for round in 0..rounds {
        if progress.is_cancelled() {
            lo.zeroize();
            hi.zeroize();
            return Err(CryptoError::Cancelled);
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut lo));
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut hi));
        if round % PROGRESS_STRIDE == 0 {
            progress.update(u64::from(round), u64::from(rounds));
        }
    }

    let mut digest = Sha256::new();
    digest.update(lo);
    digest.update(hi);
    lo.zeroize();
    hi.zeroize();
    progress.update(u64::from(rounds), u64::from(rounds));

    Ok(SecretBytes::new(digest.finalize().into()))
}

/// Combine the header's master seed with the transform output into the
/// bulk-cipher key: `SHA-256(master_seed ‖ transformed)`.
#[must_use]
pub fn derive_master_key(master_seed: &[u8; 16], transformed: &SecretBytes<32>) -> SecretBytes<32> {
    let mut digest = Sha256::new();
    digest.update(master_seed);
    digest.update(transformed.expose());
    SecretBytes::new(digest.finalize().into())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
