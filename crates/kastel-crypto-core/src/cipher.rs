//! Bulk payload ciphers: AES-256-CBC and Twofish-256-CBC.
//!
//! This module provides:
//! - [`encrypt`] — strict PKCS#7 CBC encryption (the write path)
//! - [`decrypt`] — CBC decryption with selectable [`Unpadding`]
//!
//! The read path uses [`Unpadding::Lenient`]: it trusts the trailing pad
//! byte the way the reference readers do, so files produced by writers
//! with sloppy padding still open, and a wrong key surfaces as a content
//! hash mismatch downstream instead of a padding failure here. The write
//! path always emits strict PKCS#7.

use crate::error::CryptoError;
use crate::memory::SecretBuffer;
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroize;

/// Cipher key length in bytes (256 bits) for both algorithms.
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// Cipher block length in bytes.
pub const BLOCK_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type TwofishCbcEnc = cbc::Encryptor<twofish::Twofish>;
type TwofishCbcDec = cbc::Decryptor<twofish::Twofish>;

/// Which bulk cipher encrypts the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkCipher {
    Aes256,
    Twofish256,
}

/// How [`decrypt`] treats the trailing padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unpadding {
    /// Full PKCS#7 validation; malformed padding is a [`CryptoError::Decrypt`].
    Strict,
    /// Trust a plausible final pad byte, keep the data untouched otherwise.
    /// Matches the reference readers, which never validate the pad run.
    Lenient,
}

/// Encrypt `plaintext` with strict PKCS#7 padding.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] unless `key` is 32 bytes
/// and `iv` is 16 bytes.
pub fn encrypt(
    cipher: BulkCipher,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_key_iv(key, iv)?;
    let ciphertext = match cipher {
        BulkCipher::Aes256 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|e| CryptoError::Encrypt(format!("AES-CBC key setup failed: {e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        BulkCipher::Twofish256 => TwofishCbcEnc::new_from_slices(key, iv)
            .map_err(|e| CryptoError::Encrypt(format!("Twofish-CBC key setup failed: {e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };
    Ok(ciphertext)
}

/// Decrypt `ciphertext` and strip padding according to `unpadding`.
///
/// The plaintext is returned in a [`SecretBuffer`]; every intermediate
/// buffer is zeroized before this function returns.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] for bad key/IV lengths and
/// [`CryptoError::Decrypt`] if the ciphertext is not a whole number of
/// blocks, or (in strict mode only) if the PKCS#7 padding is invalid.
pub fn decrypt(
    cipher: BulkCipher,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    unpadding: Unpadding,
) -> Result<SecretBuffer, CryptoError> {
    check_key_iv(key, iv)?;
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::Decrypt(format!(
            "ciphertext length {} is not a multiple of the {BLOCK_LEN}-byte block",
            ciphertext.len()
        )));
    }

    // NoPadding here: the pad is interpreted below so lenient mode can
    // keep malformed tails instead of failing.
    let mut raw = match cipher {
        BulkCipher::Aes256 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| CryptoError::Decrypt(format!("AES-CBC key setup failed: {e}")))?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext),
        BulkCipher::Twofish256 => TwofishCbcDec::new_from_slices(key, iv)
            .map_err(|e| CryptoError::Decrypt(format!("Twofish-CBC key setup failed: {e}")))?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext),
    }
    .map_err(|_| CryptoError::Decrypt("block decryption failed".into()))?;

    let kept = match unpad_len(&raw, unpadding) {
        Ok(kept) => kept,
        Err(e) => {
            raw.zeroize();
            return Err(e);
        }
    };
    let plaintext = SecretBuffer::new(&raw[..kept]);
    raw.zeroize();
    Ok(plaintext)
}

fn check_key_iv(key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "cipher key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    Ok(())
}

/// Number of plaintext bytes to keep after interpreting the padding.
fn unpad_len(data: &[u8], unpadding: Unpadding) -> Result<usize, CryptoError> {
    let Some(&last) = data.last() else {
        return match unpadding {
            Unpadding::Strict => Err(CryptoError::Decrypt("empty plaintext has no padding".into())),
            Unpadding::Lenient => Ok(0),
        };
    };
    let pad = last as usize;
    match unpadding {
        Unpadding::Strict => {
            if pad == 0 || pad > BLOCK_LEN || pad > data.len() {
                return Err(CryptoError::Decrypt("invalid PKCS#7 padding".into()));
            }
            if data[data.len() - pad..].iter().any(|&b| b as usize != pad) {
                return Err(CryptoError::Decrypt("invalid PKCS#7 padding".into()));
            }
            Ok(data.len() - pad)
        }
        Unpadding::Lenient => {
            if pad >= 1 && pad <= BLOCK_LEN && pad <= data.len() {
                Ok(data.len() - pad)
            } else {
                Ok(data.len())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
