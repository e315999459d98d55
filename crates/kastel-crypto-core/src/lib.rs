//! `kastel-crypto-core` — pure cryptographic primitives for KASTEL.
//!
//! This crate knows nothing about the KDB file layout. It provides the
//! bulk payload ciphers, the AES-rounds key transform, secure memory
//! containers, and the shared progress/cancellation handle. Zero I/O,
//! zero format knowledge, zero UI dependencies.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod memory;
pub mod progress;

pub use cipher::{decrypt, encrypt, BulkCipher, Unpadding, BLOCK_LEN, IV_LEN, KEY_LEN};
pub use error::CryptoError;
pub use kdf::{derive_master_key, transform_key, TRANSFORM_KEY_LEN};
pub use memory::{SecretBuffer, SecretBytes, SecretString};
pub use progress::{Phase, ProgressHandle};
