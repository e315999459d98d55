//! `kastel-kdb` — the KeePass v1 (`.kdb`) database engine.
//!
//! Turns an encrypted file image into a mutable group/entry tree and
//! back. The pipeline is strictly sequential: header → key transform →
//! bulk decrypt → content hash check → record parsing → tree assembly,
//! with the inverse on save. Crypto primitives and secret containers
//! come from `kastel-crypto-core`; this crate owns the wire format and
//! the object model.
//!
//! The caller materializes the file bytes and the 32-byte composite key
//! up front; the engine performs no I/O of its own.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod database;
pub mod entry;
pub mod error;
pub mod group;
pub mod header;
pub mod keys;
pub mod stream;
pub mod time;
pub mod tree;

pub use database::{Database, BACKUP_GROUP_ICON, BACKUP_GROUP_NAME};
pub use entry::{Attachment, Entry};
pub use error::KdbError;
pub use header::{
    is_signature_match, Header, DEFAULT_TRANSFORM_ROUNDS, HEADER_LEN, SIGNATURE_1, SIGNATURE_2,
};
pub use group::Group;
pub use keys::CompositeKey;
pub use time::KdbTime;
pub use tree::{EntryId, NodeId, Tree};

pub use kastel_crypto_core::{BulkCipher, Phase, ProgressHandle, SecretString};
