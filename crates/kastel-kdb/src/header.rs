//! The fixed 124-byte KDB file header.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! 0   signature-1 (u32) | 4   signature-2 (u32) | 8   flags (u32)
//! 12  version (u32)     | 16  master seed (16B) | 32  IV (16B)
//! 48  group count (u32) | 52  entry count (u32) | 56  content hash (32B)
//! 88  transform seed (32B) | 120 transform rounds (u32) | 124.. ciphertext
//! ```

use crate::error::KdbError;
use crate::stream::{ByteReader, ByteWriter};
use kastel_crypto_core::BulkCipher;
use rand::rngs::OsRng;
use rand::RngCore;

/// First magic value of a KDB v1 file.
pub const SIGNATURE_1: u32 = 0x9AA2_D903;

/// Second magic value of a KDB v1 file.
pub const SIGNATURE_2: u32 = 0xB54B_FB65;

/// Format version written by this engine. Identification masks out the
/// low byte.
pub const VERSION: u32 = 0x0003_0004;

const VERSION_MASK: u32 = 0xFFFF_FF00;

/// Total header size; the ciphertext begins at this offset.
pub const HEADER_LEN: usize = 124;

const FLAG_SHA2: u32 = 1;
const FLAG_AES: u32 = 2;
const FLAG_TWOFISH: u32 = 8;

/// Default transform round count for newly created databases.
pub const DEFAULT_TRANSFORM_ROUNDS: u32 = 6000;

/// Parsed KDB header. Seeds and IV are randomized before every save.
#[derive(Debug, Clone)]
pub struct Header {
    pub flags: u32,
    pub version: u32,
    pub master_seed: [u8; 16],
    pub iv: [u8; 16],
    pub group_count: u32,
    pub entry_count: u32,
    pub content_hash: [u8; 32],
    pub transform_seed: [u8; 32],
    pub transform_rounds: u32,
}

impl Default for Header {
    /// An AES header with the default round count and zeroed seeds.
    fn default() -> Self {
        Self::new(BulkCipher::Aes256, DEFAULT_TRANSFORM_ROUNDS)
    }
}

/// True when the first 12 bytes carry the KDB v1 signatures. Inspects
/// nothing beyond them; full validation happens in [`Header::read`].
#[must_use]
pub fn is_signature_match(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let sig1 = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let sig2 = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    sig1 == SIGNATURE_1 && sig2 == SIGNATURE_2
}

impl Header {
    /// A fresh header with zeroed seeds and counts. Callers randomize
    /// seeds before the first save.
    #[must_use]
    pub fn new(cipher: BulkCipher, transform_rounds: u32) -> Self {
        let mut header = Self {
            flags: FLAG_SHA2,
            version: VERSION,
            master_seed: [0; 16],
            iv: [0; 16],
            group_count: 0,
            entry_count: 0,
            content_hash: [0; 32],
            transform_seed: [0; 32],
            transform_rounds,
        };
        header.set_cipher(cipher);
        header
    }

    /// Parse and validate the header at the front of `data`.
    ///
    /// # Errors
    ///
    /// [`KdbError::CorruptedHeader`] if the buffer is shorter than 124
    /// bytes, a signature or the version mismatches, or the cipher flags
    /// do not select exactly one supported cipher. The bulk cipher is
    /// never touched on failure.
    pub fn read(data: &[u8]) -> Result<Self, KdbError> {
        if data.len() < HEADER_LEN {
            return Err(KdbError::CorruptedHeader(format!(
                "file is {} bytes, shorter than the {HEADER_LEN}-byte header",
                data.len()
            )));
        }
        let mut r = ByteReader::new(&data[..HEADER_LEN]);
        // The reads below cannot fail: the length was checked above.
        let sig1 = r.read_u32().map_err(corrupt)?;
        let sig2 = r.read_u32().map_err(corrupt)?;
        if sig1 != SIGNATURE_1 || sig2 != SIGNATURE_2 {
            return Err(KdbError::CorruptedHeader(format!(
                "signature mismatch: {sig1:#010X}/{sig2:#010X}"
            )));
        }

        let flags = r.read_u32().map_err(corrupt)?;
        let version = r.read_u32().map_err(corrupt)?;
        if version & VERSION_MASK != VERSION & VERSION_MASK {
            return Err(KdbError::CorruptedHeader(format!(
                "unsupported version {version:#010X}"
            )));
        }

        let aes = flags & FLAG_AES != 0;
        let twofish = flags & FLAG_TWOFISH != 0;
        if aes == twofish {
            return Err(KdbError::CorruptedHeader(format!(
                "cipher flags {flags:#06X} do not select exactly one cipher"
            )));
        }

        let header = Self {
            flags,
            version,
            master_seed: r.read_array().map_err(corrupt)?,
            iv: r.read_array().map_err(corrupt)?,
            group_count: r.read_u32().map_err(corrupt)?,
            entry_count: r.read_u32().map_err(corrupt)?,
            content_hash: r.read_array().map_err(corrupt)?,
            transform_seed: r.read_array().map_err(corrupt)?,
            transform_rounds: r.read_u32().map_err(corrupt)?,
        };
        Ok(header)
    }

    /// Emit the fixed 124-byte layout.
    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u32(SIGNATURE_1);
        w.write_u32(SIGNATURE_2);
        w.write_u32(self.flags);
        w.write_u32(self.version);
        w.write_bytes(&self.master_seed);
        w.write_bytes(&self.iv);
        w.write_u32(self.group_count);
        w.write_u32(self.entry_count);
        w.write_bytes(&self.content_hash);
        w.write_bytes(&self.transform_seed);
        w.write_u32(self.transform_rounds);
    }

    /// The bulk cipher selected by the flags.
    #[must_use]
    pub fn cipher(&self) -> BulkCipher {
        if self.flags & FLAG_TWOFISH != 0 {
            BulkCipher::Twofish256
        } else {
            BulkCipher::Aes256
        }
    }

    pub fn set_cipher(&mut self, cipher: BulkCipher) {
        self.flags &= !(FLAG_AES | FLAG_TWOFISH);
        self.flags |= match cipher {
            BulkCipher::Aes256 => FLAG_AES,
            BulkCipher::Twofish256 => FLAG_TWOFISH,
        };
    }

    /// Fill the master seed, IV, and transform seed from the system
    /// CSPRNG. Called before every save so each file gets fresh seeds.
    ///
    /// # Errors
    ///
    /// [`KdbError::RngError`] if the entropy source is unavailable.
    pub fn randomize_seeds(&mut self) -> Result<(), KdbError> {
        OsRng
            .try_fill_bytes(&mut self.master_seed)
            .and_then(|()| OsRng.try_fill_bytes(&mut self.iv))
            .and_then(|()| OsRng.try_fill_bytes(&mut self.transform_seed))
            .map_err(|e| KdbError::RngError(format!("seed randomization failed: {e}")))
    }
}

fn corrupt(_: KdbError) -> KdbError {
    KdbError::CorruptedHeader("truncated header".into())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
