//! Little-endian pull-readers and push-writers over in-memory buffers.
//!
//! Every integer in the KDB format is little-endian. Fixed-width reads
//! fail with [`KdbError::PrematureEnd`] when fewer bytes remain than
//! requested; string decoding failures are [`KdbError::CorruptedField`].

use crate::error::KdbError;

/// Pull-style reader over a borrowed byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Read exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// [`KdbError::PrematureEnd`] if fewer than `n` bytes remain.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], KdbError> {
        if self.remaining() < n {
            return Err(KdbError::PrematureEnd);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a fixed-size array.
    ///
    /// # Errors
    ///
    /// [`KdbError::PrematureEnd`] if fewer than `N` bytes remain.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], KdbError> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, KdbError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, KdbError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, KdbError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, KdbError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, KdbError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }
}

/// Push-style writer accumulating into an owned buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

// ---------------------------------------------------------------------------
// Field-level helpers shared by the group and entry codecs
// ---------------------------------------------------------------------------

/// Decode a u16 field body, rejecting any other length.
pub(crate) fn field_u16(data: &[u8], field: &'static str) -> Result<u16, KdbError> {
    let arr: [u8; 2] = data
        .try_into()
        .map_err(|_| KdbError::CorruptedField { field })?;
    Ok(u16::from_le_bytes(arr))
}

/// Decode a u32 field body, rejecting any other length.
pub(crate) fn field_u32(data: &[u8], field: &'static str) -> Result<u32, KdbError> {
    let arr: [u8; 4] = data
        .try_into()
        .map_err(|_| KdbError::CorruptedField { field })?;
    Ok(u32::from_le_bytes(arr))
}

/// Decode a NUL-terminated UTF-8 field body. A single trailing NUL is
/// stripped when present; invalid UTF-8 is a corrupted field.
pub(crate) fn field_string(data: &[u8], field: &'static str) -> Result<String, KdbError> {
    let trimmed = match data.last() {
        Some(0) => &data[..data.len() - 1],
        _ => data,
    };
    std::str::from_utf8(trimmed)
        .map(str::to_owned)
        .map_err(|_| KdbError::CorruptedField { field })
}

/// Write one `(id, length, data)` field.
pub(crate) fn write_field(w: &mut ByteWriter, id: u16, data: &[u8]) {
    w.write_u16(id);
    w.write_u32(data.len() as u32);
    w.write_bytes(data);
}

/// Write a string field with its trailing NUL.
pub(crate) fn write_string_field(w: &mut ByteWriter, id: u16, value: &str) {
    w.write_u16(id);
    w.write_u32(value.len() as u32 + 1);
    w.write_bytes(value.as_bytes());
    w.write_u8(0);
}

/// Terminator shared by group and entry records.
pub(crate) const FIELD_END: u16 = 0xFFFF;

/// Write the record terminator.
pub(crate) fn write_end_field(w: &mut ByteWriter) {
    w.write_u16(FIELD_END);
    w.write_u32(0);
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
