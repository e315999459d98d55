//! Group records and their field codec.
//!
//! A group record on the wire is a field sequence, each field being
//! `id: u16 | length: u32 | data[length]`, terminated by id `0xFFFF`
//! with zero length. Unknown field ids are skipped for forward
//! compatibility; duplicate fields are last-writer-wins.

use crate::error::KdbError;
use crate::stream::{
    field_string, field_u16, field_u32, write_end_field, write_field, write_string_field,
    ByteReader, ByteWriter, FIELD_END,
};
use crate::time::{field_time, write_time_field, KdbTime};

const FIELD_COMMENT: u16 = 0x0000;
const FIELD_ID: u16 = 0x0001;
const FIELD_NAME: u16 = 0x0002;
const FIELD_CREATED: u16 = 0x0003;
const FIELD_MODIFIED: u16 = 0x0004;
const FIELD_ACCESSED: u16 = 0x0005;
const FIELD_EXPIRES: u16 = 0x0006;
const FIELD_ICON: u16 = 0x0007;
const FIELD_LEVEL: u16 = 0x0008;
const FIELD_FLAGS: u16 = 0x0009;

/// A user-visible group. The synthetic root is not a `Group`; it exists
/// only as the tree's anchor node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Database-unique id, >= 1.
    pub id: i32,
    pub name: String,
    pub icon_id: u32,
    pub created: KdbTime,
    pub modified: KdbTime,
    pub accessed: KdbTime,
    pub expires: KdbTime,
    /// In-memory bookkeeping, never serialized.
    pub usage_count: u32,
    /// Depth in the serialized pre-order sequence; 0 is top-level.
    /// Refreshed by the serializer from the actual tree shape.
    pub level: u16,
    pub flags: u32,
    /// Marks the backup subtree. Inferred from the name convention on
    /// load, never stored on the wire.
    pub is_deleted: bool,
}

impl Group {
    /// A new group stamped with the current time.
    #[must_use]
    pub fn new(id: i32, name: &str) -> Self {
        let now = KdbTime::now();
        Self {
            id,
            name: name.to_owned(),
            icon_id: 0,
            created: now,
            modified: now,
            accessed: now,
            expires: KdbTime::never_expires(),
            usage_count: 0,
            level: 0,
            flags: 0,
            is_deleted: false,
        }
    }

    /// Parse one group record from `r`, consuming up to and including
    /// the terminator field.
    ///
    /// # Errors
    ///
    /// [`KdbError::PrematureEnd`] on truncation, [`KdbError::CorruptedField`]
    /// for malformed field bodies or a missing group id.
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<Self, KdbError> {
        let mut id: Option<i32> = None;
        let mut group = Self {
            id: 0,
            name: String::new(),
            icon_id: 0,
            created: KdbTime::default(),
            modified: KdbTime::default(),
            accessed: KdbTime::default(),
            expires: KdbTime::never_expires(),
            usage_count: 0,
            level: 0,
            flags: 0,
            is_deleted: false,
        };

        loop {
            let field_id = r.read_u16()?;
            let len = r.read_u32()? as usize;
            let data = r.read_bytes(len)?;

            match field_id {
                FIELD_END => {
                    if len != 0 {
                        return Err(KdbError::CorruptedField {
                            field: "group.terminator",
                        });
                    }
                    break;
                }
                FIELD_COMMENT => {}
                FIELD_ID => id = Some(field_u32(data, "group.id")? as i32),
                FIELD_NAME => group.name = field_string(data, "group.name")?,
                FIELD_CREATED => group.created = field_time(data, "group.created")?,
                FIELD_MODIFIED => group.modified = field_time(data, "group.modified")?,
                FIELD_ACCESSED => group.accessed = field_time(data, "group.accessed")?,
                FIELD_EXPIRES => group.expires = field_time(data, "group.expires")?,
                FIELD_ICON => group.icon_id = field_u32(data, "group.icon")?,
                FIELD_LEVEL => group.level = field_u16(data, "group.level")?,
                FIELD_FLAGS => group.flags = field_u32(data, "group.flags")?,
                unknown => {
                    log::debug!("skipping unknown group field {unknown:#06X} ({len} bytes)");
                }
            }
        }

        group.id = id.ok_or(KdbError::CorruptedField { field: "group.id" })?;
        Ok(group)
    }

    /// Serialize this group as one record, terminator included.
    pub(crate) fn write(&self, w: &mut ByteWriter) {
        write_field(w, FIELD_ID, &(self.id as u32).to_le_bytes());
        write_string_field(w, FIELD_NAME, &self.name);
        write_time_field(w, FIELD_CREATED, &self.created);
        write_time_field(w, FIELD_MODIFIED, &self.modified);
        write_time_field(w, FIELD_ACCESSED, &self.accessed);
        write_time_field(w, FIELD_EXPIRES, &self.expires);
        write_field(w, FIELD_ICON, &self.icon_id.to_le_bytes());
        write_field(w, FIELD_LEVEL, &self.level.to_le_bytes());
        write_field(w, FIELD_FLAGS, &self.flags.to_le_bytes());
        write_end_field(w);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
