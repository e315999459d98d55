//! Entry records, attachments, and the meta-stream predicate.

use crate::error::KdbError;
use crate::stream::{
    field_string, field_u32, write_end_field, write_field, write_string_field, ByteReader,
    ByteWriter, FIELD_END,
};
use crate::time::{field_time, write_time_field, KdbTime};
use kastel_crypto_core::SecretString;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

const FIELD_COMMENT: u16 = 0x0000;
const FIELD_UUID: u16 = 0x0001;
const FIELD_GROUP_ID: u16 = 0x0002;
const FIELD_ICON: u16 = 0x0003;
const FIELD_TITLE: u16 = 0x0004;
const FIELD_URL: u16 = 0x0005;
const FIELD_USERNAME: u16 = 0x0006;
const FIELD_PASSWORD: u16 = 0x0007;
const FIELD_NOTES: u16 = 0x0008;
const FIELD_CREATED: u16 = 0x0009;
const FIELD_MODIFIED: u16 = 0x000A;
const FIELD_ACCESSED: u16 = 0x000B;
const FIELD_EXPIRES: u16 = 0x000C;
const FIELD_BINARY_DESC: u16 = 0x000D;
const FIELD_BINARY_DATA: u16 = 0x000E;

/// Notes values reserved for meta-stream entries.
const RESERVED_META_NOTES: [&str; 2] = ["KPX_CUSTOM_ICONS_4", "KPX_GROUP_TREE_STATE"];

const META_TITLE: &str = "Meta-Info";
const META_USERNAME: &str = "SYSTEM";
const META_URL: &str = "$";

/// A named binary blob attached to an entry. Never compressed in v1;
/// there is no shared binary pool. The data is wiped on drop.
#[derive(Debug, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

/// A credential entry. The password is held in a [`SecretString`] and
/// wiped when the entry is dropped.
#[derive(Debug, Default)]
pub struct Entry {
    pub uuid: [u8; 16],
    pub icon_id: u32,
    pub title: String,
    pub url: String,
    pub username: String,
    pub password: SecretString,
    pub notes: String,
    pub created: KdbTime,
    pub modified: KdbTime,
    pub accessed: KdbTime,
    pub expires: KdbTime,
    pub attachment: Option<Attachment>,
}

/// A parsed entry record: the entry plus the group id it points at.
/// The foreign key is resolved during tree assembly and not kept on the
/// in-memory entry.
#[derive(Debug)]
pub(crate) struct EntryRecord {
    pub(crate) entry: Entry,
    pub(crate) group_id: i32,
}

impl Entry {
    /// A new entry with a random UUID, stamped with the current time.
    #[must_use]
    pub fn new(title: &str) -> Self {
        let now = KdbTime::now();
        Self {
            uuid: new_uuid(),
            icon_id: 0,
            title: title.to_owned(),
            url: String::new(),
            username: String::new(),
            password: SecretString::default(),
            notes: String::new(),
            created: now,
            modified: now,
            accessed: now,
            expires: KdbTime::never_expires(),
            attachment: None,
        }
    }

    /// True for format-internal sidecar entries (custom icons, tree
    /// state). Meta streams are kept outside the user-visible tree and
    /// re-emitted verbatim on save.
    #[must_use]
    pub fn is_meta_stream(&self) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|a| !a.data.is_empty())
            && RESERVED_META_NOTES.contains(&self.notes.as_str())
            && self.title == META_TITLE
            && self.username == META_USERNAME
            && self.url == META_URL
            && self.icon_id == 0
    }

    /// Stamp the last-accessed time.
    pub fn touch_accessed(&mut self) {
        self.accessed = KdbTime::now();
    }

    /// Stamp the last-modified (and accessed) time.
    pub fn touch_modified(&mut self) {
        let now = KdbTime::now();
        self.accessed = now;
        self.modified = now;
    }

    /// Parse one entry record from `r`, consuming up to and including
    /// the terminator field.
    ///
    /// # Errors
    ///
    /// [`KdbError::PrematureEnd`] on truncation, [`KdbError::CorruptedField`]
    /// for malformed field bodies or a missing UUID.
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<EntryRecord, KdbError> {
        let mut uuid: Option<[u8; 16]> = None;
        let mut group_id = 0i32;
        let mut binary_name = String::new();
        let mut binary_data: Vec<u8> = Vec::new();
        let mut entry = Self {
            expires: KdbTime::never_expires(),
            ..Self::default()
        };

        loop {
            let field_id = r.read_u16()?;
            let len = r.read_u32()? as usize;
            let data = r.read_bytes(len)?;

            match field_id {
                FIELD_END => {
                    if len != 0 {
                        return Err(KdbError::CorruptedField {
                            field: "entry.terminator",
                        });
                    }
                    break;
                }
                FIELD_COMMENT => {}
                FIELD_UUID => {
                    uuid = Some(data.try_into().map_err(|_| KdbError::CorruptedField {
                        field: "entry.uuid",
                    })?);
                }
                FIELD_GROUP_ID => group_id = field_u32(data, "entry.group_id")? as i32,
                FIELD_ICON => entry.icon_id = field_u32(data, "entry.icon")?,
                FIELD_TITLE => entry.title = field_string(data, "entry.title")?,
                FIELD_URL => entry.url = field_string(data, "entry.url")?,
                FIELD_USERNAME => entry.username = field_string(data, "entry.username")?,
                FIELD_PASSWORD => {
                    entry.password = SecretString::new(field_string(data, "entry.password")?);
                }
                FIELD_NOTES => entry.notes = field_string(data, "entry.notes")?,
                FIELD_CREATED => entry.created = field_time(data, "entry.created")?,
                FIELD_MODIFIED => entry.modified = field_time(data, "entry.modified")?,
                FIELD_ACCESSED => entry.accessed = field_time(data, "entry.accessed")?,
                FIELD_EXPIRES => entry.expires = field_time(data, "entry.expires")?,
                FIELD_BINARY_DESC => binary_name = field_string(data, "entry.binary_desc")?,
                FIELD_BINARY_DATA => binary_data = data.to_vec(),
                unknown => {
                    log::debug!("skipping unknown entry field {unknown:#06X} ({len} bytes)");
                }
            }
        }

        entry.uuid = uuid.ok_or(KdbError::CorruptedField {
            field: "entry.uuid",
        })?;
        if !binary_name.is_empty() || !binary_data.is_empty() {
            entry.attachment = Some(Attachment {
                name: binary_name,
                data: binary_data,
            });
        }
        Ok(EntryRecord { entry, group_id })
    }

    /// Serialize this entry as one record under `group_id`, terminator
    /// included.
    pub(crate) fn write(&self, group_id: i32, w: &mut ByteWriter) {
        write_field(w, FIELD_UUID, &self.uuid);
        write_field(w, FIELD_GROUP_ID, &(group_id as u32).to_le_bytes());
        write_field(w, FIELD_ICON, &self.icon_id.to_le_bytes());
        write_string_field(w, FIELD_TITLE, &self.title);
        write_string_field(w, FIELD_URL, &self.url);
        write_string_field(w, FIELD_USERNAME, &self.username);
        write_string_field(w, FIELD_PASSWORD, self.password.expose());
        write_string_field(w, FIELD_NOTES, &self.notes);
        write_time_field(w, FIELD_CREATED, &self.created);
        write_time_field(w, FIELD_MODIFIED, &self.modified);
        write_time_field(w, FIELD_ACCESSED, &self.accessed);
        write_time_field(w, FIELD_EXPIRES, &self.expires);
        let (name, data): (&str, &[u8]) = match &self.attachment {
            Some(a) => (&a.name, &a.data),
            None => ("", &[]),
        };
        write_string_field(w, FIELD_BINARY_DESC, name);
        write_field(w, FIELD_BINARY_DATA, data);
        write_end_field(w);
    }

}

/// A fresh random (version 4) UUID.
fn new_uuid() -> [u8; 16] {
    let mut uuid = [0u8; 16];
    OsRng.fill_bytes(&mut uuid);
    uuid[6] = (uuid[6] & 0x0F) | 0x40;
    uuid[8] = (uuid[8] & 0x3F) | 0x80;
    uuid
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
