//! The database facade: the load/save pipeline and the mutation surface.
//!
//! Load: header → key transform → decrypt → content hash check → parse
//! records → assemble tree. Save is the inverse, with freshly
//! randomized seeds and a re-derived master key every time. Both
//! pipelines report progress through a shared [`ProgressHandle`] and
//! honor cancellation between work units.

use crate::entry::{Entry, EntryRecord};
use crate::error::KdbError;
use crate::group::Group;
use crate::header::{Header, HEADER_LEN};
use crate::keys::CompositeKey;
use crate::stream::{ByteReader, ByteWriter};
use crate::tree::{allocate_group_id, assemble, EntryId, NodeId, Tree};
use kastel_crypto_core::{
    cipher, derive_master_key, transform_key, Phase, ProgressHandle, SecretBytes, Unpadding,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Name given to a backup group created on demand.
pub const BACKUP_GROUP_NAME: &str = "Backup";

/// Icon assigned to a backup group created on demand.
pub const BACKUP_GROUP_ICON: u32 = 4;

/// Group names that nominate an existing group as the backup on load.
const BACKUP_NAMES: [&str; 2] = ["Backup", "Recycle Bin"];

/// An in-memory KDB v1 database: one synthetic root, the group/entry
/// tree, the sidecar meta streams, and the key material for the next
/// save. All secrets are wiped when the database is dropped or
/// [`erased`](Self::erase).
#[derive(Debug, Default)]
pub struct Database {
    header: Header,
    tree: Tree,
    meta_entries: Vec<EntryRecord>,
    composite_key: Option<CompositeKey>,
    master_key: Option<SecretBytes<32>>,
    backup_group: Option<NodeId>,
    warnings: Vec<String>,
}

impl Database {
    /// An empty database: the synthetic root and nothing else.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- Load ------------------------------------------------------------

    /// Decrypt and parse `data` into a populated database. The composite
    /// key is retained for subsequent saves.
    ///
    /// # Errors
    ///
    /// [`KdbError::CorruptedHeader`] before the cipher is ever touched,
    /// [`KdbError::DecryptError`] for structural cipher failures,
    /// [`KdbError::InvalidKey`] when the content hash does not match
    /// (wrong key or tampered ciphertext), [`KdbError::PrematureEnd`] /
    /// [`KdbError::CorruptedField`] / [`KdbError::OrphanedEntry`] from
    /// the record parsers, and [`KdbError::Cancelled`] when the handle
    /// requests it. No partial tree ever escapes: failures drop (and
    /// wipe) everything built so far.
    pub fn load(
        data: &[u8],
        key: CompositeKey,
        progress: &ProgressHandle,
    ) -> Result<Self, KdbError> {
        let header = Header::read(data)?;

        progress.begin_phase(Phase::KeyDerivation, 0, 60);
        let transformed = transform_key(
            key.secret(),
            &header.transform_seed,
            header.transform_rounds,
            progress,
        )?;
        let master_key = derive_master_key(&header.master_seed, &transformed);

        progress.begin_phase(Phase::Decryption, 60, 30);
        progress.checkpoint()?;
        // Lenient unpadding: the reference readers trust the trailing pad
        // byte, leaving wrong-key detection to the content hash below.
        let plaintext = cipher::decrypt(
            header.cipher(),
            master_key.expose(),
            &header.iv,
            &data[HEADER_LEN..],
            Unpadding::Lenient,
        )?;
        progress.finish_phase();

        let actual_hash: [u8; 32] = Sha256::digest(plaintext.expose()).into();
        if actual_hash != header.content_hash {
            return Err(KdbError::InvalidKey);
        }

        progress.begin_phase(Phase::Parsing, 90, 10);
        let mut warnings = Vec::new();
        let mut reader = ByteReader::new(plaintext.expose());
        let total = u64::from(header.group_count) + u64::from(header.entry_count);

        let mut groups = Vec::new();
        for done in 0..header.group_count {
            progress.checkpoint()?;
            groups.push(Group::read(&mut reader)?);
            progress.update(u64::from(done) + 1, total);
        }
        let mut records = Vec::new();
        for done in 0..header.entry_count {
            progress.checkpoint()?;
            records.push(Entry::read(&mut reader)?);
            progress.update(u64::from(header.group_count) + u64::from(done) + 1, total);
        }
        if !reader.is_at_end() {
            let message = format!("{} trailing bytes after the last record", reader.remaining());
            log::warn!("{message}");
            warnings.push(message);
        }

        let assembled = assemble(groups, records)?;
        warnings.extend(assembled.warnings);
        let mut tree = assembled.tree;

        // Backup nomination by name convention; deliberately last-wins,
        // matching the reference loader.
        let mut backup_group = None;
        for node in tree.iter_groups() {
            let is_backup = tree
                .group(node)
                .is_some_and(|g| BACKUP_NAMES.contains(&g.name.as_str()));
            if is_backup {
                if let Some(group) = tree.group_mut(node) {
                    group.is_deleted = true;
                }
                backup_group = Some(node);
            }
        }

        progress.finish_phase();
        Ok(Self {
            header,
            tree,
            meta_entries: assembled.meta_entries,
            composite_key: Some(key),
            master_key: Some(master_key),
            backup_group,
            warnings,
        })
    }

    // -- Save ------------------------------------------------------------

    /// Serialize, rehash, randomize seeds, re-derive the master key, and
    /// encrypt. Returns the complete file image.
    ///
    /// # Errors
    ///
    /// [`KdbError::EncryptError`] if no composite key is set or the
    /// cipher fails, [`KdbError::RngError`] if seed randomization fails,
    /// [`KdbError::Cancelled`] on cancellation.
    pub fn save(&mut self, progress: &ProgressHandle) -> Result<Vec<u8>, KdbError> {
        if self.composite_key.is_none() {
            return Err(KdbError::EncryptError("no composite key set".into()));
        }

        progress.begin_phase(Phase::Packing, 0, 10);
        let content = self.pack_content(progress)?;
        self.header.content_hash = Sha256::digest(content.as_slice()).into();
        self.header.randomize_seeds()?;

        progress.begin_phase(Phase::KeyDerivation, 10, 60);
        // The key was checked present above; borrow it afresh so the
        // header stays mutable in between.
        let Some(key) = self.composite_key.as_ref() else {
            return Err(KdbError::EncryptError("no composite key set".into()));
        };
        let transformed = transform_key(
            key.secret(),
            &self.header.transform_seed,
            self.header.transform_rounds,
            progress,
        )?;
        let master_key = derive_master_key(&self.header.master_seed, &transformed);

        progress.begin_phase(Phase::Encryption, 70, 30);
        progress.checkpoint()?;
        let ciphertext = cipher::encrypt(
            self.header.cipher(),
            master_key.expose(),
            &self.header.iv,
            &content,
        )?;
        progress.finish_phase();

        let mut out = ByteWriter::with_capacity(HEADER_LEN + ciphertext.len());
        self.header.write(&mut out);
        out.write_bytes(&ciphertext);
        self.master_key = Some(master_key);
        Ok(out.into_bytes())
    }

    /// Serialize groups (pre-order, levels refreshed), then entries
    /// grouped by their parent, then meta streams. Updates the header
    /// counts. The returned buffer wipes itself on drop.
    fn pack_content(&mut self, progress: &ProgressHandle) -> Result<Zeroizing<Vec<u8>>, KdbError> {
        let group_nodes = self.tree.iter_groups();
        for &node in &group_nodes {
            let level = self.tree.level_of(node);
            if let Some(group) = self.tree.group_mut(node) {
                group.level = level;
            }
        }

        let entry_ids = self.tree.iter_entries();
        let total = (group_nodes.len() + entry_ids.len() + self.meta_entries.len()) as u64;
        let mut done = 0u64;
        let mut w = ByteWriter::new();

        for &node in &group_nodes {
            progress.checkpoint()?;
            if let Some(group) = self.tree.group(node) {
                group.write(&mut w);
            }
            done += 1;
            progress.update(done, total);
        }
        for &entry_id in &entry_ids {
            progress.checkpoint()?;
            if let (Some(entry), Some(parent)) =
                (self.tree.entry(entry_id), self.tree.entry_parent(entry_id))
            {
                let group_id = self.tree.group(parent).map_or(0, |g| g.id);
                entry.write(group_id, &mut w);
            }
            done += 1;
            progress.update(done, total);
        }
        log::debug!("packing {} meta stream entries", self.meta_entries.len());
        for record in &self.meta_entries {
            progress.checkpoint()?;
            record.entry.write(record.group_id, &mut w);
            done += 1;
            progress.update(done, total);
        }

        self.header.group_count = group_nodes.len() as u32;
        self.header.entry_count = (entry_ids.len() + self.meta_entries.len()) as u32;
        Ok(Zeroizing::new(w.into_bytes()))
    }

    // -- Keys ------------------------------------------------------------

    /// Replace the composite key; the next save re-derives with it.
    pub fn change_composite_key(&mut self, key: CompositeKey) {
        self.composite_key = Some(key);
    }

    // -- Queries ---------------------------------------------------------

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    #[must_use]
    pub fn group(&self, id: NodeId) -> Option<&Group> {
        self.tree.group(id)
    }

    #[must_use]
    pub fn group_mut(&mut self, id: NodeId) -> Option<&mut Group> {
        self.tree.group_mut(id)
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.tree.entry(id)
    }

    #[must_use]
    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.tree.entry_mut(id)
    }

    #[must_use]
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.tree.parent(id)
    }

    #[must_use]
    pub fn entry_parent(&self, id: EntryId) -> Option<NodeId> {
        self.tree.entry_parent(id)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.tree.children(id)
    }

    #[must_use]
    pub fn entries_of(&self, id: NodeId) -> &[EntryId] {
        self.tree.node_entries(id)
    }

    /// All non-synthetic groups, pre-order.
    pub fn iter_all_groups(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.tree.iter_groups().into_iter()
    }

    /// All non-meta entries, grouped by parent in pre-order.
    pub fn iter_all_entries(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.tree.iter_entries().into_iter()
    }

    /// The format-internal sidecar entries, kept outside the tree.
    pub fn meta_entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.meta_entries.iter().map(|r| &r.entry)
    }

    /// Non-fatal anomalies recorded by the last load.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The nominated backup group, if one exists.
    #[must_use]
    pub fn get_backup_group(&self) -> Option<NodeId> {
        self.backup_group
            .filter(|&b| self.tree.group(b).is_some())
    }

    // -- Mutation --------------------------------------------------------

    /// Next free group id: successor of the maximum, wrapping at
    /// `i32::MAX` and probing over occupied slots. The synthetic root
    /// never takes an id.
    #[must_use]
    pub fn create_group_id(&self) -> i32 {
        allocate_group_id(&self.tree.used_group_ids())
    }

    /// Create a group under `parent`. Returns `None` on a stale parent.
    pub fn create_group(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        let group = Group::new(self.create_group_id(), name);
        self.tree.add_group(parent, group)
    }

    /// Create an entry under `group`. Returns `None` on a stale group or
    /// the root.
    pub fn create_entry(&mut self, group: NodeId, title: &str) -> Option<EntryId> {
        self.tree.add_entry(group, Entry::new(title))
    }

    /// Move an entry under another group, stamping its accessed time.
    pub fn move_entry(&mut self, entry: EntryId, to: NodeId) -> bool {
        let moved = self.tree.move_entry(entry, to);
        if moved {
            if let Some(e) = self.tree.entry_mut(entry) {
                e.touch_accessed();
            }
        }
        moved
    }

    /// The backup group, creating it as a deleted-flagged child of the
    /// root when `create_if_missing` is set.
    pub fn backup_group(&mut self, create_if_missing: bool) -> Option<NodeId> {
        if let Some(existing) = self.get_backup_group() {
            return Some(existing);
        }
        self.backup_group = None;
        if !create_if_missing {
            return None;
        }
        let mut group = Group::new(self.create_group_id(), BACKUP_GROUP_NAME);
        group.icon_id = BACKUP_GROUP_ICON;
        group.is_deleted = true;
        let node = self.tree.add_group(self.tree.root(), group);
        self.backup_group = node;
        node
    }

    /// Delete a group. Outside the backup subtree, its descendant
    /// entries move to the backup group (accessed time stamped) and the
    /// emptied subtree is detached; inside it, the subtree and its
    /// entries are removed permanently.
    pub fn delete_group(&mut self, node: NodeId) {
        if node == self.tree.root() || self.tree.group(node).is_none() {
            return;
        }
        if self.tree.is_in_deleted_subtree(node) {
            self.forget_backup_within(node);
            self.tree.remove_subtree(node);
            return;
        }
        let Some(backup) = self.backup_group(true) else {
            return;
        };
        if self.tree.descendants(node).contains(&backup) {
            // The nominated backup sits inside the doomed subtree; there
            // is nowhere to relocate into, so the deletion is permanent.
            self.backup_group = None;
            self.tree.remove_subtree(node);
            return;
        }
        for entry_id in self.tree.descendant_entries(node) {
            if self.tree.move_entry(entry_id, backup) {
                if let Some(entry) = self.tree.entry_mut(entry_id) {
                    entry.touch_accessed();
                }
            }
        }
        self.tree.remove_subtree(node);
    }

    /// Delete an entry. From the backup subtree the removal is
    /// permanent; elsewhere the entry moves to the backup group (created
    /// on demand) with its accessed time stamped.
    pub fn delete_entry(&mut self, entry: EntryId) {
        let Some(parent) = self.tree.entry_parent(entry) else {
            return;
        };
        if self.tree.is_in_deleted_subtree(parent) {
            drop(self.tree.remove_entry(entry));
            return;
        }
        let Some(backup) = self.backup_group(true) else {
            return;
        };
        if self.tree.move_entry(entry, backup) {
            if let Some(e) = self.tree.entry_mut(entry) {
                e.touch_accessed();
            }
        }
    }

    /// Wipe every secret and drop the tree: composite key, master key,
    /// entry passwords, and attachments are all zeroed.
    pub fn erase(&mut self) {
        self.composite_key = None;
        self.master_key = None;
        self.backup_group = None;
        self.warnings.clear();
        // Entry drops wipe passwords and attachment bytes.
        self.meta_entries.clear();
        self.tree = Tree::new();
        self.header = Header::default();
    }

    /// Populate a fresh database with the canonical starter groups and
    /// one sample entry under "General".
    pub fn populate_template(&mut self) {
        const TEMPLATE_GROUPS: [(&str, u32); 6] = [
            ("General", 48),
            ("Internet", 1),
            ("Email", 19),
            ("Finance", 37),
            ("Network", 3),
            ("OS", 38),
        ];
        let root = self.root();
        let mut general = None;
        for (name, icon) in TEMPLATE_GROUPS {
            let node = self.create_group(root, name);
            if let Some(node) = node {
                if let Some(group) = self.group_mut(node) {
                    group.icon_id = icon;
                }
                if general.is_none() {
                    general = Some(node);
                }
            }
        }
        if let Some(general) = general {
            if let Some(entry) = self.create_entry(general, "Sample") {
                if let Some(e) = self.entry_mut(entry) {
                    e.password = "pa$$word".into();
                }
            }
        }
    }

    /// Clear the backup pointer if it lives inside `node`'s subtree.
    fn forget_backup_within(&mut self, node: NodeId) {
        if let Some(backup) = self.backup_group {
            if self.tree.descendants(node).contains(&backup) {
                self.backup_group = None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kastel_crypto_core::BulkCipher;

    fn fast_key() -> CompositeKey {
        CompositeKey::from_password("test password")
    }

    /// Build a raw file image from hand-rolled content, exercising the
    /// same primitives the save path uses.
    fn build_file(header: &mut Header, key: &CompositeKey, content: &[u8]) -> Vec<u8> {
        let progress = ProgressHandle::new();
        header.content_hash = Sha256::digest(content).into();
        let transformed = transform_key(
            key.secret(),
            &header.transform_seed,
            header.transform_rounds,
            &progress,
        )
        .expect("transform");
        let master = derive_master_key(&header.master_seed, &transformed);
        let ciphertext = cipher::encrypt(header.cipher(), master.expose(), &header.iv, content)
            .expect("encrypt");
        let mut w = ByteWriter::new();
        header.write(&mut w);
        w.write_bytes(&ciphertext);
        w.into_bytes()
    }

    fn test_header() -> Header {
        let mut header = Header::new(BulkCipher::Aes256, 64);
        header.master_seed = [0x01; 16];
        header.iv = [0x02; 16];
        header.transform_seed = [0x03; 32];
        header
    }

    #[test]
    fn orphaned_entry_fails_the_load() {
        let mut content = ByteWriter::new();
        let mut group = Group::new(1, "Only group");
        group.level = 0;
        group.write(&mut content);
        Entry::new("lost").write(99, &mut content);
        let content = content.into_bytes();

        let mut header = test_header();
        header.group_count = 1;
        header.entry_count = 1;
        let file = build_file(&mut header, &fast_key(), &content);

        let err = Database::load(&file, fast_key(), &ProgressHandle::new()).expect_err("orphan");
        assert!(matches!(err, KdbError::OrphanedEntry { group_id: 99 }));
    }

    #[test]
    fn count_overrun_is_premature_end() {
        let mut content = ByteWriter::new();
        let mut group = Group::new(1, "One");
        group.level = 0;
        group.write(&mut content);
        let content = content.into_bytes();

        let mut header = test_header();
        header.group_count = 2;
        let file = build_file(&mut header, &fast_key(), &content);

        let err = Database::load(&file, fast_key(), &ProgressHandle::new()).expect_err("overrun");
        assert!(matches!(err, KdbError::PrematureEnd));
    }

    #[test]
    fn trailing_content_is_a_warning_not_an_error() {
        let mut content = ByteWriter::new();
        let mut group = Group::new(1, "One");
        group.level = 0;
        group.write(&mut content);
        content.write_bytes(&[0xEE; 7]);
        let content = content.into_bytes();

        let mut header = test_header();
        header.group_count = 1;
        let file = build_file(&mut header, &fast_key(), &content);

        let db = Database::load(&file, fast_key(), &ProgressHandle::new()).expect("load");
        assert_eq!(db.warnings().len(), 1);
        assert!(db.warnings()[0].contains("trailing"));
    }

    #[test]
    fn meta_streams_survive_load_and_save() {
        let mut content = ByteWriter::new();
        let mut group = Group::new(1, "A");
        group.level = 0;
        group.write(&mut content);
        let mut meta = Entry::new("Meta-Info");
        meta.username = "SYSTEM".into();
        meta.url = "$".into();
        meta.notes = "KPX_CUSTOM_ICONS_4".into();
        meta.attachment = Some(crate::entry::Attachment {
            name: String::new(),
            data: vec![9, 9, 9],
        });
        // Meta streams may carry a dangling group id; they bypass FK
        // resolution entirely.
        meta.write(7, &mut content);
        let content = content.into_bytes();

        let mut header = test_header();
        header.group_count = 1;
        header.entry_count = 1;
        let file = build_file(&mut header, &fast_key(), &content);

        let mut db = Database::load(&file, fast_key(), &ProgressHandle::new()).expect("load");
        assert_eq!(db.meta_entries().count(), 1);
        assert_eq!(db.iter_all_entries().count(), 0);

        let bytes = db.save(&ProgressHandle::new()).expect("save");
        let again = Database::load(&bytes, fast_key(), &ProgressHandle::new()).expect("load");
        assert_eq!(again.meta_entries().count(), 1);
        let meta_again = again.meta_entries().next().expect("meta");
        assert_eq!(meta_again.notes, "KPX_CUSTOM_ICONS_4");
        assert_eq!(
            meta_again.attachment.as_ref().map(|a| a.data.as_slice()),
            Some(&[9u8, 9, 9][..])
        );
        assert_eq!(again.header().entry_count, 1);
    }

    #[test]
    fn create_group_id_counts_up_from_the_maximum() {
        let mut db = Database::new();
        let root = db.root();
        let a = db.create_group(root, "A").expect("create");
        let b = db.create_group(root, "B").expect("create");
        assert_eq!(db.group(a).map(|g| g.id), Some(1));
        assert_eq!(db.group(b).map(|g| g.id), Some(2));
        assert_eq!(db.create_group_id(), 3);
    }

    #[test]
    fn create_group_id_wraps_at_i32_max() {
        let mut db = Database::new();
        let root = db.root();
        let a = db.create_group(root, "A").expect("create");
        let b = db.create_group(root, "B").expect("create");
        db.group_mut(a).expect("group").id = i32::MAX;
        db.group_mut(b).expect("group").id = 1;
        assert_eq!(db.create_group_id(), 2);
    }

    #[test]
    fn backup_group_is_created_on_demand_only() {
        let mut db = Database::new();
        assert_eq!(db.backup_group(false), None);
        let backup = db.backup_group(true).expect("created");
        let group = db.group(backup).expect("group");
        assert_eq!(group.name, BACKUP_GROUP_NAME);
        assert_eq!(group.icon_id, BACKUP_GROUP_ICON);
        assert!(group.is_deleted);
        assert_eq!(db.parent_of(backup), Some(db.root()));
        // A second call reuses the same group.
        assert_eq!(db.backup_group(true), Some(backup));
    }

    #[test]
    fn deleting_a_backed_up_entry_is_permanent() {
        let mut db = Database::new();
        let root = db.root();
        let g = db.create_group(root, "G").expect("create");
        let e = db.create_entry(g, "E").expect("create");

        db.delete_entry(e);
        let backup = db.get_backup_group().expect("backup exists");
        assert_eq!(db.entry_parent(e), Some(backup));

        db.delete_entry(e);
        assert!(db.entry(e).is_none());
    }

    #[test]
    fn deleting_the_backup_group_is_permanent() {
        let mut db = Database::new();
        let backup = db.backup_group(true).expect("create");
        let e = db.create_entry(backup, "old").expect("create");

        db.delete_group(backup);
        assert!(db.group(backup).is_none());
        assert!(db.entry(e).is_none());
        assert_eq!(db.get_backup_group(), None);
    }

    #[test]
    fn erase_drops_tree_and_keys() {
        let mut db = Database::new();
        db.change_composite_key(fast_key());
        db.populate_template();
        assert_eq!(db.iter_all_groups().count(), 6);

        db.erase();
        assert_eq!(db.iter_all_groups().count(), 0);
        assert_eq!(db.iter_all_entries().count(), 0);
        assert_eq!(db.meta_entries().count(), 0);
        let err = db.save(&ProgressHandle::new()).expect_err("no key");
        assert!(matches!(err, KdbError::EncryptError(_)));
    }

    #[test]
    fn template_matches_the_canonical_layout() {
        let mut db = Database::new();
        db.populate_template();
        let names: Vec<String> = db
            .iter_all_groups()
            .filter_map(|n| db.group(n).map(|g| g.name.clone()))
            .collect();
        assert_eq!(
            names,
            ["General", "Internet", "Email", "Finance", "Network", "OS"]
        );
        let entry_id = db.iter_all_entries().next().expect("sample entry");
        let entry = db.entry(entry_id).expect("entry");
        assert_eq!(entry.title, "Sample");
        assert_eq!(entry.password.expose(), "pa$$word");
    }

    #[test]
    fn save_without_a_key_is_rejected() {
        let mut db = Database::new();
        let err = db.save(&ProgressHandle::new()).expect_err("no key");
        assert!(matches!(err, KdbError::EncryptError(_)));
    }
}
