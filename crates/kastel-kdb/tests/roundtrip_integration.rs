#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end save/load round trips: empty database, template database,
//! Twofish payloads, meta-stream preservation, and header count
//! invariants.

use kastel_kdb::{BulkCipher, CompositeKey, Database, ProgressHandle};

/// Low round count keeps the transform fast in tests; the wire format
/// is identical at any count.
const TEST_ROUNDS: u32 = 64;

fn test_key() -> CompositeKey {
    CompositeKey::from_password("password")
}

fn save(db: &mut Database) -> Vec<u8> {
    let progress = ProgressHandle::new();
    let bytes = db.save(&progress).expect("save should succeed");
    assert_eq!(progress.percent(), 100);
    bytes
}

fn load(bytes: &[u8]) -> Database {
    let progress = ProgressHandle::new();
    let db = Database::load(bytes, test_key(), &progress).expect("load should succeed");
    assert_eq!(progress.percent(), 100);
    db
}

/// Field-by-field comparison of the visible tree, ignoring seeds and IV
/// (randomized on every save by design).
fn assert_same_tree(a: &Database, b: &Database) {
    let groups_a: Vec<_> = a.iter_all_groups().collect();
    let groups_b: Vec<_> = b.iter_all_groups().collect();
    assert_eq!(groups_a.len(), groups_b.len(), "group count differs");
    for (&na, &nb) in groups_a.iter().zip(&groups_b) {
        let ga = a.group(na).expect("group a");
        let gb = b.group(nb).expect("group b");
        assert_eq!(ga.id, gb.id);
        assert_eq!(ga.name, gb.name);
        assert_eq!(ga.icon_id, gb.icon_id);
        assert_eq!(ga.created, gb.created);
        assert_eq!(ga.modified, gb.modified);
        assert_eq!(ga.accessed, gb.accessed);
        assert_eq!(ga.expires, gb.expires);
        assert_eq!(ga.flags, gb.flags);
    }

    let entries_a: Vec<_> = a.iter_all_entries().collect();
    let entries_b: Vec<_> = b.iter_all_entries().collect();
    assert_eq!(entries_a.len(), entries_b.len(), "entry count differs");
    for (&ea, &eb) in entries_a.iter().zip(&entries_b) {
        let xa = a.entry(ea).expect("entry a");
        let xb = b.entry(eb).expect("entry b");
        assert_eq!(xa.uuid, xb.uuid);
        assert_eq!(xa.title, xb.title);
        assert_eq!(xa.url, xb.url);
        assert_eq!(xa.username, xb.username);
        assert_eq!(xa.password.expose(), xb.password.expose());
        assert_eq!(xa.notes, xb.notes);
        assert_eq!(xa.icon_id, xb.icon_id);
        assert_eq!(xa.created, xb.created);
        assert_eq!(xa.expires, xb.expires);
        assert_eq!(xa.attachment, xb.attachment);
        // Entries must hang off structurally equivalent groups.
        let pa = a.entry_parent(ea).and_then(|n| a.group(n)).expect("parent a");
        let pb = b.entry_parent(eb).and_then(|n| b.group(n)).expect("parent b");
        assert_eq!(pa.id, pb.id);
    }
}

#[test]
fn empty_database_roundtrips() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = 6000;

    let bytes = save(&mut db);
    let loaded = load(&bytes);

    assert_eq!(loaded.iter_all_groups().count(), 0);
    assert_eq!(loaded.iter_all_entries().count(), 0);
    assert_eq!(loaded.meta_entries().count(), 0);
    assert!(loaded.group(loaded.root()).is_none(), "root is synthetic");
}

#[test]
fn template_database_roundtrips() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    db.populate_template();

    let bytes = save(&mut db);
    let loaded = load(&bytes);

    let names: Vec<String> = loaded
        .iter_all_groups()
        .filter_map(|n| loaded.group(n).map(|g| g.name.clone()))
        .collect();
    assert_eq!(
        names,
        ["General", "Internet", "Email", "Finance", "Network", "OS"]
    );

    let entry_id = loaded.iter_all_entries().next().expect("sample entry");
    let entry = loaded.entry(entry_id).expect("entry");
    assert_eq!(entry.title, "Sample");
    assert_eq!(entry.password.expose().as_bytes(), b"pa$$word");
    let parent = loaded
        .entry_parent(entry_id)
        .and_then(|n| loaded.group(n))
        .expect("parent group");
    assert_eq!(parent.name, "General");
}

#[test]
fn save_load_save_preserves_the_tree() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    db.populate_template();

    let first = save(&mut db);
    let mut reloaded = load(&first);
    let second = save(&mut reloaded);
    let again = load(&second);

    assert_same_tree(&db, &again);
}

#[test]
fn nested_groups_and_attachments_roundtrip() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;

    let root = db.root();
    let outer = db.create_group(root, "Outer").expect("create");
    let inner = db.create_group(outer, "Inner").expect("create");
    let deepest = db.create_group(inner, "Deepest").expect("create");
    let sibling = db.create_group(root, "Sibling").expect("create");

    let e = db.create_entry(deepest, "Deep entry").expect("create");
    {
        let entry = db.entry_mut(e).expect("entry");
        entry.username = "alice".into();
        entry.password = "correct horse".into();
        entry.attachment = Some(kastel_kdb::Attachment {
            name: "key.bin".into(),
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        });
    }
    let _ = db.create_entry(sibling, "Shallow entry").expect("create");

    let bytes = save(&mut db);
    let loaded = load(&bytes);
    assert_same_tree(&db, &loaded);

    // The nesting itself must survive, not just the field values.
    let deep = loaded
        .iter_all_entries()
        .find(|&id| loaded.entry(id).is_some_and(|e| e.title == "Deep entry"))
        .expect("deep entry");
    let mut chain = Vec::new();
    let mut node = loaded.entry_parent(deep);
    while let Some(n) = node {
        match loaded.group(n) {
            Some(g) => chain.push(g.name.clone()),
            None => break,
        }
        node = loaded.parent_of(n);
    }
    assert_eq!(chain, ["Deepest", "Inner", "Outer"]);
}

#[test]
fn twofish_payload_roundtrips() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    db.header_mut().set_cipher(BulkCipher::Twofish256);
    db.populate_template();

    let bytes = save(&mut db);
    let loaded = load(&bytes);
    assert_eq!(loaded.header().cipher(), BulkCipher::Twofish256);
    assert_same_tree(&db, &loaded);
}

#[test]
fn header_counts_match_serialized_records() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    db.populate_template();

    let bytes = save(&mut db);
    assert_eq!(db.header().group_count, 6);
    assert_eq!(db.header().entry_count, 1);

    let loaded = load(&bytes);
    assert_eq!(loaded.header().group_count, 6);
    assert_eq!(loaded.iter_all_groups().count(), 6);
    assert_eq!(
        loaded.header().entry_count as usize,
        loaded.iter_all_entries().count() + loaded.meta_entries().count()
    );
}

#[test]
fn seeds_are_fresh_on_every_save() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;

    let _ = save(&mut db);
    let seed1 = db.header().master_seed;
    let iv1 = db.header().iv;
    let _ = save(&mut db);
    assert_ne!(db.header().master_seed, seed1);
    assert_ne!(db.header().iv, iv1);
}

#[test]
fn parent_chains_terminate_at_the_root() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    db.populate_template();
    let bytes = save(&mut db);
    let loaded = load(&bytes);

    for node in loaded.iter_all_groups() {
        let mut current = node;
        let mut hops = 0;
        loop {
            match loaded.parent_of(current) {
                Some(parent) if parent == loaded.root() => break,
                Some(parent) => {
                    current = parent;
                    hops += 1;
                    assert!(hops < 1000, "parent chain does not terminate");
                }
                None => panic!("group detached from the tree"),
            }
        }
    }
}

#[test]
fn group_ids_are_unique_after_load() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    db.populate_template();
    let bytes = save(&mut db);
    let loaded = load(&bytes);

    let mut seen = std::collections::HashSet::new();
    for node in loaded.iter_all_groups() {
        let id = loaded.group(node).expect("group").id;
        assert!(id >= 1);
        assert!(seen.insert(id), "duplicate group id {id}");
    }
}
