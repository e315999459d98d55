#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Failure-path behavior: wrong keys, truncation, undersized files,
//! cancellation. Nothing here may panic or yield a partial tree.

use kastel_kdb::{
    is_signature_match, CompositeKey, Database, KdbError, Phase, ProgressHandle, HEADER_LEN,
};

const TEST_ROUNDS: u32 = 64;

const KEY_BYTES: [u8; 32] = [0x5C; 32];

fn test_key() -> CompositeKey {
    CompositeKey::from_raw(KEY_BYTES)
}

fn saved_database() -> Vec<u8> {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    db.populate_template();
    db.save(&ProgressHandle::new()).expect("save")
}

#[test]
fn wrong_key_by_one_bit_is_invalid_key() {
    let bytes = saved_database();

    let mut flipped = KEY_BYTES;
    flipped[31] ^= 0x01;
    let result = Database::load(&bytes, CompositeKey::from_raw(flipped), &ProgressHandle::new());
    assert!(
        matches!(result, Err(KdbError::InvalidKey)),
        "a one-bit key difference must surface as InvalidKey, so the \
         caller can prompt for the password again"
    );
}

#[test]
fn correct_key_still_loads_the_same_bytes() {
    let bytes = saved_database();
    let db = Database::load(&bytes, test_key(), &ProgressHandle::new()).expect("load");
    assert_eq!(db.iter_all_groups().count(), 6);
}

#[test]
fn truncation_to_a_partial_block_is_a_decrypt_error() {
    let mut bytes = saved_database();
    bytes.truncate(bytes.len() - 20);
    let result = Database::load(&bytes, test_key(), &ProgressHandle::new());
    assert!(matches!(result, Err(KdbError::DecryptError(_))));
}

#[test]
fn truncation_by_whole_blocks_never_yields_a_partial_tree() {
    let mut bytes = saved_database();
    bytes.truncate(bytes.len() - 32);
    let result = Database::load(&bytes, test_key(), &ProgressHandle::new());
    // The lenient read path decrypts the shortened ciphertext cleanly,
    // so the damage is caught by the content hash.
    assert!(matches!(
        result,
        Err(KdbError::InvalidKey | KdbError::DecryptError(_) | KdbError::PrematureEnd)
    ));
}

#[test]
fn file_shorter_than_the_header_is_corrupted_header() {
    let bytes = saved_database();
    let result = Database::load(&bytes[..HEADER_LEN - 1], test_key(), &ProgressHandle::new());
    assert!(matches!(result, Err(KdbError::CorruptedHeader(_))));
}

#[test]
fn empty_input_is_corrupted_header() {
    let result = Database::load(&[], test_key(), &ProgressHandle::new());
    assert!(matches!(result, Err(KdbError::CorruptedHeader(_))));
}

#[test]
fn garbage_signatures_are_corrupted_header() {
    let mut bytes = saved_database();
    bytes[0] ^= 0xFF;
    let result = Database::load(&bytes, test_key(), &ProgressHandle::new());
    assert!(matches!(result, Err(KdbError::CorruptedHeader(_))));
}

#[test]
fn tampered_ciphertext_is_invalid_key() {
    let mut bytes = saved_database();
    // Flip a bit in the middle of the payload; the padding at the tail
    // stays intact, so the content hash is what catches it.
    let middle = HEADER_LEN + (bytes.len() - HEADER_LEN) / 2 / 16 * 16;
    bytes[middle] ^= 0x01;
    let result = Database::load(&bytes, test_key(), &ProgressHandle::new());
    assert!(matches!(result, Err(KdbError::InvalidKey)));
}

#[test]
fn cancellation_before_the_kdf_is_honored() {
    let bytes = saved_database();
    let progress = ProgressHandle::new();
    progress.cancel();
    let result = Database::load(&bytes, test_key(), &progress);
    assert!(matches!(result, Err(KdbError::Cancelled)));
    // Cancellation lands inside the key-derivation window.
    assert_eq!(progress.phase(), Some(Phase::KeyDerivation));
    assert!(progress.percent() <= 60);
}

#[test]
fn cancellation_aborts_a_save_too() {
    let mut db = Database::new();
    db.change_composite_key(test_key());
    db.header_mut().transform_rounds = TEST_ROUNDS;
    let progress = ProgressHandle::new();
    progress.cancel();
    let result = db.save(&progress);
    assert!(matches!(result, Err(KdbError::Cancelled)));
}

#[test]
fn signature_probe_accepts_real_files_and_rejects_noise() {
    let bytes = saved_database();
    assert!(is_signature_match(&bytes));
    assert!(!is_signature_match(&[0u8; 64]));
    assert!(!is_signature_match(&bytes[..8]));
}
