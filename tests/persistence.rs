// Durable state: atomic replacement, corruption detection, rejected batches
// leaving the registry file untouched, and the state-directory lock.

use donation_match::{
    load_recipient_csv, DonorRecord, Error, MatchingEngine, RecipientRecord, Registry,
    RegistryLock, REGISTRY_FILE,
};
use std::fs;
use std::path::Path;

fn seeded(dir: &Path) -> Registry {
    let mut registry = Registry::new();
    registry
        .upsert_donors(&[
            DonorRecord::new("a@example.com", "A", 4),
            DonorRecord::new("b@example.com", "B", 2),
        ])
        .unwrap();
    registry
        .upsert_recipients(&[
            RecipientRecord::new("r1@example.com", &["Petco"]).with_name("Rita One"),
            RecipientRecord::new("r2@example.com", &["Petco", "Target"]),
        ])
        .unwrap();
    MatchingEngine::new().run_round(&mut registry).unwrap();
    registry.persist(dir).unwrap();
    registry
}

#[test]
fn duplicate_recipient_file_leaves_registry_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    seeded(dir.path());
    let registry_path = dir.path().join(REGISTRY_FILE);
    let before = fs::read(&registry_path).unwrap();

    let input = dir.path().join("recipients.csv");
    fs::write(
        &input,
        "home_email,stores\nnew@example.com,Petco\nsame@example.com,Target\nSAME@example.com,Costco\n",
    )
    .unwrap();

    let records = load_recipient_csv(&input).unwrap();
    let mut registry = Registry::load(dir.path()).unwrap();
    let err = registry.upsert_recipients(&records).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey { ref key, .. } if key == "same@example.com"));

    // Nothing persisted on failure
    assert_eq!(fs::read(&registry_path).unwrap(), before);
    assert!(registry.recipient("new@example.com").is_none());
}

#[test]
fn recipient_colliding_with_registry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    seeded(dir.path());

    let mut registry = Registry::load(dir.path()).unwrap();
    let err = registry
        .upsert_recipients(&[RecipientRecord::new(" R1@Example.com ", &["Costco"])])
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateKey { .. }));
}

#[test]
fn capacity_below_commitments_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let registry = seeded(dir.path());
    let committed = registry.donor("a@example.com").unwrap().committed();
    assert!(committed > 0);

    let mut registry = Registry::load(dir.path()).unwrap();
    let err = registry
        .upsert_donors(&[DonorRecord::new("a@example.com", "A", committed - 1)])
        .unwrap_err();
    assert!(matches!(err, Error::CapacityViolation { .. }));
    assert_eq!(registry.donor("a@example.com").unwrap().capacity, 4);
}

#[test]
fn reload_matches_what_was_saved() {
    let dir = tempfile::tempdir().unwrap();
    let saved = seeded(dir.path());
    let loaded = Registry::load(dir.path()).unwrap();

    assert_eq!(loaded.history(), saved.history());
    assert_eq!(loaded.rounds(), saved.rounds());
    for (key, recipient) in saved.recipients() {
        let other = loaded.recipient(key).unwrap();
        assert_eq!(other.slots, recipient.slots);
        assert_eq!(other.name, recipient.name);
    }
    for (key, donor) in saved.donors() {
        assert_eq!(loaded.donor(key).unwrap().commitments, donor.commitments);
    }
}

#[test]
fn truncated_registry_is_corrupt_state() {
    let dir = tempfile::tempdir().unwrap();
    seeded(dir.path());
    let registry_path = dir.path().join(REGISTRY_FILE);

    let bytes = fs::read(&registry_path).unwrap();
    fs::write(&registry_path, &bytes[..bytes.len() / 3]).unwrap();

    let err = Registry::load(dir.path()).unwrap_err();
    assert!(matches!(err, Error::CorruptState(_)), "got {:?}", err);
}

#[test]
fn leftover_temp_file_does_not_break_persist() {
    let dir = tempfile::tempdir().unwrap();
    let registry = seeded(dir.path());

    fs::write(dir.path().join(format!("{}.tmp", REGISTRY_FILE)), b"half written").unwrap();
    registry.persist(dir.path()).unwrap();

    assert!(Registry::load(dir.path()).is_ok());
    assert!(!dir.path().join(format!("{}.tmp", REGISTRY_FILE)).exists());
}

#[test]
fn lock_excludes_second_holder() {
    let dir = tempfile::tempdir().unwrap();
    let held = RegistryLock::acquire(dir.path()).unwrap();
    assert!(matches!(RegistryLock::acquire(dir.path()), Err(Error::Locked(_))));
    drop(held);
    assert!(RegistryLock::acquire(dir.path()).is_ok());
}
