// Multi-round behaviour of the registry and matching engine, end to end
// through a real state directory.

use donation_match::{
    DonorRecord, MatchingEngine, RecipientRecord, Registry, SLOTS_PER_RECIPIENT,
};
use std::collections::HashSet;

fn donors(rows: &[(&str, u32)]) -> Vec<DonorRecord> {
    rows.iter()
        .map(|(email, cap)| DonorRecord::new(email, email, *cap))
        .collect()
}

fn recipients(rows: &[(&str, &[&str])]) -> Vec<RecipientRecord> {
    rows.iter()
        .map(|(email, stores)| RecipientRecord::new(email, stores))
        .collect()
}

fn assert_invariants(registry: &Registry) {
    registry.validate().unwrap();

    let mut pairs = HashSet::new();
    for record in registry.history() {
        assert!(pairs.insert((record.donor.clone(), record.recipient.clone())));
        let recipient = registry.recipient(&record.recipient).unwrap();
        assert!(recipient.accepts(&record.store));
    }
    for donor in registry.donors().values() {
        assert!(donor.committed() <= donor.capacity);
    }
    for recipient in registry.recipients().values() {
        assert!(recipient.filled() <= SLOTS_PER_RECIPIENT);
    }
}

#[test]
fn round_one_commitments_survive_round_two() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MatchingEngine::new();

    // Round 1
    let mut registry = Registry::load(dir.path()).unwrap();
    registry
        .upsert_donors(&donors(&[("a@example.com", 8), ("b@example.com", 5)]))
        .unwrap();
    registry
        .upsert_recipients(&recipients(&[
            ("r1@example.com", &["Safeway", "Petco"]),
            ("r2@example.com", &["Safeway"]),
        ]))
        .unwrap();
    let first = engine.run_round(&mut registry).unwrap();
    registry.persist(dir.path()).unwrap();
    let round_one = registry.history().to_vec();
    let filled_before: Vec<usize> = registry.recipients().values().map(|r| r.filled()).collect();
    assert_eq!(first.new_assignments.len(), round_one.len());
    assert_invariants(&registry);

    // Round 2, in a "new process"
    let mut registry = Registry::load(dir.path()).unwrap();
    registry
        .upsert_donors(&donors(&[("a@example.com", 10), ("c@example.com", 6)]))
        .unwrap();
    registry
        .upsert_recipients(&recipients(&[("r3@example.com", &["Petco", "Target"])]))
        .unwrap();
    let second = engine.run_round(&mut registry).unwrap();
    registry.persist(dir.path()).unwrap();

    assert_eq!(second.round, 2);
    assert!(!second.is_noop());
    assert!(registry.history().starts_with(&round_one));
    for (before, after) in filled_before.iter().zip(registry.recipients().values()) {
        assert!(after.filled() >= *before);
    }
    // r3 only arrived in round 2 and got cards
    assert!(registry.recipient("r3@example.com").unwrap().filled() > 0);
    assert_invariants(&registry);

    let reloaded = Registry::load(dir.path()).unwrap();
    assert_eq!(reloaded.history(), registry.history());
    assert_eq!(reloaded.rounds().len(), 2);
}

#[test]
fn rerun_without_updates_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MatchingEngine::new();

    let mut registry = Registry::new();
    registry
        .upsert_donors(&donors(&[("a@example.com", 30), ("b@example.com", 3)]))
        .unwrap();
    registry
        .upsert_recipients(&recipients(&[
            ("r1@example.com", &["Petco"]),
            ("r2@example.com", &["Target", "Petco"]),
            ("r3@example.com", &["Costco"]),
        ]))
        .unwrap();
    engine.run_round(&mut registry).unwrap();
    registry.persist(dir.path()).unwrap();

    let mut reloaded = Registry::load(dir.path()).unwrap();
    let report = engine.run_round(&mut reloaded).unwrap();
    assert!(report.is_noop());
    assert_eq!(reloaded.history(), registry.history());
}

#[test]
fn demand_beyond_capacity_is_reported_not_fatal() {
    let mut registry = Registry::new();
    registry
        .upsert_donors(&donors(&[("a@example.com", 3)]))
        .unwrap();
    registry
        .upsert_recipients(&recipients(&[("r1@example.com", &["Petco"])]))
        .unwrap();

    let report = MatchingEngine::new().run_round(&mut registry).unwrap();

    // One donor can give one card to one recipient, no matter its capacity
    assert_eq!(report.new_assignments.len(), 1);
    assert_eq!(report.shortfalls.len(), 1);
    assert_eq!(report.shortfalls[0].missing, SLOTS_PER_RECIPIENT - 1);
    assert_eq!(report.unplaced[0].remaining, 2);
}

#[test]
fn ten_donors_fill_a_recipient() {
    let mut registry = Registry::new();
    let rows: Vec<(String, u32)> = (0..12).map(|i| (format!("d{:02}@example.com", i), 1)).collect();
    let rows: Vec<(&str, u32)> = rows.iter().map(|(e, c)| (e.as_str(), *c)).collect();
    registry.upsert_donors(&donors(&rows)).unwrap();
    registry
        .upsert_recipients(&recipients(&[("r1@example.com", &["Petco", "Target"])]))
        .unwrap();

    let report = MatchingEngine::new().run_round(&mut registry).unwrap();

    let recipient = registry.recipient("r1@example.com").unwrap();
    assert!(recipient.is_full());
    assert!(report.shortfalls.is_empty());
    assert_eq!(report.unplaced.len(), 2);
    // Every donor opened the same, most-demanded store
    assert!(recipient.filled_slots().all(|s| s.store == "Petco"));
    assert_invariants(&registry);
}
