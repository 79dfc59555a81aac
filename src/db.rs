// 🗄️ Registry storage - SQLite file inside the state directory
//
// persist: build a complete fresh database at registry.db.tmp, close it,
//          then rename it over registry.db (the rename is the commit point)
// load:    read every table back, rebuild the Registry, check the digest
//          and all invariants; anything off is CorruptState

use crate::entities::{AssignmentRecord, Donor, Recipient, RoundSummary, Slot, SLOTS_PER_RECIPIENT};
use crate::error::{Error, Result};
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const REGISTRY_FILE: &str = "registry.db";
pub const SCHEMA_VERSION: i64 = 1;

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn registry_path(state_dir: &Path) -> PathBuf {
    state_dir.join(REGISTRY_FILE)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS donors (
            email TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            comments TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recipients (
            home_email TEXT PRIMARY KEY,
            work_email TEXT NOT NULL,
            stores TEXT NOT NULL,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            phone TEXT NOT NULL,
            physical_cards INTEGER NOT NULL,
            comments TEXT NOT NULL,
            employment_status TEXT NOT NULL,
            valid INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS slots (
            recipient TEXT NOT NULL,
            slot_index INTEGER NOT NULL,
            donor TEXT NOT NULL,
            store TEXT NOT NULL,
            round INTEGER NOT NULL,
            PRIMARY KEY (recipient, slot_index)
        )",
        [],
    )?;

    // Append-only history; one card per (donor, recipient) pair, ever
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments (
            seq INTEGER PRIMARY KEY,
            donor TEXT NOT NULL,
            recipient TEXT NOT NULL,
            store TEXT NOT NULL,
            round INTEGER NOT NULL,
            value_usd INTEGER NOT NULL,
            UNIQUE (donor, recipient)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rounds (
            id INTEGER PRIMARY KEY,
            completed_at TEXT NOT NULL,
            new_assignments INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// SHA-256 over the canonical JSON of everything that matters for matching.
/// Timestamps and the audit trail are left out.
pub fn state_digest(registry: &Registry) -> Result<String> {
    let donors: Vec<_> = registry
        .donors()
        .values()
        .map(|d| serde_json::json!([d.email, d.name, d.capacity, d.comments]))
        .collect();
    let recipients: Vec<_> = registry
        .recipients()
        .values()
        .map(|r| {
            serde_json::json!([
                r.home_email,
                r.work_email,
                r.stores,
                r.name,
                r.address,
                r.phone,
                r.physical_cards,
                r.comments,
                r.employment_status,
                r.valid,
                r.slots
            ])
        })
        .collect();
    let rounds: Vec<_> = registry
        .rounds()
        .iter()
        .map(|r| serde_json::json!([r.id, r.new_assignments]))
        .collect();

    let canonical = serde_json::to_vec(&serde_json::json!({
        "donors": donors,
        "recipients": recipients,
        "history": registry.history(),
        "rounds": rounds,
    }))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// PERSIST
// ============================================================================

pub fn persist_registry(registry: &Registry, state_dir: &Path) -> Result<()> {
    fs::create_dir_all(state_dir)?;
    let final_path = registry_path(state_dir);
    let tmp_path = state_dir.join(format!("{}.tmp", REGISTRY_FILE));

    // Leftover from an interrupted write
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    {
        let mut conn = Connection::open(&tmp_path)?;
        setup_database(&conn)?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('state_digest', ?1)",
            params![state_digest(registry)?],
        )?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('written_at', ?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        insert_donors(&tx, registry.donors().values())?;
        insert_recipients(&tx, registry.recipients().values())?;
        insert_assignments(&tx, registry.history())?;
        for round in registry.rounds() {
            tx.execute(
                "INSERT INTO rounds (id, completed_at, new_assignments) VALUES (?1, ?2, ?3)",
                params![round.id, round.completed_at.to_rfc3339(), round.new_assignments as i64],
            )?;
        }
        for event in registry.events() {
            insert_event(&tx, event)?;
        }
        tx.commit()?;

        conn.close().map_err(|(_, e)| e)?;
    }

    fs::File::open(&tmp_path)?.sync_all()?;
    fs::rename(&tmp_path, &final_path)?;
    sync_dir(state_dir)?;

    tracing::info!(
        path = %final_path.display(),
        donors = registry.donors().len(),
        recipients = registry.recipients().len(),
        assignments = registry.history().len(),
        "persisted registry"
    );
    Ok(())
}

/// Flush the directory entry so the rename survives a power loss
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn insert_donors<'a>(conn: &Connection, donors: impl Iterator<Item = &'a Donor>) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO donors (email, name, capacity, comments, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for d in donors {
        stmt.execute(params![d.email, d.name, d.capacity, d.comments, d.created_at.to_rfc3339()])?;
    }
    Ok(())
}

fn insert_recipients<'a>(
    conn: &Connection,
    recipients: impl Iterator<Item = &'a Recipient>,
) -> Result<()> {
    let mut recipient_stmt = conn.prepare(
        "INSERT INTO recipients (home_email, work_email, stores, name, address, phone,
                                 physical_cards, comments, employment_status, valid, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    let mut slot_stmt = conn.prepare(
        "INSERT INTO slots (recipient, slot_index, donor, store, round) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    for r in recipients {
        recipient_stmt.execute(params![
            r.home_email,
            r.work_email,
            serde_json::to_string(&r.stores)?,
            r.name,
            r.address,
            r.phone,
            r.physical_cards,
            r.comments,
            r.employment_status,
            r.valid,
            r.created_at.to_rfc3339(),
        ])?;
        for (index, slot) in r.slots.iter().enumerate() {
            if let Some(slot) = slot {
                slot_stmt.execute(params![r.home_email, index as i64, slot.donor, slot.store, slot.round])?;
            }
        }
    }
    Ok(())
}

fn insert_assignments(conn: &Connection, history: &[AssignmentRecord]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO assignments (seq, donor, recipient, store, round, value_usd)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (seq, record) in history.iter().enumerate() {
        stmt.execute(params![
            seq as i64,
            record.donor,
            record.recipient,
            record.store,
            record.round,
            record.value_usd,
        ])?;
    }
    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

// ============================================================================
// LOAD
// ============================================================================

/// Load the registry from `state_dir`. No file yet means a fresh, empty registry.
pub fn load_registry(state_dir: &Path) -> Result<Registry> {
    let path = registry_path(state_dir);
    if !path.exists() {
        tracing::info!(path = %path.display(), "no registry yet, starting empty");
        return Ok(Registry::new());
    }

    let corrupt = |e: rusqlite::Error| {
        Error::CorruptState(format!("{}: {}", path.display(), e))
    };

    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(corrupt)?;

    let version: String = read_meta(&conn, "schema_version").map_err(corrupt)?;
    if version != SCHEMA_VERSION.to_string() {
        return Err(Error::CorruptState(format!(
            "{}: unsupported schema version {}",
            path.display(),
            version
        )));
    }
    let stored_digest: String = read_meta(&conn, "state_digest").map_err(corrupt)?;

    let donors = read_donors(&conn).map_err(corrupt)?;
    let recipients = read_recipients(&conn).map_err(corrupt)?;
    let history = read_assignments(&conn).map_err(corrupt)?;
    let rounds = read_rounds(&conn).map_err(corrupt)?;
    let events = read_events(&conn).map_err(corrupt)?;

    let registry = Registry::from_parts(donors, recipients, history, rounds, events)?;

    let digest = state_digest(&registry)?;
    if digest != stored_digest {
        return Err(Error::CorruptState(format!(
            "{}: content digest mismatch (stored {}, computed {})",
            path.display(),
            stored_digest,
            digest
        )));
    }

    tracing::debug!(
        path = %path.display(),
        donors = registry.donors().len(),
        recipients = registry.recipients().len(),
        "loaded registry"
    );
    Ok(registry)
}

fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<String> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
}

fn parse_time(text: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn read_donors(conn: &Connection) -> rusqlite::Result<Vec<Donor>> {
    let mut stmt =
        conn.prepare("SELECT email, name, capacity, comments, created_at FROM donors ORDER BY email")?;
    let donors = stmt
        .query_map([], |row| {
            let created_at: String = row.get(4)?;
            Ok(Donor {
                email: row.get(0)?,
                name: row.get(1)?,
                capacity: row.get(2)?,
                comments: row.get(3)?,
                commitments: Vec::new(),
                created_at: parse_time(&created_at, 4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(donors)
}

fn read_recipients(conn: &Connection) -> rusqlite::Result<Vec<Recipient>> {
    let mut stmt = conn.prepare(
        "SELECT home_email, work_email, stores, name, address, phone, physical_cards,
                comments, employment_status, valid, created_at
         FROM recipients ORDER BY home_email",
    )?;
    let mut recipients = stmt
        .query_map([], |row| {
            let stores_json: String = row.get(2)?;
            let created_at: String = row.get(10)?;
            let stores: Vec<String> = serde_json::from_str(&stores_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(Recipient {
                home_email: row.get(0)?,
                work_email: row.get(1)?,
                stores,
                name: row.get(3)?,
                address: row.get(4)?,
                phone: row.get(5)?,
                physical_cards: row.get(6)?,
                comments: row.get(7)?,
                employment_status: row.get(8)?,
                valid: row.get(9)?,
                slots: Default::default(),
                created_at: parse_time(&created_at, 10)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT recipient, slot_index, donor, store, round FROM slots")?;
    let slots = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                Slot {
                    donor: row.get(2)?,
                    store: row.get(3)?,
                    round: row.get(4)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (recipient_key, index, slot) in slots {
        let recipient = recipients
            .iter_mut()
            .find(|r| r.home_email == recipient_key)
            .ok_or_else(|| invalid_row(format!("slot for unknown recipient {}", recipient_key)))?;
        let index = usize::try_from(index)
            .ok()
            .filter(|i| *i < SLOTS_PER_RECIPIENT)
            .ok_or_else(|| invalid_row(format!("slot index {} out of range", index)))?;
        recipient.slots[index] = Some(slot);
    }

    Ok(recipients)
}

fn read_assignments(conn: &Connection) -> rusqlite::Result<Vec<AssignmentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT donor, recipient, store, round, value_usd FROM assignments ORDER BY seq",
    )?;
    let history = stmt
        .query_map([], |row| {
            Ok(AssignmentRecord {
                donor: row.get(0)?,
                recipient: row.get(1)?,
                store: row.get(2)?,
                round: row.get(3)?,
                value_usd: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(history)
}

fn read_rounds(conn: &Connection) -> rusqlite::Result<Vec<RoundSummary>> {
    let mut stmt = conn.prepare("SELECT id, completed_at, new_assignments FROM rounds ORDER BY id")?;
    let rounds = stmt
        .query_map([], |row| {
            let completed_at: String = row.get(1)?;
            Ok(RoundSummary {
                id: row.get(0)?,
                completed_at: parse_time(&completed_at, 1)?,
                new_assignments: row.get::<_, i64>(2)? as usize,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rounds)
}

fn read_events(conn: &Connection) -> rusqlite::Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         ORDER BY id",
    )?;

    let events = stmt
        .query_map([], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_time(&timestamp_str, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

fn invalid_row(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity<'a>(
    registry: &'a Registry,
    entity_type: &str,
    entity_id: &str,
) -> Vec<&'a Event> {
    let mut events: Vec<&Event> = registry
        .events()
        .iter()
        .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
        .collect();
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DonorRecord, RecipientRecord};

    fn sample_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .upsert_donors(&[
                DonorRecord::new("dana@example.com", "Dana", 3),
                DonorRecord::new("eli@example.com", "Eli", 1),
            ])
            .unwrap();
        let mut rita = RecipientRecord::new("rita@example.com", &["Safeway", "Petco"]).with_name("Rita");
        rita.physical_cards = true;
        rita.work_email = "rlopez@work.example".to_string();
        let mut sam = RecipientRecord::new("sam@example.com", &["Target"]);
        sam.valid = false;
        sam.employment_status = "Retired".to_string();
        registry.upsert_recipients(&[rita, sam]).unwrap();
        registry
            .record_assignment("dana@example.com", "rita@example.com", "Petco", 1, 20)
            .unwrap();
        registry
            .record_assignment("eli@example.com", "rita@example.com", "Safeway", 1, 20)
            .unwrap();
        registry.complete_round(1, 2);
        registry
    }

    #[test]
    fn test_persist_then_load_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = sample_registry();

        persist_registry(&registry, dir.path()).unwrap();
        let loaded = load_registry(dir.path()).unwrap();

        assert_eq!(loaded.donors().len(), 2);
        assert_eq!(loaded.history(), registry.history());
        assert_eq!(loaded.rounds().len(), 1);
        assert_eq!(loaded.next_round_id(), 2);
        assert_eq!(loaded.events().len(), registry.events().len());

        let rita = loaded.recipient("rita@example.com").unwrap();
        assert_eq!(rita.filled(), 2);
        assert!(rita.physical_cards);
        assert_eq!(rita.stores, vec!["Safeway".to_string(), "Petco".to_string()]);
        assert_eq!(rita.work_email, "rlopez@work.example");
        let sam = loaded.recipient("sam@example.com").unwrap();
        assert!(!sam.valid);
        assert_eq!(sam.employment_status, "Retired");
        assert_eq!(loaded.donor("dana@example.com").unwrap().remaining(), 2);
        assert_eq!(state_digest(&loaded).unwrap(), state_digest(&registry).unwrap());

        // No temporary file left behind
        assert!(!dir.path().join("registry.db.tmp").exists());

        println!("✅ Persist/load test PASSED");
    }

    #[test]
    fn test_missing_registry_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = load_registry(dir.path()).unwrap();
        assert!(registry.donors().is_empty());
        assert_eq!(registry.next_round_id(), 1);
    }

    #[test]
    fn test_garbage_file_is_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(registry_path(dir.path()), b"this is not a database at all").unwrap();

        let err = load_registry(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CorruptState(_)), "got {:?}", err);
    }

    #[test]
    fn test_tampered_capacity_is_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        persist_registry(&sample_registry(), dir.path()).unwrap();

        // Edit behind the registry's back: digest no longer matches
        let conn = Connection::open(registry_path(dir.path())).unwrap();
        conn.execute(
            "UPDATE donors SET capacity = 9 WHERE email = 'dana@example.com'",
            [],
        )
        .unwrap();
        drop(conn);

        let err = load_registry(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CorruptState(_)));
    }

    #[test]
    fn test_slot_for_unknown_donor_is_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        persist_registry(&sample_registry(), dir.path()).unwrap();

        let conn = Connection::open(registry_path(dir.path())).unwrap();
        conn.execute(
            "INSERT INTO slots (recipient, slot_index, donor, store, round)
             VALUES ('sam@example.com', 0, 'ghost@example.com', 'Target', 1)",
            [],
        )
        .unwrap();
        drop(conn);

        let err = load_registry(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CorruptState(_)));
    }

    #[test]
    fn test_persist_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = sample_registry();
        persist_registry(&registry, dir.path()).unwrap();

        registry
            .upsert_donors(&[DonorRecord::new("fay@example.com", "Fay", 2)])
            .unwrap();
        persist_registry(&registry, dir.path()).unwrap();

        let loaded = load_registry(dir.path()).unwrap();
        assert_eq!(loaded.donors().len(), 3);
    }

    #[test]
    fn test_persist_into_fresh_directory_syncs_it() {
        let root = tempfile::tempdir().unwrap();
        let state_dir = root.path().join("state");

        persist_registry(&sample_registry(), &state_dir).unwrap();
        sync_dir(&state_dir).unwrap();

        let entries: Vec<_> = fs::read_dir(&state_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![REGISTRY_FILE.to_string()]);
    }

    #[test]
    fn test_event_log() {
        let registry = sample_registry();
        let events = get_events_for_entity(&registry, "donor", "dana@example.com");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "donor_added");
        assert_eq!(events[0].actor, "donation-match");

        println!("✅ Event log test PASSED");
    }
}
