// 🗂️ Registry - donors, recipients and assignment history across rounds
//
// The registry is the only owner of matching state. It only ever grows:
// - donors are created or have their capacity raised
// - recipients are created, their slots filled left to right
// - assignment records are appended
//
// Every batch operation is all-or-nothing: the whole batch is checked
// against the current state before anything is applied.

use crate::db::{self, Event};
use crate::entities::{
    normalize_email, normalize_name, AssignmentRecord, Commitment, Donor, Recipient, RoundSummary,
    Slot, SLOTS_PER_RECIPIENT,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

// ============================================================================
// INCOMING RECORDS (already schema-validated by ingestion)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorRecord {
    pub email: String,
    pub name: String,
    pub card_capacity: u32,
    #[serde(default)]
    pub comments: String,
}

impl DonorRecord {
    pub fn new(email: &str, name: &str, card_capacity: u32) -> Self {
        DonorRecord {
            email: email.to_string(),
            name: name.to_string(),
            card_capacity,
            comments: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub home_email: String,
    #[serde(default)]
    pub work_email: String,
    pub acceptable_stores: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub physical_cards: bool,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub employment_status: String,
    #[serde(default = "eligible_by_default")]
    pub valid: bool,
}

fn eligible_by_default() -> bool {
    true
}

impl RecipientRecord {
    pub fn new(home_email: &str, stores: &[&str]) -> Self {
        RecipientRecord {
            home_email: home_email.to_string(),
            work_email: String::new(),
            acceptable_stores: stores.iter().map(|s| s.to_string()).collect(),
            name: String::new(),
            address: String::new(),
            phone: String::new(),
            physical_cards: false,
            comments: String::new(),
            employment_status: String::new(),
            valid: true,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

/// What an upsert batch changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub warnings: Vec<String>,
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone)]
pub struct Registry {
    donors: BTreeMap<String, Donor>,
    recipients: BTreeMap<String, Recipient>,
    history: Vec<AssignmentRecord>,
    rounds: Vec<RoundSummary>,
    events: Vec<Event>,
    actor: String,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            donors: BTreeMap::new(),
            recipients: BTreeMap::new(),
            history: Vec::new(),
            rounds: Vec::new(),
            events: Vec::new(),
            actor: "donation-match".to_string(),
        }
    }

    /// Name recorded on audit events produced by this registry
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Rebuild a registry from stored parts. Donor commitments are derived
    /// from the history, then every invariant is checked.
    pub fn from_parts(
        donors: Vec<Donor>,
        recipients: Vec<Recipient>,
        history: Vec<AssignmentRecord>,
        rounds: Vec<RoundSummary>,
        events: Vec<Event>,
    ) -> Result<Self> {
        let mut registry = Registry::new();

        for mut donor in donors {
            donor.commitments.clear();
            let key = donor.email.clone();
            if registry.donors.insert(key.clone(), donor).is_some() {
                return Err(Error::CorruptState(format!("donor {} stored twice", key)));
            }
        }
        for recipient in recipients {
            let key = recipient.home_email.clone();
            if registry.recipients.insert(key.clone(), recipient).is_some() {
                return Err(Error::CorruptState(format!("recipient {} stored twice", key)));
            }
        }
        for record in &history {
            let donor = registry.donors.get_mut(&record.donor).ok_or_else(|| {
                Error::CorruptState(format!(
                    "assignment references unknown donor {}",
                    record.donor
                ))
            })?;
            donor.commitments.push(Commitment {
                recipient: record.recipient.clone(),
                store: record.store.clone(),
                round: record.round,
            });
        }
        registry.history = history;
        registry.rounds = rounds;
        registry.events = events;

        registry.validate()?;
        Ok(registry)
    }

    // ========================================================================
    // DURABLE STORAGE
    // ========================================================================

    /// Load the registry stored in `state_dir` (empty if nothing stored yet)
    pub fn load(state_dir: &Path) -> Result<Self> {
        db::load_registry(state_dir)
    }

    /// Write the full state to `state_dir`, replacing the previous file atomically
    pub fn persist(&self, state_dir: &Path) -> Result<()> {
        db::persist_registry(self, state_dir)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn donors(&self) -> &BTreeMap<String, Donor> {
        &self.donors
    }

    pub fn recipients(&self) -> &BTreeMap<String, Recipient> {
        &self.recipients
    }

    pub fn history(&self) -> &[AssignmentRecord] {
        &self.history
    }

    pub fn rounds(&self) -> &[RoundSummary] {
        &self.rounds
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn donor(&self, email: &str) -> Option<&Donor> {
        self.donors.get(email)
    }

    pub fn recipient(&self, home_email: &str) -> Option<&Recipient> {
        self.recipients.get(home_email)
    }

    pub fn has_pair(&self, donor: &str, recipient: &str) -> bool {
        self.history
            .iter()
            .any(|r| r.donor == donor && r.recipient == recipient)
    }

    pub fn next_round_id(&self) -> u32 {
        self.rounds.last().map(|r| r.id + 1).unwrap_or(1)
    }

    /// Cards still needed across all eligible recipients
    pub fn open_demand(&self) -> usize {
        self.recipients
            .values()
            .filter(|r| r.valid)
            .map(|r| r.outstanding())
            .sum()
    }

    /// Cards donors have offered but not yet been assigned.
    /// Each donor's capacity is a u32, so the total is widened.
    pub fn free_capacity(&self) -> u64 {
        self.donors.values().map(|d| u64::from(d.remaining())).sum()
    }

    // ========================================================================
    // DONOR UPSERT
    // ========================================================================

    /// Create unseen donors and raise capacity of known ones.
    ///
    /// Capacity never goes down: the stored value becomes
    /// `max(existing, incoming)`. An incoming capacity below the cards a
    /// donor has already committed rejects the whole batch.
    pub fn upsert_donors(&mut self, records: &[DonorRecord]) -> Result<UpsertSummary> {
        // Stage 1: merge the batch by key and check it against current state
        let mut staged: BTreeMap<String, DonorRecord> = BTreeMap::new();
        let mut summary = UpsertSummary::default();

        for (i, record) in records.iter().enumerate() {
            let key = normalize_email(&record.email);
            if key.is_empty() || !key.contains('@') {
                return Err(Error::validation(
                    format!("donor batch row {}", i + 1),
                    format!("'{}' is not an email address", record.email),
                ));
            }

            if let Some(existing) = self.donors.get(&key) {
                if record.card_capacity < existing.committed() {
                    return Err(Error::CapacityViolation {
                        donor: key,
                        requested: record.card_capacity,
                        committed: existing.committed(),
                    });
                }
            }

            match staged.get_mut(&key) {
                Some(previous) => {
                    summary.warnings.push(format!(
                        "donor {} appears more than once in this batch; keeping the larger capacity",
                        key
                    ));
                    previous.card_capacity = previous.card_capacity.max(record.card_capacity);
                }
                None => {
                    let mut record = record.clone();
                    record.email = key.clone();
                    record.name = record.name.trim().to_string();
                    staged.insert(key, record);
                }
            }
        }

        // Stage 2: apply (cannot fail past this point)
        let mut events = Vec::new();
        for (key, record) in staged {
            match self.donors.get_mut(&key) {
                Some(donor) => {
                    if record.card_capacity > donor.capacity {
                        events.push(Event::new(
                            "donor_capacity_raised",
                            "donor",
                            &key,
                            serde_json::json!({
                                "from": donor.capacity,
                                "to": record.card_capacity,
                            }),
                            &self.actor,
                        ));
                        tracing::info!(donor = %key, from = donor.capacity, to = record.card_capacity, "raised donor capacity");
                        donor.capacity = record.card_capacity;
                        summary.updated += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                None => {
                    events.push(Event::new(
                        "donor_added",
                        "donor",
                        &key,
                        serde_json::json!({
                            "name": record.name,
                            "capacity": record.card_capacity,
                        }),
                        &self.actor,
                    ));
                    tracing::debug!(donor = %key, capacity = record.card_capacity, "added donor");
                    let donor = Donor::new(key.clone(), record.name, record.card_capacity, record.comments);
                    self.donors.insert(key, donor);
                    summary.created += 1;
                }
            }
        }
        self.events.extend(events);

        Ok(summary)
    }

    // ========================================================================
    // RECIPIENT UPSERT
    // ========================================================================

    /// Create new recipients. A home email or work email seen twice in the
    /// batch, or one already in the registry, rejects the whole batch.
    ///
    /// Store names are matched case-insensitively against every store already
    /// on file; the first spelling seen is the one kept.
    pub fn upsert_recipients(&mut self, records: &[RecipientRecord]) -> Result<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        let mut batch_keys: HashSet<String> = HashSet::new();
        let mut staged: Vec<Recipient> = Vec::new();

        let mut work_emails: HashMap<String, String> = self
            .recipients
            .values()
            .filter(|r| !r.work_email.is_empty())
            .map(|r| (r.work_email.clone(), r.home_email.clone()))
            .collect();
        let mut spellings: HashMap<String, String> = HashMap::new();
        for store in self.recipients.values().flat_map(|r| r.stores.iter()) {
            spellings
                .entry(store.to_lowercase())
                .or_insert_with(|| store.clone());
        }

        // Names seen so far, for "might be the same person" warnings
        let mut known_names: HashMap<String, String> = self
            .recipients
            .values()
            .filter_map(|r| normalize_name(&r.name).map(|n| (n, r.home_email.clone())))
            .collect();

        for (i, record) in records.iter().enumerate() {
            let key = normalize_email(&record.home_email);
            if key.is_empty() || !key.contains('@') {
                return Err(Error::validation(
                    format!("recipient batch row {}", i + 1),
                    format!("'{}' is not an email address", record.home_email),
                ));
            }
            if !batch_keys.insert(key.clone()) {
                return Err(Error::DuplicateKey {
                    key,
                    detail: "home email appears more than once in this batch".to_string(),
                });
            }
            if self.recipients.contains_key(&key) {
                return Err(Error::DuplicateKey {
                    key,
                    detail: "home email is already registered".to_string(),
                });
            }

            let work_email = normalize_email(&record.work_email);
            if !work_email.is_empty() {
                if let Some(other) = work_emails.get(&work_email) {
                    return Err(Error::DuplicateKey {
                        key: work_email,
                        detail: format!("work email is already used by recipient {}", other),
                    });
                }
                work_emails.insert(work_email.clone(), key.clone());
            }

            let stores = clean_store_list(&record.acceptable_stores, &mut spellings);
            if stores.is_empty() {
                return Err(Error::validation(
                    format!("recipient {}", key),
                    "no acceptable store given",
                ));
            }

            if let Some(normalized) = normalize_name(&record.name) {
                match known_names.get(&normalized) {
                    Some(other) => summary.warnings.push(format!(
                        "recipient {} ({}) might be the same person as {}",
                        key, record.name, other
                    )),
                    None => {
                        known_names.insert(normalized, key.clone());
                    }
                }
            }

            let mut recipient = Recipient::new(key, stores);
            recipient.work_email = work_email;
            recipient.employment_status = record.employment_status.trim().to_string();
            recipient.valid = record.valid;
            recipient.name = record.name.trim().to_string();
            recipient.address = record.address.trim().to_string();
            recipient.phone = record.phone.trim().to_string();
            recipient.physical_cards = record.physical_cards;
            recipient.comments = record.comments.clone();
            staged.push(recipient);
        }

        for recipient in staged {
            self.events.push(Event::new(
                "recipient_added",
                "recipient",
                &recipient.home_email,
                serde_json::json!({ "stores": recipient.stores, "valid": recipient.valid }),
                &self.actor,
            ));
            tracing::debug!(recipient = %recipient.home_email, "added recipient");
            self.recipients.insert(recipient.home_email.clone(), recipient);
            summary.created += 1;
        }

        Ok(summary)
    }

    // ========================================================================
    // ASSIGNMENTS (used by the matching engine)
    // ========================================================================

    /// Append one card: fills the recipient's next slot, commits donor
    /// capacity and records the history fact.
    pub(crate) fn record_assignment(
        &mut self,
        donor_key: &str,
        recipient_key: &str,
        store: &str,
        round: u32,
        value_usd: u32,
    ) -> Result<AssignmentRecord> {
        if self.has_pair(donor_key, recipient_key) {
            return Err(Error::InternalInvariantViolation(format!(
                "donor {} already has an assignment to recipient {}",
                donor_key, recipient_key
            )));
        }

        let donor = self.donors.get(donor_key).ok_or_else(|| {
            Error::InternalInvariantViolation(format!("unknown donor {}", donor_key))
        })?;
        if donor.remaining() == 0 {
            return Err(Error::InternalInvariantViolation(format!(
                "donor {} has no capacity left",
                donor_key
            )));
        }

        let recipient = self.recipients.get_mut(recipient_key).ok_or_else(|| {
            Error::InternalInvariantViolation(format!("unknown recipient {}", recipient_key))
        })?;
        if !recipient.accepts(store) {
            return Err(Error::InternalInvariantViolation(format!(
                "recipient {} does not accept {}",
                recipient_key, store
            )));
        }
        recipient
            .fill_next(Slot {
                donor: donor_key.to_string(),
                store: store.to_string(),
                round,
            })
            .ok_or_else(|| {
                Error::InternalInvariantViolation(format!(
                    "recipient {} has no empty slot",
                    recipient_key
                ))
            })?;

        if let Some(donor) = self.donors.get_mut(donor_key) {
            donor.commitments.push(Commitment {
                recipient: recipient_key.to_string(),
                store: store.to_string(),
                round,
            });
        }

        let record = AssignmentRecord {
            donor: donor_key.to_string(),
            recipient: recipient_key.to_string(),
            store: store.to_string(),
            round,
            value_usd,
        };
        self.history.push(record.clone());
        Ok(record)
    }

    /// Close a matching round in the round log and audit trail
    pub(crate) fn complete_round(&mut self, round: u32, new_assignments: usize) {
        let summary = RoundSummary {
            id: round,
            completed_at: chrono::Utc::now(),
            new_assignments,
        };
        self.events.push(Event::new(
            "round_completed",
            "round",
            &round.to_string(),
            serde_json::json!({ "new_assignments": new_assignments }),
            &self.actor,
        ));
        self.rounds.push(summary);
    }

    // ========================================================================
    // INVARIANTS
    // ========================================================================

    /// Check every registry invariant; any failure is reported as CorruptState
    pub fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| Err(Error::CorruptState(msg));

        // History: known parties, unique pairs, acceptable stores
        let mut pairs: HashSet<(&str, &str)> = HashSet::new();
        for record in &self.history {
            if !self.donors.contains_key(&record.donor) {
                return corrupt(format!("assignment references unknown donor {}", record.donor));
            }
            let recipient = match self.recipients.get(&record.recipient) {
                Some(r) => r,
                None => {
                    return corrupt(format!(
                        "assignment references unknown recipient {}",
                        record.recipient
                    ))
                }
            };
            if !pairs.insert(record.pair()) {
                return corrupt(format!(
                    "donor {} assigned to recipient {} more than once",
                    record.donor, record.recipient
                ));
            }
            if !recipient.accepts(&record.store) {
                return corrupt(format!(
                    "assignment of {} to {} uses unacceptable store {}",
                    record.donor, record.recipient, record.store
                ));
            }
        }

        // Donors: commitments mirror history and stay within capacity
        for (key, donor) in &self.donors {
            if &donor.email != key {
                return corrupt(format!("donor stored under key {} has email {}", key, donor.email));
            }
            if donor.committed() > donor.capacity {
                return corrupt(format!(
                    "donor {} has {} cards committed but capacity {}",
                    key,
                    donor.committed(),
                    donor.capacity
                ));
            }
            let from_history = self.history.iter().filter(|r| &r.donor == key).count();
            if from_history != donor.commitments.len() {
                return corrupt(format!(
                    "donor {} commitments ({}) disagree with history ({})",
                    key,
                    donor.commitments.len(),
                    from_history
                ));
            }
        }

        // Recipients: slots match history one-to-one
        let mut slot_facts: HashSet<(&str, &str, &str, u32)> = HashSet::new();
        for (key, recipient) in &self.recipients {
            if &recipient.home_email != key {
                return corrupt(format!(
                    "recipient stored under key {} has email {}",
                    key, recipient.home_email
                ));
            }
            if recipient.stores.is_empty() {
                return corrupt(format!("recipient {} has no acceptable store", key));
            }
            if recipient.filled() > SLOTS_PER_RECIPIENT {
                return corrupt(format!("recipient {} has too many slots filled", key));
            }
            for slot in recipient.filled_slots() {
                if !self.donors.contains_key(&slot.donor) {
                    return corrupt(format!(
                        "recipient {} slot references unknown donor {}",
                        key, slot.donor
                    ));
                }
                if !recipient.accepts(&slot.store) {
                    return corrupt(format!(
                        "recipient {} slot uses unacceptable store {}",
                        key, slot.store
                    ));
                }
                if !slot_facts.insert((key.as_str(), slot.donor.as_str(), slot.store.as_str(), slot.round)) {
                    return corrupt(format!(
                        "recipient {} holds two cards from donor {}",
                        key, slot.donor
                    ));
                }
            }
        }

        let history_facts: HashSet<(&str, &str, &str, u32)> = self
            .history
            .iter()
            .map(|r| (r.recipient.as_str(), r.donor.as_str(), r.store.as_str(), r.round))
            .collect();
        if slot_facts != history_facts {
            return corrupt(format!(
                "recipient slots ({}) disagree with assignment history ({})",
                slot_facts.len(),
                history_facts.len()
            ));
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn history_mut(&mut self) -> &mut Vec<AssignmentRecord> {
        &mut self.history
    }
}

/// Trim, collapse inner whitespace, drop blanks and repeats, keep order.
/// `spellings` maps a lower-cased store name to its canonical spelling and
/// learns any store it has not seen before.
fn clean_store_list(stores: &[String], spellings: &mut HashMap<String, String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for store in stores {
        let store = store.split_whitespace().collect::<Vec<_>>().join(" ");
        if store.is_empty() {
            continue;
        }
        let canonical = spellings
            .entry(store.to_lowercase())
            .or_insert(store)
            .clone();
        if !cleaned.contains(&canonical) {
            cleaned.push(canonical);
        }
    }
    cleaned
}
