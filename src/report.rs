// 📋 Round Report - what one matching round did
//
// Plain value object, built once from the registry after the round.
// Shortfalls and extra stores are informational: they never fail a round.

use crate::entities::AssignmentRecord;
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// INFORMATIONAL CONDITIONS
// ============================================================================

/// Recipient still below ten cards after the round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortfallWarning {
    pub recipient: String,
    pub filled: usize,
    pub missing: usize,
}

/// Donor had to open a store beyond the preferred limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraStoreException {
    pub donor: String,
    pub store: String,
    /// Stores the donor was already committed to when this one opened
    pub prior_stores: Vec<String>,
    pub round: u32,
}

/// Donor capacity nobody could use this round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnplacedCapacity {
    pub donor: String,
    pub remaining: u32,
}

// ============================================================================
// TALLIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorTally {
    pub donor: String,
    pub name: String,
    pub capacity: u32,
    pub new_cards: u32,
    pub total_cards: u32,
    /// Distinct stores across all rounds, most-used first
    pub stores: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientTally {
    pub recipient: String,
    pub new_cards: usize,
    pub filled: usize,
}

// ============================================================================
// ROUND REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u32,
    pub generated_at: DateTime<Utc>,
    pub new_assignments: Vec<AssignmentRecord>,
    pub shortfalls: Vec<ShortfallWarning>,
    pub extra_stores: Vec<ExtraStoreException>,
    pub unplaced: Vec<UnplacedCapacity>,
    pub donor_tallies: Vec<DonorTally>,
    pub recipient_tallies: Vec<RecipientTally>,
    store_score: u64,
}

impl RoundReport {
    /// Summarise a finished round. `registry` is the state after the round.
    pub fn build(
        registry: &Registry,
        round: u32,
        new_assignments: Vec<AssignmentRecord>,
        extra_stores: Vec<ExtraStoreException>,
    ) -> Self {
        let mut new_by_donor: BTreeMap<&str, u32> = BTreeMap::new();
        let mut new_by_recipient: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &new_assignments {
            *new_by_donor.entry(record.donor.as_str()).or_insert(0) += 1;
            *new_by_recipient.entry(record.recipient.as_str()).or_insert(0) += 1;
        }

        let donor_tallies: Vec<DonorTally> = registry
            .donors()
            .values()
            .map(|d| DonorTally {
                donor: d.email.clone(),
                name: d.name.clone(),
                capacity: d.capacity,
                new_cards: new_by_donor.get(d.email.as_str()).copied().unwrap_or(0),
                total_cards: d.committed(),
                stores: d.committed_stores(),
            })
            .collect();

        let recipient_tallies: Vec<RecipientTally> = registry
            .recipients()
            .values()
            .map(|r| RecipientTally {
                recipient: r.home_email.clone(),
                new_cards: new_by_recipient.get(r.home_email.as_str()).copied().unwrap_or(0),
                filled: r.filled(),
            })
            .collect();

        let shortfalls: Vec<ShortfallWarning> = registry
            .recipients()
            .values()
            .filter(|r| r.is_open())
            .map(|r| ShortfallWarning {
                recipient: r.home_email.clone(),
                filled: r.filled(),
                missing: r.outstanding(),
            })
            .collect();

        let unplaced: Vec<UnplacedCapacity> = registry
            .donors()
            .values()
            .filter(|d| d.remaining() > 0)
            .map(|d| UnplacedCapacity {
                donor: d.email.clone(),
                remaining: d.remaining(),
            })
            .collect();

        RoundReport {
            round,
            generated_at: Utc::now(),
            new_assignments,
            shortfalls,
            extra_stores,
            unplaced,
            donor_tallies,
            recipient_tallies,
            store_score: store_concentration_score(registry),
        }
    }

    /// True when the round created nothing
    pub fn is_noop(&self) -> bool {
        self.new_assignments.is_empty()
    }

    pub fn cards_missing(&self) -> usize {
        self.shortfalls.iter().map(|s| s.missing).sum()
    }

    /// Quality of the whole registry after the round; higher is better
    pub fn score(&self) -> u64 {
        self.store_score
    }

    pub fn summary(&self) -> String {
        format!(
            "Round {}: {} new cards, {} recipients short by {} cards, {} extra-store exceptions, {} donors with unplaced capacity, score {}",
            self.round,
            self.new_assignments.len(),
            self.shortfalls.len(),
            self.cards_missing(),
            self.extra_stores.len(),
            self.unplaced.len(),
            self.store_score
        )
    }
}

/// 100 points per filled slot, plus per donor 10 points for each card at its
/// most-used store and 1 point for each card at its second store.
pub fn store_concentration_score(registry: &Registry) -> u64 {
    let slots: u64 = registry
        .recipients()
        .values()
        .map(|r| r.filled() as u64 * 100)
        .sum();

    let concentration: u64 = registry
        .donors()
        .values()
        .map(|d| {
            let mut counts: Vec<u32> = d.store_counts().into_values().collect();
            counts.sort_unstable_by(|a, b| b.cmp(a));
            let first = counts.first().copied().unwrap_or(0) as u64;
            let second = counts.get(1).copied().unwrap_or(0) as u64;
            first * 10 + second
        })
        .sum();

    slots + concentration
}
