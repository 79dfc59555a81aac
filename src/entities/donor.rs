// 🎁 Donor Entity - identity is the contact email
//
// "Capacity is a promise, commitments are facts"
//
// - Capacity = how many $20 cards the donor agreed to buy (only ever raised)
// - Commitments = cards already assigned, one per recipient, never retracted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One card this donor has been asked to buy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub recipient: String,
    pub store: String,
    pub round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donor {
    // ========================================================================
    // IDENTITY (never changes)
    // ========================================================================
    /// Normalized contact email
    pub email: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    pub name: String,

    /// Maximum number of cards the donor is willing to buy
    pub capacity: u32,

    #[serde(default)]
    pub comments: String,

    /// Cards committed so far, in assignment order.
    /// Rebuilt from the assignment history on load.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commitments: Vec<Commitment>,

    pub created_at: DateTime<Utc>,
}

impl Donor {
    pub fn new(email: String, name: String, capacity: u32, comments: String) -> Self {
        Donor {
            email,
            name,
            capacity,
            comments,
            commitments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Cards already committed across all rounds
    pub fn committed(&self) -> u32 {
        self.commitments.len() as u32
    }

    /// Capacity not yet committed
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.committed())
    }

    pub fn has_given_to(&self, recipient: &str) -> bool {
        self.commitments.iter().any(|c| c.recipient == recipient)
    }

    /// Card count per store this donor already buys from
    pub fn store_counts(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for c in &self.commitments {
            *counts.entry(c.store.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Distinct committed stores, most-used first, then by name
    pub fn committed_stores(&self) -> Vec<String> {
        let mut stores: Vec<(String, u32)> = self.store_counts().into_iter().collect();
        stores.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        stores.into_iter().map(|(store, _)| store).collect()
    }

    pub fn distinct_store_count(&self) -> usize {
        self.store_counts().len()
    }
}
