// 📜 Assignment history - append-only facts
//
// A card, once assigned, is bought by a real person. Records are never
// edited or removed; corrections happen by adding capacity, not by rewriting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub donor: String,
    pub recipient: String,
    pub store: String,
    pub round: u32,
    /// Face value in dollars
    pub value_usd: u32,
}

impl AssignmentRecord {
    pub fn pair(&self) -> (&str, &str) {
        (&self.donor, &self.recipient)
    }
}

/// One completed matching round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub id: u32,
    pub completed_at: DateTime<Utc>,
    pub new_assignments: usize,
}
