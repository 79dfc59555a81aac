// 🧾 Recipient Entity - identity is the home email
//
// Ten fixed card slots, filled left to right across rounds and never emptied.
// Every filled slot's store must be one the recipient asked for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cards each recipient receives when fully matched
pub const SLOTS_PER_RECIPIENT: usize = 10;

/// A filled card position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub donor: String,
    pub store: String,
    pub round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    // ========================================================================
    // IDENTITY (never changes)
    // ========================================================================
    /// Normalized home email
    pub home_email: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    /// Normalized work email; empty when the sign-up sheet had none.
    /// Unique across recipients like the home email.
    #[serde(default)]
    pub work_email: String,

    /// Acceptable stores, most preferred first
    pub stores: Vec<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub phone: String,

    /// Recipient cannot redeem e-cards and needs plastic ones mailed
    #[serde(default)]
    pub physical_cards: bool,

    #[serde(default)]
    pub comments: String,

    /// Employment status as written on the sign-up sheet
    #[serde(default)]
    pub employment_status: String,

    /// Eligibility was confirmed. Ineligible recipients are kept on file
    /// but never matched or exported.
    #[serde(default = "eligible_by_default")]
    pub valid: bool,

    // ========================================================================
    // SLOTS
    // ========================================================================
    #[serde(default)]
    pub slots: [Option<Slot>; SLOTS_PER_RECIPIENT],

    pub created_at: DateTime<Utc>,
}

impl Recipient {
    pub fn new(home_email: String, stores: Vec<String>) -> Self {
        Recipient {
            home_email,
            work_email: String::new(),
            stores,
            name: String::new(),
            address: String::new(),
            phone: String::new(),
            physical_cards: false,
            comments: String::new(),
            employment_status: String::new(),
            valid: true,
            slots: Default::default(),
            created_at: Utc::now(),
        }
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Cards still needed to reach ten
    pub fn outstanding(&self) -> usize {
        SLOTS_PER_RECIPIENT - self.filled()
    }

    pub fn is_full(&self) -> bool {
        self.outstanding() == 0
    }

    /// Eligible and still short of cards
    pub fn is_open(&self) -> bool {
        self.valid && !self.is_full()
    }

    pub fn accepts(&self, store: &str) -> bool {
        self.stores.iter().any(|s| s == store)
    }

    pub fn has_donor(&self, donor: &str) -> bool {
        self.filled_slots().any(|s| s.donor == donor)
    }

    pub fn filled_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().flatten()
    }

    /// Donors in slot order
    pub fn donors(&self) -> Vec<&str> {
        self.filled_slots().map(|s| s.donor.as_str()).collect()
    }

    /// Put a card in the first empty slot. Returns the slot index, or None when full.
    pub fn fill_next(&mut self, slot: Slot) -> Option<usize> {
        let index = self.slots.iter().position(|s| s.is_none())?;
        self.slots[index] = Some(slot);
        Some(index)
    }

    /// "Name, Address" the way mailing labels print it
    pub fn display_name(&self) -> String {
        match (self.name.is_empty(), self.address.is_empty()) {
            (true, _) => self.home_email.clone(),
            (false, true) => self.name.clone(),
            (false, false) => format!("{}, {}", self.name, self.address),
        }
    }
}

fn eligible_by_default() -> bool {
    true
}

/// Reduce a person's name to "first last" for duplicate detection.
///
/// Lower-cases, strips everything but letters, drops a leading title and a
/// trailing generational suffix. Returns None when nothing is left.
pub fn normalize_name(text: &str) -> Option<String> {
    let mut words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_lowercase())
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect();

    if words.len() > 1 && matches!(words[0].as_str(), "mr" | "mrs" | "miss" | "ms" | "mz" | "dr") {
        words.remove(0);
    }
    if words.len() > 1
        && matches!(
            words[words.len() - 1].as_str(),
            "junior" | "jr" | "senior" | "sr" | "ii" | "iii" | "iv"
        )
    {
        words.pop();
    }

    let first = words.first()?;
    let last = words.last()?;
    Some(format!("{} {}", first, last))
}
