// Entity Models - donors, recipients and the assignment history
//
// Each entity is keyed by a normalized email address:
// - Donor: contact email, capacity may only grow
// - Recipient: home email, ten fixed card slots
// - AssignmentRecord: immutable, append-only fact linking the two

pub mod assignment;
pub mod donor;
pub mod recipient;

pub use assignment::{AssignmentRecord, RoundSummary};
pub use donor::{Commitment, Donor};
pub use recipient::{normalize_name, Recipient, Slot, SLOTS_PER_RECIPIENT};

/// Canonical form of an identity key (trimmed, lower-cased)
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Foo@Example.COM "), "foo@example.com");
        assert_eq!(normalize_email("a@b.org"), "a@b.org");
    }
}
