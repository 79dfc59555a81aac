// Donation Match - Core Library
// Registry, matching engine and round report, plus the CSV edges around them.
// Used by the CLI binary and the integration tests.

pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod export;
pub mod ingest;
pub mod lock;
pub mod registry;
pub mod report;

// Re-export commonly used types
pub use config::{MatcherConfig, CONFIG_FILE_NAME};
pub use db::{get_events_for_entity, state_digest, Event, REGISTRY_FILE, SCHEMA_VERSION};
pub use engine::MatchingEngine;
pub use entities::{
    normalize_email, normalize_name, AssignmentRecord, Commitment, Donor, Recipient, RoundSummary,
    Slot, SLOTS_PER_RECIPIENT,
};
pub use error::{Error, Result};
pub use export::{write_round_exports, DONATION_VIEW, RECIPIENT_VIEW, SHORTFALL_VIEW};
pub use ingest::{load_donor_csv, load_recipient_csv, read_donors, read_recipients};
pub use lock::{RegistryLock, LOCK_FILE};
pub use registry::{DonorRecord, RecipientRecord, Registry, UpsertSummary};
pub use report::{
    store_concentration_score, DonorTally, ExtraStoreException, RecipientTally, RoundReport,
    ShortfallWarning, UnplacedCapacity,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
