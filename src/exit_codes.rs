//! CLI exit codes
//!
//! Scripts that run the daily batch rely on these, so they never change meaning.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success                                              |
//! | 1    | General error (I/O, SQLite, unexpected)              |
//! | 2    | Usage error (missing state dir, missing input file)  |
//! | 3    | Input file failed validation                         |
//! | 4    | Duplicate recipient home email                       |
//! | 5    | Donor capacity below cards already committed         |
//! | 6    | Registry file unreadable or inconsistent             |
//! | 7    | Matching would break the one-card-per-pair rule      |
//! | 8    | Another process holds the registry lock              |

use donation_match::Error;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_VALIDATION: u8 = 3;
pub const EXIT_DUPLICATE_KEY: u8 = 4;
pub const EXIT_CAPACITY_VIOLATION: u8 = 5;
pub const EXIT_CORRUPT_STATE: u8 = 6;
pub const EXIT_INVARIANT_VIOLATION: u8 = 7;
pub const EXIT_LOCKED: u8 = 8;

/// Exit code for a library error
pub fn for_error(err: &Error) -> u8 {
    match err {
        Error::Validation { .. } => EXIT_VALIDATION,
        Error::DuplicateKey { .. } => EXIT_DUPLICATE_KEY,
        Error::CapacityViolation { .. } => EXIT_CAPACITY_VIOLATION,
        Error::CorruptState(_) => EXIT_CORRUPT_STATE,
        Error::InternalInvariantViolation(_) => EXIT_INVARIANT_VIOLATION,
        Error::Locked(_) => EXIT_LOCKED,
        Error::Config(_) | Error::Toml(_) => EXIT_USAGE,
        Error::Csv(_) => EXIT_VALIDATION,
        Error::Io(_) | Error::Sqlite(_) | Error::Json(_) => EXIT_ERROR,
    }
}
