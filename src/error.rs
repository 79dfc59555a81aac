// ⚠️ Error kinds - everything that can stop a batch command
//
// Fatal kinds abort before any write reaches the state directory.
// Informational conditions (shortfalls, extra stores) live in the RoundReport
// and never come through here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input row (bad header, empty key, unparseable capacity)
    #[error("validation failed at {location}: {message}")]
    Validation { location: String, message: String },

    /// Repeated recipient home email, inside a batch or against the registry
    #[error("duplicate recipient key {key}: {detail}")]
    DuplicateKey { key: String, detail: String },

    /// Donor capacity update would drop below cards already committed
    #[error("capacity violation for donor {donor}: requested {requested}, already committed {committed}")]
    CapacityViolation {
        donor: String,
        requested: u32,
        committed: u32,
    },

    /// Durable state is unreadable or internally inconsistent
    #[error("corrupt registry state: {0}")]
    CorruptState(String),

    /// The engine was about to break the one-card-per-pair rule
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    /// Another process holds the state directory
    #[error("registry is locked by another process ({0})")]
    Locked(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn validation(location: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Short machine-friendly name, used in logs and exit-code mapping
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "ValidationError",
            Error::DuplicateKey { .. } => "DuplicateKeyError",
            Error::CapacityViolation { .. } => "CapacityViolation",
            Error::CorruptState(_) => "CorruptState",
            Error::InternalInvariantViolation(_) => "InternalInvariantViolation",
            Error::Locked(_) => "Locked",
            Error::Config(_) => "ConfigError",
            Error::Io(_) => "IoError",
            Error::Sqlite(_) => "SqliteError",
            Error::Csv(_) => "CsvError",
            Error::Json(_) => "JsonError",
            Error::Toml(_) => "TomlError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
