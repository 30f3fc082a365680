// ⚠️ Error Model - input shape, configuration and persistence failures
// Capacity exhaustion is NOT an error: it routes accounts to leftover.

use thiserror::Error;

pub type RotationResult<T> = Result<T, RotationError>;

#[derive(Debug, Error)]
pub enum RotationError {
    /// A feed or override sheet lacks required columns. Nothing is processed.
    #[error("{source_name}: missing required column(s): {}", columns.join(", "))]
    MissingColumns {
        source_name: String,
        columns: Vec<String>,
    },

    /// A row could not be decoded into a record.
    #[error("{source_name}, row {row}: {message}")]
    InvalidRecord {
        source_name: String,
        row: u64,
        message: String,
    },

    /// A tax-id root that cannot be normalized to 14 digits.
    #[error("invalid tax-id root '{0}'")]
    InvalidTaxId(String),

    /// Roster configuration is unreadable or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// History store or export target failed. The in-memory rotation may
    /// still be valid; the caller decides whether to retry.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Another rotation run holds the run lock.
    #[error("rotation run {holder} is already in progress (started {started_at})")]
    RunInProgress { holder: String, started_at: String },
}

impl RotationError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// True for failures of the durable layer rather than of the input.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::RunInProgress { .. })
    }
}

impl From<rusqlite::Error> for RotationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(format!("sqlite: {err}"))
    }
}

impl From<std::io::Error> for RotationError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(format!("io: {err}"))
    }
}
