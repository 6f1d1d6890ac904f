use thiserror::Error;

/// tokledger error types
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Failed to parse JSON/JSONL
    #[error("parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Provider data could not be fetched
    #[error("provider '{provider}' unavailable: {reason}")]
    Source { provider: String, reason: String },

    /// Storage operation failed (transaction rolled back)
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Pricing catalog fetch failed
    #[error("pricing error: {0}")]
    Pricing(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias for tokledger
pub type Result<T> = std::result::Result<T, LedgerError>;
