//! Type definitions for tokledger

mod error;
mod usage;

pub use error::*;
pub use usage::*;

/// Why the normalizer declined to produce a record.
///
/// Skips are reported to the orchestration layer, which decides how to
/// surface them; a skipped record is never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not an agent response (user turn, synthetic message)
    NonBillable,
    /// No token usage block on the entry
    MissingUsage,
    /// Timestamp missing or unparsable
    BadTimestamp,
    /// Aggregate row lists no models
    EmptyAggregate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NonBillable => write!(f, "non-billable entry"),
            SkipReason::MissingUsage => write!(f, "missing token usage"),
            SkipReason::BadTimestamp => write!(f, "missing or invalid timestamp"),
            SkipReason::EmptyAggregate => write!(f, "aggregate row without models"),
        }
    }
}
