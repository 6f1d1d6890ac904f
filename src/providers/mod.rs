//! Provider collaborators for AI agent execution environments

mod claude;
mod codex;
mod gemini;

pub use claude::ClaudeProvider;
pub use codex::CodexProvider;
pub use gemini::GeminiProvider;

use crate::types::{LedgerError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Reporting granularity a provider declares for its raw data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One raw entry per agent message
    PerMessage,
    /// Pre-summed rows per date and model
    PerAggregate,
}

/// Token counts as reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawTokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache_write: u64,
    pub cache_read: u64,
}

/// One message-granularity raw entry, schema-validated at the provider
/// boundary. Optional fields stop here; only the canonical record
/// crosses into the core.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub session_id: Option<String>,
    pub role: Option<String>,
    pub model: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub usage: Option<RawTokenUsage>,
    pub cost: Option<f64>,
}

/// Per-model token row inside an aggregate entry
#[derive(Debug, Clone)]
pub struct RawModelTokens {
    pub model: String,
    pub usage: RawTokenUsage,
}

/// One aggregate-entry usage row: a date, the models active on it, and
/// at most one combined cost covering all of them
#[derive(Debug, Clone)]
pub struct RawAggregateRow {
    pub date: NaiveDate,
    pub cost: Option<f64>,
    pub models: Vec<RawModelTokens>,
}

/// A provider's fetched raw data
#[derive(Debug, Clone)]
pub enum RawBatch {
    Messages(Vec<RawMessage>),
    Aggregates(Vec<RawAggregateRow>),
}

impl RawBatch {
    pub fn len(&self) -> usize {
        match self {
            RawBatch::Messages(entries) => entries.len(),
            RawBatch::Aggregates(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append another batch of the same kind; mixed kinds cannot occur
    /// for a single provider and are dropped.
    fn append(&mut self, other: RawBatch) {
        match (self, other) {
            (RawBatch::Messages(a), RawBatch::Messages(b)) => a.extend(b),
            (RawBatch::Aggregates(a), RawBatch::Aggregates(b)) => a.extend(b),
            _ => {}
        }
    }
}

/// Trait for fetching raw usage data from an AI CLI's on-disk logs
pub trait UsageProvider: Send + Sync {
    /// Provider name (e.g., "claude")
    fn name(&self) -> &str;

    /// Declared granularity of the raw data
    fn granularity(&self) -> Granularity;

    /// Data directory to scan for usage files
    fn data_dir(&self) -> &Path;

    /// Glob pattern for finding usage files (e.g., "**/*.jsonl")
    fn file_pattern(&self) -> &str;

    /// Parse a single file into raw entries
    fn parse_file(&self, path: &Path) -> Result<RawBatch>;

    /// Fetch all raw data, parsing files in parallel with rayon.
    /// Per-file parse failures are warnings; only a failure to read the
    /// data directory itself is an error.
    fn fetch(&self) -> Result<RawBatch> {
        let files = self.collect_files()?;
        let batches: Vec<RawBatch> = files
            .par_iter()
            .filter_map(|f| match self.parse_file(f) {
                Ok(batch) => Some(batch),
                Err(e) => {
                    eprintln!("[tokledger] Warning: failed to parse {:?}: {}", f, e);
                    None
                }
            })
            .collect();

        let mut merged = match self.granularity() {
            Granularity::PerMessage => RawBatch::Messages(Vec::new()),
            Granularity::PerAggregate => RawBatch::Aggregates(Vec::new()),
        };
        for batch in batches {
            merged.append(batch);
        }
        Ok(merged)
    }

    /// Collect all files matching the glob pattern, in sorted order.
    /// A missing data directory yields an empty set (the environment is
    /// simply not installed on this machine).
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        if !self.data_dir().exists() {
            return Ok(Vec::new());
        }
        let pattern = self.data_dir().join(self.file_pattern());
        let paths = glob::glob(&pattern.to_string_lossy()).map_err(|e| LedgerError::Source {
            provider: self.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(paths.filter_map(|entry| entry.ok()).collect())
    }
}

/// Registry of available providers
pub struct ProviderRegistry {
    providers: Vec<Box<dyn UsageProvider>>,
}

impl ProviderRegistry {
    /// Create a new registry with default providers
    pub fn new() -> Self {
        Self {
            providers: vec![
                Box::new(ClaudeProvider::new()),
                Box::new(CodexProvider::new()),
                Box::new(GeminiProvider::new()),
            ],
        }
    }

    /// Get all registered providers
    pub fn providers(&self) -> &[Box<dyn UsageProvider>] {
        &self.providers
    }

    /// Find a provider by name
    pub fn get(&self, name: &str) -> Option<&dyn UsageProvider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
