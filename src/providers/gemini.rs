//! Gemini CLI usage rollup provider
//!
//! Gemini CLI writes pre-summed daily usage rollups rather than
//! per-message events: each row carries a date, the models active on
//! it, and one combined cost for the whole day.

use crate::types::{LedgerError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Granularity, RawAggregateRow, RawBatch, RawModelTokens, RawTokenUsage, UsageProvider};

/// Gemini usage rollup file structure
#[derive(Deserialize)]
struct GeminiUsageFile {
    days: Vec<GeminiDay>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiDay {
    date: String,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    models: Vec<GeminiModelUsage>,
}

#[derive(Deserialize)]
struct GeminiModelUsage {
    model: String,
    tokens: GeminiTokens,
}

#[derive(Deserialize)]
struct GeminiTokens {
    input: u64,
    output: u64,
    #[serde(default)]
    cached: u64,
    #[serde(default)]
    thoughts: u64,
}

/// Provider for Gemini CLI usage data
pub struct GeminiProvider {
    data_dir: PathBuf,
}

impl GeminiProvider {
    /// Create a provider with the default data directory (~/.gemini/usage/)
    pub fn new() -> Self {
        let home = directories::BaseDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .unwrap_or_else(|| {
                eprintln!("[tokledger] Warning: Could not determine home directory");
                PathBuf::from(".")
            });
        Self {
            data_dir: home.join(".gemini").join("usage"),
        }
    }

    /// Create a provider with a custom data directory (for testing)
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn granularity(&self) -> Granularity {
        Granularity::PerAggregate
    }

    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_pattern(&self) -> &str {
        "*.json"
    }

    fn parse_file(&self, path: &Path) -> Result<RawBatch> {
        let mut content = fs::read_to_string(path).map_err(LedgerError::Io)?;
        // SAFETY: `content` is exclusively owned and not aliased; safe for simd_json in-place mutation
        let usage_file: GeminiUsageFile = unsafe {
            simd_json::from_str(&mut content).map_err(|e| LedgerError::Parse(e.to_string()))?
        };

        let mut rows = Vec::new();
        for day in usage_file.days {
            let date = match day.date.parse::<NaiveDate>() {
                Ok(d) => d,
                Err(_) => {
                    eprintln!(
                        "[tokledger] Warning: Invalid date '{}', skipping row",
                        day.date
                    );
                    continue;
                }
            };

            rows.push(RawAggregateRow {
                date,
                cost: day.total_cost_usd,
                models: day
                    .models
                    .into_iter()
                    .map(|m| RawModelTokens {
                        model: m.model,
                        usage: RawTokenUsage {
                            input: m.tokens.input,
                            output: m.tokens.output,
                            reasoning: m.tokens.thoughts,
                            cache_write: 0,
                            cache_read: m.tokens.cached,
                        },
                    })
                    .collect(),
            });
        }

        Ok(RawBatch::Aggregates(rows))
    }
}
