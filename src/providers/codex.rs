//! Codex CLI JSONL provider

use crate::types::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::{Granularity, RawBatch, RawMessage, RawTokenUsage, UsageProvider};

/// Codex JSONL line types
#[derive(Deserialize)]
struct CodexJsonLine<'a> {
    #[serde(rename = "type")]
    line_type: &'a str,
    timestamp: &'a str,
    #[serde(default)]
    payload: Option<CodexPayload>,
}

#[derive(Deserialize)]
struct CodexPayload {
    #[serde(rename = "type")]
    payload_type: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    info: Option<CodexInfo>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct CodexInfo {
    total_token_usage: Option<CodexTokenUsage>,
    #[serde(default)]
    last_token_usage: Option<CodexTokenUsage>,
}

#[derive(Deserialize, Clone, Default)]
struct CodexTokenUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cached_input_tokens: u64,
    #[serde(default)]
    reasoning_output_tokens: u64,
}

/// Raw token data extracted from a token_count event
struct TokenCountData {
    timestamp: DateTime<Utc>,
    total: CodexTokenUsage,
    last: Option<CodexTokenUsage>,
}

/// Result of parsing a single line
enum LineData {
    Skip,
    Model(String),
    SessionId(String),
    TokenCount(TokenCountData),
}

/// Provider for Codex CLI usage data
pub struct CodexProvider {
    data_dir: PathBuf,
}

impl CodexProvider {
    /// Create a provider with the default data directory (~/.codex/sessions/)
    pub fn new() -> Self {
        let home = directories::BaseDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .unwrap_or_else(|| {
                eprintln!("[tokledger] Warning: Could not determine home directory");
                PathBuf::from(".")
            });
        Self {
            data_dir: home.join(".codex").join("sessions"),
        }
    }

    /// Create a provider with a custom data directory (for testing)
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Parse a single JSONL line
    fn parse_line(&self, line: &mut [u8]) -> LineData {
        if line.is_empty() {
            return LineData::Skip;
        }

        let data: CodexJsonLine = match simd_json::from_slice(line) {
            Ok(d) => d,
            Err(_) => return LineData::Skip,
        };

        let payload = match &data.payload {
            Some(p) => p,
            None => return LineData::Skip,
        };

        if data.line_type == "turn_context" {
            if let Some(ref model) = payload.model {
                return LineData::Model(model.clone());
            }
            return LineData::Skip;
        }

        if data.line_type == "session_meta" {
            if let Some(ref id) = payload.id {
                return LineData::SessionId(id.clone());
            }
            return LineData::Skip;
        }

        if data.line_type != "event_msg" {
            return LineData::Skip;
        }

        if payload.payload_type.as_deref() != Some("token_count") {
            return LineData::Skip;
        }

        let info = match &payload.info {
            Some(i) => i,
            None => return LineData::Skip,
        };

        let total = match &info.total_token_usage {
            Some(u) => u.clone(),
            None => return LineData::Skip,
        };

        let timestamp = match DateTime::parse_from_rfc3339(data.timestamp) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => {
                eprintln!(
                    "[tokledger] Warning: Invalid timestamp '{}', skipping entry",
                    data.timestamp
                );
                return LineData::Skip;
            }
        };

        LineData::TokenCount(TokenCountData {
            timestamp,
            total,
            last: info.last_token_usage.clone(),
        })
    }
}

impl Default for CodexProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageProvider for CodexProvider {
    fn name(&self) -> &str {
        "codex"
    }

    fn granularity(&self) -> Granularity {
        Granularity::PerMessage
    }

    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_pattern(&self) -> &str {
        "**/*.jsonl"
    }

    fn parse_file(&self, path: &Path) -> Result<RawBatch> {
        let file = File::open(path).map_err(LedgerError::Io)?;
        let reader = BufReader::new(file);
        let mut entries: Vec<RawMessage> = Vec::new();
        let mut current_model: Option<String> = None;
        let mut session_id: Option<String> = None;
        let mut prev_totals = CodexTokenUsage::default();

        for line_result in reader.lines() {
            let line = match line_result {
                Ok(l) => l,
                Err(_) => continue,
            };

            if line.is_empty() {
                continue;
            }

            let mut line_bytes = line.into_bytes();
            match self.parse_line(&mut line_bytes) {
                LineData::Skip => {}
                LineData::Model(m) => current_model = Some(m),
                LineData::SessionId(id) => session_id = Some(id),
                LineData::TokenCount(data) => {
                    // Token counts are cumulative per session: prefer the
                    // explicit last_token_usage, fall back to the diff
                    let delta = if let Some(ref last) = data.last {
                        last.clone()
                    } else {
                        CodexTokenUsage {
                            input_tokens: data
                                .total
                                .input_tokens
                                .saturating_sub(prev_totals.input_tokens),
                            output_tokens: data
                                .total
                                .output_tokens
                                .saturating_sub(prev_totals.output_tokens),
                            cached_input_tokens: data
                                .total
                                .cached_input_tokens
                                .saturating_sub(prev_totals.cached_input_tokens),
                            reasoning_output_tokens: data
                                .total
                                .reasoning_output_tokens
                                .saturating_sub(prev_totals.reasoning_output_tokens),
                        }
                    };
                    prev_totals = data.total;

                    entries.push(RawMessage {
                        session_id: session_id.clone(),
                        role: None,
                        model: current_model.clone(),
                        created_at: Some(data.timestamp),
                        completed_at: None,
                        usage: Some(RawTokenUsage {
                            input: delta.input_tokens,
                            output: delta.output_tokens,
                            reasoning: delta.reasoning_output_tokens,
                            cache_write: 0,
                            cache_read: delta.cached_input_tokens,
                        }),
                        cost: None,
                    });
                }
            }
        }

        Ok(RawBatch::Messages(entries))
    }
}
