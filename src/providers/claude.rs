//! Claude Code JSONL provider

use crate::types::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::{Granularity, RawBatch, RawMessage, RawTokenUsage, UsageProvider};

/// Claude Code JSONL line structure (messages with usage)
#[derive(Deserialize)]
struct ClaudeJsonLine<'a> {
    timestamp: &'a str,
    #[serde(rename = "type")]
    line_type: Option<&'a str>,
    #[serde(rename = "sessionId")]
    session_id: Option<&'a str>,
    message: Option<ClaudeMessage<'a>>,
    #[serde(rename = "costUSD")]
    cost_usd: Option<f64>,
}

#[derive(Deserialize)]
struct ClaudeMessage<'a> {
    model: Option<&'a str>,
    usage: Option<ClaudeUsage>,
}

#[derive(Deserialize)]
struct ClaudeUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

/// Provider for Claude Code usage data
pub struct ClaudeProvider {
    data_dir: PathBuf,
}

impl ClaudeProvider {
    /// Create a provider with the default data directory (~/.claude/projects/)
    pub fn new() -> Self {
        let home = directories::BaseDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .unwrap_or_else(|| {
                eprintln!("[tokledger] Warning: Could not determine home directory");
                PathBuf::from(".")
            });
        Self {
            data_dir: home.join(".claude").join("projects"),
        }
    }

    /// Create a provider with a custom data directory (for testing)
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Parse a single JSONL line (zero-copy with borrowed strings).
    /// Lines without a message object are structural noise, not usage
    /// entries; everything else is handed to the normalizer as-is.
    fn parse_line(&self, line: &mut [u8]) -> Option<RawMessage> {
        if line.is_empty() {
            return None;
        }

        let data: ClaudeJsonLine = simd_json::from_slice(line).ok()?;
        let message = data.message.as_ref()?;

        let timestamp = DateTime::parse_from_rfc3339(data.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));

        let usage = message.usage.as_ref().map(|u| RawTokenUsage {
            input: u.input_tokens,
            output: u.output_tokens,
            reasoning: 0,
            cache_write: u.cache_creation_input_tokens.unwrap_or(0),
            cache_read: u.cache_read_input_tokens.unwrap_or(0),
        });

        Some(RawMessage {
            session_id: data.session_id.map(String::from),
            role: data.line_type.map(String::from),
            model: message.model.map(String::from),
            created_at: None,
            completed_at: timestamp,
            usage,
            cost: data.cost_usd,
        })
    }
}

impl Default for ClaudeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
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
        let mut entries = Vec::new();

        // Stream line-by-line to avoid loading entire file into memory
        for line_result in reader.lines() {
            let line = match line_result {
                Ok(l) => l,
                Err(_) => continue,
            };

            if line.is_empty() {
                continue;
            }

            // Convert to mutable bytes for simd-json
            let mut line_bytes = line.into_bytes();
            if let Some(entry) = self.parse_line(&mut line_bytes) {
                entries.push(entry);
            }
        }

        Ok(RawBatch::Messages(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("claude")
            .join(name)
    }

    fn fixture_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("claude")
    }

    fn messages(batch: RawBatch) -> Vec<RawMessage> {
        match batch {
            RawBatch::Messages(entries) => entries,
            RawBatch::Aggregates(_) => panic!("claude yields message batches"),
        }
    }

    #[test]
    fn test_parse_claude_jsonl() {
        let provider = ClaudeProvider::with_data_dir(fixture_dir());
        let entries = messages(provider.parse_file(&fixture_path("sample.jsonl")).unwrap());

        // 3 assistant lines + 1 user line; the invalid line is dropped
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn test_parse_first_entry() {
        let provider = ClaudeProvider::with_data_dir(fixture_dir());
        let entries = messages(provider.parse_file(&fixture_path("sample.jsonl")).unwrap());

        let first = &entries[0];
        assert_eq!(first.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert_eq!(first.role.as_deref(), Some("assistant"));
        assert_eq!(first.session_id.as_deref(), Some("sess-001"));
        let usage = first.usage.unwrap();
        assert_eq!(usage.input, 100);
        assert_eq!(usage.output, 50);
        assert_eq!(usage.cache_write, 10);
        assert_eq!(usage.cache_read, 20);
    }

    #[test]
    fn test_parse_entry_with_cost() {
        let provider = ClaudeProvider::with_data_dir(fixture_dir());
        let entries = messages(provider.parse_file(&fixture_path("sample.jsonl")).unwrap());

        let second = &entries[1];
        assert_eq!(second.model.as_deref(), Some("claude-opus-4-20250514"));
        assert_eq!(second.cost, Some(0.025));
    }

    #[test]
    fn test_user_line_kept_without_usage() {
        let provider = ClaudeProvider::with_data_dir(fixture_dir());
        let entries = messages(provider.parse_file(&fixture_path("sample.jsonl")).unwrap());

        // The user turn carries no usage block; the normalizer skips it
        let user = entries.iter().find(|e| e.role.as_deref() == Some("user"));
        assert!(user.is_some());
        assert!(user.unwrap().usage.is_none());
    }

    #[test]
    fn test_invalid_timestamp_yields_no_time() {
        let provider = ClaudeProvider::with_data_dir(fixture_dir());
        let entries = messages(provider.parse_file(&fixture_path("sample.jsonl")).unwrap());

        // Third assistant entry carries a broken timestamp
        let broken = entries
            .iter()
            .find(|e| e.model.as_deref() == Some("claude-haiku-4"));
        assert!(broken.is_some());
        assert!(broken.unwrap().completed_at.is_none());
    }

    #[test]
    fn test_parse_nonexistent_file() {
        let provider = ClaudeProvider::new();
        let result = provider.parse_file(Path::new("/nonexistent/file.jsonl"));
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_shape() {
        let provider = ClaudeProvider::new();
        assert_eq!(provider.name(), "claude");
        assert_eq!(provider.granularity(), Granularity::PerMessage);
        assert_eq!(provider.file_pattern(), "**/*.jsonl");
    }
}
