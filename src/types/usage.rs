//! Canonical usage types

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One billable unit of agent activity, normalized from a provider record.
///
/// Immutable after normalization except `cost`, which a recalculation
/// pass may rewrite in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    /// Deterministic identifier: `provider:date:model:ordinal`
    pub id: String,
    pub session_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    /// USD; provider-supplied or resolver-computed, never left undefined
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
    /// Calendar date derived from `timestamp` by the normalizer
    pub date: NaiveDate,
}

impl UsageRecord {
    /// Sum of the four billable token categories.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_write_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    /// Convert a UTC timestamp to the user's local calendar date.
    /// Ensures date grouping matches the user's local calendar.
    pub fn local_date(timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&Local).date_naive()
    }
}

/// Per-model subtotal within one calendar date. Derived, recomputed on
/// every aggregation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelBreakdown {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost: f64,
}

impl ModelBreakdown {
    pub fn add(&mut self, record: &UsageRecord) {
        self.input_tokens = self.input_tokens.saturating_add(record.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(record.output_tokens);
        self.cache_write_tokens = self
            .cache_write_tokens
            .saturating_add(record.cache_write_tokens);
        self.cache_read_tokens = self
            .cache_read_tokens
            .saturating_add(record.cache_read_tokens);
        self.cost += record.cost;
    }

    #[allow(dead_code)] // used in aggregation tests
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_write_tokens)
            .saturating_add(self.cache_read_tokens)
    }
}

/// One calendar date's full picture.
///
/// `total_tokens` and `total_cost` always equal the sums over the
/// contained breakdowns; one breakdown per model per date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub models_used: Vec<String>,
    pub model_breakdowns: Vec<ModelBreakdown>,
}

impl DailyUsage {
    /// A zeroed entry for a date with no recorded usage.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            input_tokens: 0,
            output_tokens: 0,
            cache_write_tokens: 0,
            cache_read_tokens: 0,
            total_tokens: 0,
            total_cost: 0.0,
            models_used: Vec::new(),
            model_breakdowns: Vec::new(),
        }
    }
}

/// Ranking-table row keyed by canonical provider name or model name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AggregatedUsageRow {
    pub name: String,
    pub message_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Distinct calendar dates this group appeared on
    pub active_days: u64,
}

impl AggregatedUsageRow {
    pub fn add(&mut self, record: &UsageRecord) {
        self.message_count = self.message_count.saturating_add(1);
        self.input_tokens = self.input_tokens.saturating_add(record.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(record.output_tokens);
        self.cache_write_tokens = self
            .cache_write_tokens
            .saturating_add(record.cache_write_tokens);
        self.cache_read_tokens = self
            .cache_read_tokens
            .saturating_add(record.cache_read_tokens);
        self.total_tokens = self.total_tokens.saturating_add(record.total_tokens());
        self.total_cost += record.cost;
    }
}

/// Top-level report across a date range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Sorted descending by cost, ties by tokens
    pub providers: Vec<AggregatedUsageRow>,
    /// Sorted descending by cost, ties by tokens
    pub models: Vec<AggregatedUsageRow>,
    pub message_count: u64,
    /// Calendar dates with nonzero cost
    pub active_days: u64,
    /// Calendar dates in the reporting range
    pub total_days: u64,
    pub avg_daily_cost: f64,
    pub avg_daily_tokens: f64,
}
