//! Record normalization
//!
//! Converts provider-specific raw entries into canonical usage records,
//! resolving cost through the pricing tiers when the source reports
//! none. Also normalizes model names to a canonical form for consistent
//! pricing lookup and aggregation across different data sources.

use crate::providers::{RawAggregateRow, RawBatch, RawMessage, RawTokenUsage};
use crate::services::pricing::{PricingResolver, TokenCounts};
use crate::types::{SkipReason, UsageRecord};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Normalize a model name to canonical form.
///
/// Transformations:
/// - Dots to hyphens: "claude-opus-4.5" → "claude-opus-4-5"
/// - Remove date suffix: "claude-opus-4-5-20251101" → "claude-opus-4-5"
pub fn normalize_model_name(model: &str) -> String {
    let normalized = model.replace('.', "-");

    // Remove 8-digit date suffix at end (e.g., -20251101)
    if let Some(suffix_start) = normalized.rfind('-') {
        let suffix = &normalized[suffix_start + 1..];
        if suffix.len() == 8
            && suffix.starts_with("20")
            && suffix.chars().all(|c| c.is_ascii_digit())
        {
            return normalized[..suffix_start].to_string();
        }
    }

    normalized
}

/// Converts raw provider entries into canonical `UsageRecord`s.
///
/// Identifiers are `provider:date:model:ordinal`, with the ordinal
/// counting records within that (provider, date, model) group in input
/// order. Re-normalizing the same source data yields the same ids, so
/// repeated ingestion upserts instead of duplicating.
pub struct RecordNormalizer<'a> {
    resolver: &'a PricingResolver,
    ordinals: HashMap<(String, NaiveDate, String), u32>,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(resolver: &'a PricingResolver) -> Self {
        Self {
            resolver,
            ordinals: HashMap::new(),
        }
    }

    /// Normalize a whole fetched batch, collecting skip reasons for the
    /// orchestration layer to surface.
    pub fn normalize_batch(
        &mut self,
        provider: &str,
        batch: RawBatch,
    ) -> (Vec<UsageRecord>, Vec<SkipReason>) {
        let mut records = Vec::new();
        let mut skips = Vec::new();
        match batch {
            RawBatch::Messages(entries) => {
                for raw in entries {
                    match self.normalize_message(provider, &raw) {
                        Ok(record) => records.push(record),
                        Err(reason) => skips.push(reason),
                    }
                }
            }
            RawBatch::Aggregates(rows) => {
                for row in rows {
                    match self.normalize_aggregate(provider, &row) {
                        Ok(mut row_records) => records.append(&mut row_records),
                        Err(reason) => skips.push(reason),
                    }
                }
            }
        }
        (records, skips)
    }

    /// Normalize one message-granularity entry into zero or one record.
    pub fn normalize_message(
        &mut self,
        provider: &str,
        raw: &RawMessage,
    ) -> Result<UsageRecord, SkipReason> {
        if let Some(role) = raw.role.as_deref() {
            if role != "assistant" {
                return Err(SkipReason::NonBillable);
            }
        }
        if raw.model.as_deref() == Some("<synthetic>") {
            return Err(SkipReason::NonBillable);
        }

        let usage = raw.usage.ok_or(SkipReason::MissingUsage)?;
        // Completion time wins over creation time when both exist
        let timestamp = raw
            .completed_at
            .or(raw.created_at)
            .ok_or(SkipReason::BadTimestamp)?;

        let model = raw.model.clone().unwrap_or_else(|| "unknown".to_string());
        let date = UsageRecord::local_date(timestamp);
        let cost = match raw.cost {
            Some(c) if c > 0.0 => c,
            _ => self
                .resolver
                .resolve_cost(&model, token_counts(usage), Some(provider)),
        };

        Ok(UsageRecord {
            id: self.next_id(provider, date, &model),
            session_id: raw.session_id.clone().unwrap_or_default(),
            provider: provider.to_string(),
            model,
            input_tokens: usage.input,
            output_tokens: usage.output,
            reasoning_tokens: usage.reasoning,
            cache_write_tokens: usage.cache_write,
            cache_read_tokens: usage.cache_read,
            cost,
            timestamp,
            date,
        })
    }

    /// Normalize one aggregate-entry row into one record per model.
    ///
    /// A reported cost covers every model on the row and is split
    /// evenly across them; per-model cost is not independently
    /// reported, so the split is an approximation carried over from the
    /// source data.
    pub fn normalize_aggregate(
        &mut self,
        provider: &str,
        row: &RawAggregateRow,
    ) -> Result<Vec<UsageRecord>, SkipReason> {
        if row.models.is_empty() {
            return Err(SkipReason::EmptyAggregate);
        }

        let share = match row.cost {
            Some(c) if c > 0.0 => Some(c / row.models.len() as f64),
            _ => None,
        };

        // Midnight UTC stands in for the unreported time of day; the
        // source-reported date stays authoritative for grouping
        let timestamp = row
            .date
            .and_hms_opt(0, 0, 0)
            .ok_or(SkipReason::BadTimestamp)?
            .and_utc();

        let mut records = Vec::with_capacity(row.models.len());
        for entry in &row.models {
            let cost = share.unwrap_or_else(|| {
                self.resolver
                    .resolve_cost(&entry.model, token_counts(entry.usage), Some(provider))
            });
            records.push(UsageRecord {
                id: self.next_id(provider, row.date, &entry.model),
                session_id: format!("{}:{}", provider, row.date),
                provider: provider.to_string(),
                model: entry.model.clone(),
                input_tokens: entry.usage.input,
                output_tokens: entry.usage.output,
                reasoning_tokens: entry.usage.reasoning,
                cache_write_tokens: entry.usage.cache_write,
                cache_read_tokens: entry.usage.cache_read,
                cost,
                timestamp,
                date: row.date,
            });
        }
        Ok(records)
    }

    fn next_id(&mut self, provider: &str, date: NaiveDate, model: &str) -> String {
        let key = (provider.to_string(), date, model.to_string());
        let ordinal = self.ordinals.entry(key).or_insert(0);
        let id = format!(
            "{}:{}:{}:{}",
            provider,
            date.format("%Y-%m-%d"),
            model,
            ordinal
        );
        *ordinal += 1;
        id
    }
}

fn token_counts(usage: RawTokenUsage) -> TokenCounts {
    TokenCounts {
        input: usage.input,
        output: usage.output,
        cache_write: usage.cache_write,
        cache_read: usage.cache_read,
    }
}
