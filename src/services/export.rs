//! Report shapes for the presentation layer

use crate::services::aggregator::{canonical_provider, Aggregator};
use crate::types::{DailyUsage, UsageRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Totals mirroring one day's numeric fields, without the model lists
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct ReportTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Flat report: the daily series plus its totals
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlatReport {
    pub daily: Vec<DailyUsage>,
    pub totals: ReportTotals,
}

/// Build a flat report from an already-aggregated daily series.
pub fn flat_report(daily: Vec<DailyUsage>) -> FlatReport {
    let mut totals = ReportTotals::default();
    for day in &daily {
        totals.input_tokens = totals.input_tokens.saturating_add(day.input_tokens);
        totals.output_tokens = totals.output_tokens.saturating_add(day.output_tokens);
        totals.cache_write_tokens = totals
            .cache_write_tokens
            .saturating_add(day.cache_write_tokens);
        totals.cache_read_tokens = totals
            .cache_read_tokens
            .saturating_add(day.cache_read_tokens);
        totals.total_tokens = totals.total_tokens.saturating_add(day.total_tokens);
        totals.total_cost += day.total_cost;
    }
    FlatReport { daily, totals }
}

/// Partition the record set by canonical provider, aggregate each
/// partition over the same gap-filled range, and report per provider.
pub fn per_provider_report(
    records: &[UsageRecord],
    start: NaiveDate,
    end: NaiveDate,
) -> BTreeMap<String, FlatReport> {
    let mut partitions: BTreeMap<String, Vec<UsageRecord>> = BTreeMap::new();
    for record in records {
        partitions
            .entry(canonical_provider(&record.provider).to_string())
            .or_default()
            .push(record.clone());
    }

    partitions
        .into_iter()
        .map(|(provider, partition)| {
            let daily = Aggregator::aggregate_by_day(&partition);
            let filled = Aggregator::fill_gaps(daily, start, end);
            (provider, flat_report(filled))
        })
        .collect()
}
