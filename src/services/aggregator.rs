//! Aggregation engine for usage reporting
//!
//! Groups canonical records into per-date/per-model daily usage, builds
//! provider/model ranking rows, and completes calendar ranges.

use crate::types::{AggregatedUsageRow, DailyUsage, ModelBreakdown, UsageRecord, UsageSummary};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Upstream provider identifiers treated as aliases of a canonical name.
/// Two raw provider strings may contribute to one ranking row.
pub const PROVIDER_ALIASES: &[(&str, &str)] = &[
    ("claude-code", "claude"),
    ("codex-cli", "codex"),
    ("gemini-cli", "gemini"),
    ("github-copilot-enterprise", "github-copilot"),
];

/// Canonical provider name after alias resolution.
pub fn canonical_provider(name: &str) -> &str {
    PROVIDER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

/// Aggregator for computing usage statistics
pub struct Aggregator;

impl Aggregator {
    /// Aggregate records by calendar date (sorted ascending), one model
    /// breakdown per model per date.
    pub fn aggregate_by_day(records: &[UsageRecord]) -> Vec<DailyUsage> {
        // Composite (date, model) key keeps the two-level grouping in
        // one ordered map; iteration yields dates ascending and model
        // names in stable order within a date.
        let mut buckets: BTreeMap<(NaiveDate, String), ModelBreakdown> = BTreeMap::new();

        for record in records {
            let bucket = buckets
                .entry((record.date, record.model.clone()))
                .or_insert_with(|| ModelBreakdown {
                    model: record.model.clone(),
                    ..Default::default()
                });
            bucket.add(record);
        }

        let mut days: Vec<DailyUsage> = Vec::new();
        for ((date, _), breakdown) in buckets {
            if days.last().map(|d| d.date) != Some(date) {
                days.push(DailyUsage::empty(date));
            }
            let day = days.last_mut().expect("day pushed above");
            day.input_tokens = day.input_tokens.saturating_add(breakdown.input_tokens);
            day.output_tokens = day.output_tokens.saturating_add(breakdown.output_tokens);
            day.cache_write_tokens = day
                .cache_write_tokens
                .saturating_add(breakdown.cache_write_tokens);
            day.cache_read_tokens = day
                .cache_read_tokens
                .saturating_add(breakdown.cache_read_tokens);
            day.total_cost += breakdown.cost;
            day.models_used.push(breakdown.model.clone());
            day.model_breakdowns.push(breakdown);
        }

        for day in &mut days {
            day.total_tokens = day
                .input_tokens
                .saturating_add(day.output_tokens)
                .saturating_add(day.cache_write_tokens)
                .saturating_add(day.cache_read_tokens);
        }

        days
    }

    /// Build the top-level summary from a record set and its daily
    /// aggregation. Global totals and day counts come from `daily`, so
    /// both inputs must cover the same date range.
    pub fn summarize(records: &[UsageRecord], daily: &[DailyUsage]) -> UsageSummary {
        let providers = Self::rank_rows(records, |r| canonical_provider(&r.provider).to_string());
        let models = Self::rank_rows(records, |r| r.model.clone());

        let mut summary = UsageSummary {
            providers,
            models,
            message_count: records.len() as u64,
            ..Default::default()
        };

        for day in daily {
            summary.input_tokens = summary.input_tokens.saturating_add(day.input_tokens);
            summary.output_tokens = summary.output_tokens.saturating_add(day.output_tokens);
            summary.cache_write_tokens = summary
                .cache_write_tokens
                .saturating_add(day.cache_write_tokens);
            summary.cache_read_tokens = summary
                .cache_read_tokens
                .saturating_add(day.cache_read_tokens);
            summary.total_tokens = summary.total_tokens.saturating_add(day.total_tokens);
            summary.total_cost += day.total_cost;
            if day.total_cost != 0.0 {
                summary.active_days += 1;
            }
        }

        summary.total_days = daily.len() as u64;
        if summary.total_days > 0 {
            summary.avg_daily_cost = summary.total_cost / summary.total_days as f64;
            summary.avg_daily_tokens = summary.total_tokens as f64 / summary.total_days as f64;
        }

        summary
    }

    /// Single-level grouping into ranking rows, sorted by cost
    /// descending with tokens descending as tie-break.
    fn rank_rows<F>(records: &[UsageRecord], key: F) -> Vec<AggregatedUsageRow>
    where
        F: Fn(&UsageRecord) -> String,
    {
        let mut groups: HashMap<String, (AggregatedUsageRow, HashSet<NaiveDate>)> = HashMap::new();

        for record in records {
            let name = key(record);
            let (row, dates) = groups.entry(name.clone()).or_insert_with(|| {
                (
                    AggregatedUsageRow {
                        name,
                        ..Default::default()
                    },
                    HashSet::new(),
                )
            });
            row.add(record);
            dates.insert(record.date);
        }

        let mut rows: Vec<AggregatedUsageRow> = groups
            .into_values()
            .map(|(mut row, dates)| {
                row.active_days = dates.len() as u64;
                row
            })
            .collect();

        rows.sort_by(|a, b| {
            b.total_cost
                .partial_cmp(&a.total_cost)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.total_tokens.cmp(&a.total_tokens))
        });
        rows
    }

    /// Fill calendar gaps: one entry per day in `[start, end]` inclusive,
    /// ascending. Present entries keep their identity; missing dates are
    /// synthesized zeroed. Day stepping is calendar arithmetic, not a
    /// fixed millisecond offset.
    pub fn fill_gaps(daily: Vec<DailyUsage>, start: NaiveDate, end: NaiveDate) -> Vec<DailyUsage> {
        let mut by_date: BTreeMap<NaiveDate, DailyUsage> =
            daily.into_iter().map(|d| (d.date, d)).collect();

        let mut filled = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            filled.push(
                by_date
                    .remove(&cursor)
                    .unwrap_or_else(|| DailyUsage::empty(cursor)),
            );
            match cursor.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_record(
        date: (i32, u32, u32),
        provider: &str,
        model: &str,
        input: u64,
        output: u64,
        cost: f64,
    ) -> UsageRecord {
        let naive = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        UsageRecord {
            id: format!("{}:{}:{}:0", provider, naive, model),
            session_id: "s1".into(),
            provider: provider.into(),
            model: model.into(),
            input_tokens: input,
            output_tokens: output,
            reasoning_tokens: 0,
            cache_write_tokens: 0,
            cache_read_tokens: 0,
            cost,
            timestamp: Utc
                .with_ymd_and_hms(date.0, date.1, date.2, 12, 0, 0)
                .unwrap(),
            date: naive,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ========== aggregate_by_day ==========

    #[test]
    fn test_daily_empty() {
        assert!(Aggregator::aggregate_by_day(&[]).is_empty());
    }

    #[test]
    fn test_daily_sorted_ascending() {
        let records = vec![
            make_record((2024, 1, 20), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 10), "claude", "m1", 200, 100, 0.02),
            make_record((2024, 1, 15), "claude", "m1", 150, 75, 0.015),
        ];

        let daily = Aggregator::aggregate_by_day(&records);

        assert_eq!(daily.len(), 3);
        assert_eq!(daily[0].date, date(2024, 1, 10));
        assert_eq!(daily[1].date, date(2024, 1, 15));
        assert_eq!(daily[2].date, date(2024, 1, 20));
    }

    #[test]
    fn test_daily_one_breakdown_per_model() {
        let records = vec![
            make_record((2024, 1, 15), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 15), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 15), "claude", "m2", 200, 100, 0.02),
        ];

        let daily = Aggregator::aggregate_by_day(&records);

        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].model_breakdowns.len(), 2);
        assert_eq!(daily[0].models_used, vec!["m1", "m2"]);
        let m1 = &daily[0].model_breakdowns[0];
        assert_eq!(m1.input_tokens, 200);
        assert!((m1.cost - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_daily_totals_equal_breakdown_sums() {
        let records = vec![
            make_record((2024, 1, 15), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 15), "codex", "m2", 200, 100, 0.02),
            make_record((2024, 1, 16), "claude", "m1", 300, 150, 0.03),
        ];

        for day in Aggregator::aggregate_by_day(&records) {
            let token_sum: u64 = day
                .model_breakdowns
                .iter()
                .map(ModelBreakdown::total_tokens)
                .sum();
            let cost_sum: f64 = day.model_breakdowns.iter().map(|b| b.cost).sum();
            assert_eq!(day.total_tokens, token_sum);
            assert!((day.total_cost - cost_sum).abs() < 1e-12);
        }
    }

    #[test]
    fn test_aggregation_sum_invariant() {
        let records = vec![
            make_record((2024, 1, 15), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 15), "codex", "m2", 200, 100, 0.02),
            make_record((2024, 1, 17), "gemini", "m3", 300, 150, 0.04),
        ];

        let daily = Aggregator::aggregate_by_day(&records);

        let daily_cost: f64 = daily.iter().map(|d| d.total_cost).sum();
        let record_cost: f64 = records.iter().map(|r| r.cost).sum();
        assert!((daily_cost - record_cost).abs() < 1e-12);

        let daily_input: u64 = daily.iter().map(|d| d.input_tokens).sum();
        let record_input: u64 = records.iter().map(|r| r.input_tokens).sum();
        assert_eq!(daily_input, record_input);

        let daily_output: u64 = daily.iter().map(|d| d.output_tokens).sum();
        let record_output: u64 = records.iter().map(|r| r.output_tokens).sum();
        assert_eq!(daily_output, record_output);
    }

    // ========== summarize ==========

    #[test]
    fn test_summary_rows_sorted_by_cost_then_tokens() {
        let records = vec![
            make_record((2024, 1, 15), "claude", "cheap", 1000, 0, 0.01),
            make_record((2024, 1, 15), "claude", "pricey", 10, 0, 0.50),
            // Same cost as "cheap" but more tokens: ranks above it
            make_record((2024, 1, 15), "claude", "chatty", 5000, 0, 0.01),
        ];
        let daily = Aggregator::aggregate_by_day(&records);

        let summary = Aggregator::summarize(&records, &daily);

        let names: Vec<&str> = summary.models.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["pricey", "chatty", "cheap"]);
    }

    #[test]
    fn test_summary_provider_alias_canonicalization() {
        let records = vec![
            make_record((2024, 1, 15), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 16), "claude-code", "m1", 200, 100, 0.02),
        ];
        let daily = Aggregator::aggregate_by_day(&records);

        let summary = Aggregator::summarize(&records, &daily);

        assert_eq!(summary.providers.len(), 1);
        let row = &summary.providers[0];
        assert_eq!(row.name, "claude");
        assert_eq!(row.message_count, 2);
        assert_eq!(row.active_days, 2);
        assert!((row.total_cost - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_summary_active_days_per_group() {
        let records = vec![
            make_record((2024, 1, 15), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 15), "claude", "m1", 100, 50, 0.01),
            make_record((2024, 1, 17), "codex", "m2", 100, 50, 0.01),
        ];
        let daily = Aggregator::aggregate_by_day(&records);

        let summary = Aggregator::summarize(&records, &daily);

        let claude = summary.providers.iter().find(|r| r.name == "claude").unwrap();
        assert_eq!(claude.active_days, 1);
        assert_eq!(claude.message_count, 2);
    }

    #[test]
    fn test_summary_zero_days_safe_averages() {
        let summary = Aggregator::summarize(&[], &[]);

        assert_eq!(summary.total_days, 0);
        assert!((summary.avg_daily_cost - 0.0).abs() < f64::EPSILON);
        assert!((summary.avg_daily_tokens - 0.0).abs() < f64::EPSILON);
        assert!(summary.avg_daily_cost.is_finite());
    }

    #[test]
    fn test_end_to_end_two_records_three_days() {
        let records = vec![
            make_record((2024, 1, 1), "p1", "m1", 100, 60, 0.25),
            make_record((2024, 1, 2), "p1", "m1", 70, 40, 0.25),
        ];

        let daily = Aggregator::aggregate_by_day(&records);
        let filled = Aggregator::fill_gaps(daily, date(2024, 1, 1), date(2024, 1, 3));
        let summary = Aggregator::summarize(&records, &filled);

        assert_eq!(filled.len(), 3);
        assert_eq!(filled[2].total_tokens, 0);
        assert!((summary.total_cost - 0.5).abs() < 1e-12);
        assert_eq!(summary.active_days, 2);
        assert_eq!(summary.total_days, 3);
        assert!((summary.avg_daily_cost - 0.5 / 3.0).abs() < 1e-9);
    }

    // ========== fill_gaps ==========

    #[test]
    fn test_fill_gaps_totality() {
        let daily = vec![DailyUsage::empty(date(2024, 2, 27))];

        let filled = Aggregator::fill_gaps(daily, date(2024, 2, 26), date(2024, 3, 2));

        // 2024 is a leap year: Feb 26..Mar 2 inclusive is 6 days
        assert_eq!(filled.len(), 6);
        let dates: Vec<NaiveDate> = filled.iter().map(|d| d.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 2, 26),
                date(2024, 2, 27),
                date(2024, 2, 28),
                date(2024, 2, 29),
                date(2024, 3, 1),
                date(2024, 3, 2),
            ]
        );
    }

    #[test]
    fn test_fill_gaps_single_day_range() {
        let filled = Aggregator::fill_gaps(Vec::new(), date(2024, 1, 1), date(2024, 1, 1));
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].date, date(2024, 1, 1));
    }

    #[test]
    fn test_fill_gaps_reuses_existing_entries() {
        let records = vec![make_record((2024, 1, 2), "claude", "m1", 100, 50, 0.01)];
        let daily = Aggregator::aggregate_by_day(&records);

        let filled = Aggregator::fill_gaps(daily, date(2024, 1, 1), date(2024, 1, 3));

        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].total_tokens, 0);
        assert_eq!(filled[1].input_tokens, 100);
        assert_eq!(filled[1].models_used, vec!["m1"]);
        assert_eq!(filled[2].total_tokens, 0);
    }

    #[test]
    fn test_fill_gaps_inverted_range_is_empty() {
        let filled = Aggregator::fill_gaps(Vec::new(), date(2024, 1, 5), date(2024, 1, 1));
        assert!(filled.is_empty());
    }

    // ========== canonical_provider ==========

    #[test]
    fn test_canonical_provider_alias() {
        assert_eq!(canonical_provider("claude-code"), "claude");
        assert_eq!(canonical_provider("github-copilot-enterprise"), "github-copilot");
    }

    #[test]
    fn test_canonical_provider_passthrough() {
        assert_eq!(canonical_provider("claude"), "claude");
        assert_eq!(canonical_provider("someone-else"), "someone-else");
    }
}
