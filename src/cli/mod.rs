use crate::providers::ProviderRegistry;
use crate::services::export::{flat_report, per_provider_report};
use crate::services::pricing::{PricingCatalog, PricingResolver};
use crate::services::sync::{recalculate_costs, sync_all};
use crate::services::Aggregator;
use crate::store::{Store, WriteLock};
use crate::types::UsageRecord;
use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Usage and cost ledger for AI coding CLIs
#[derive(Parser)]
#[command(name = "tokledger")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest usage from all installed providers
    Sync,

    /// Show the daily usage report
    Daily {
        /// Range start (YYYY-MM-DD); defaults to the earliest stored date
        #[arg(long)]
        since: Option<String>,
        /// Range end (YYYY-MM-DD); defaults to the latest stored date
        #[arg(long)]
        until: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the usage summary with provider and model rankings
    Summary {
        /// Range start (YYYY-MM-DD); defaults to the earliest stored date
        #[arg(long)]
        since: Option<String>,
        /// Range end (YYYY-MM-DD); defaults to the latest stored date
        #[arg(long)]
        until: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute stored costs with current pricing
    Recalc {
        /// Reprice every record, not only the unpriced ones
        #[arg(long)]
        force: bool,
    },

    /// Preview the per-million rates for a model
    Pricing {
        /// Model name to look up
        model: String,
        /// Provider hint for the fallback table
        #[arg(long)]
        provider: Option<String>,
    },

    /// Export reports as JSON
    Export {
        /// Range start (YYYY-MM-DD); defaults to the earliest stored date
        #[arg(long)]
        since: Option<String>,
        /// Range end (YYYY-MM-DD); defaults to the latest stored date
        #[arg(long)]
        until: Option<String>,
        /// Partition the report by provider
        #[arg(long)]
        by_provider: bool,
    },
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Sync => run_sync(),
            Commands::Daily { since, until, json } => run_daily(since, until, json),
            Commands::Summary { since, until, json } => run_summary(since, until, json),
            Commands::Recalc { force } => run_recalc(force),
            Commands::Pricing { model, provider } => run_pricing(&model, provider.as_deref()),
            Commands::Export {
                since,
                until,
                by_provider,
            } => run_export(since, until, by_provider),
        }
    }
}

fn data_dir() -> anyhow::Result<PathBuf> {
    let base = directories::BaseDirs::new().context("could not determine home directory")?;
    Ok(base.home_dir().join(".tokledger"))
}

fn open_store() -> anyhow::Result<Store> {
    let dir = data_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(Store::open(dir.join("usage.db"))?)
}

/// Cache-first resolver for read-only commands.
fn build_resolver() -> anyhow::Result<PricingResolver> {
    let catalog = PricingCatalog::from_cache_only(data_dir()?.join("pricing.json"));
    if catalog.is_none() {
        eprintln!("[tokledger] Warning: pricing catalog unavailable, using fallback rates");
    }
    Ok(PricingResolver::new(catalog))
}

/// Resolver for mutating commands: persisted costs deserve a refreshed
/// catalog, so try load-or-fetch before settling for the cache.
fn build_resolver_fresh() -> anyhow::Result<PricingResolver> {
    let cache_path = data_dir()?.join("pricing.json");
    let catalog = match PricingCatalog::with_cache_path(cache_path.clone()) {
        Ok(catalog) => Some(catalog),
        Err(_) => PricingCatalog::from_cache_only(cache_path),
    };
    if catalog.is_none() {
        eprintln!("[tokledger] Warning: pricing catalog unavailable, using fallback rates");
    }
    Ok(PricingResolver::new(catalog))
}

fn parse_date(value: &str) -> anyhow::Result<NaiveDate> {
    value
        .parse::<NaiveDate>()
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", value))
}

/// Explicit flags win; otherwise the range spans the stored data, or
/// today when the table is empty.
fn resolve_range(
    records: &[UsageRecord],
    since: Option<String>,
    until: Option<String>,
) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let today = Local::now().date_naive();
    let start = match since {
        Some(s) => parse_date(&s)?,
        None => records.iter().map(|r| r.date).min().unwrap_or(today),
    };
    let end = match until {
        Some(s) => parse_date(&s)?,
        None => records.iter().map(|r| r.date).max().unwrap_or(today),
    };
    if start > end {
        bail!("range start {} is after range end {}", start, end);
    }
    Ok((start, end))
}

fn run_sync() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let _lock = WriteLock::acquire(&dir)?;

    let registry = ProviderRegistry::new();
    let resolver = build_resolver_fresh()?;
    let mut store = open_store()?;

    let outcomes = sync_all(&registry, &resolver, &mut store)?;

    let mut succeeded = 0usize;
    for outcome in &outcomes {
        match &outcome.error {
            Some(reason) => println!("{:<10} failed: {}", outcome.provider, reason),
            None => {
                succeeded += 1;
                println!(
                    "{:<10} {} records ({} skipped)",
                    outcome.provider, outcome.inserted, outcome.skipped
                );
            }
        }
    }

    if succeeded == 0 && !outcomes.is_empty() {
        bail!("every provider failed to sync");
    }
    println!("{} records in the ledger", store.count_records()?);
    Ok(())
}

fn run_daily(since: Option<String>, until: Option<String>, json: bool) -> anyhow::Result<()> {
    let store = open_store()?;
    let all = store.all_records()?;
    let (start, end) = resolve_range(&all, since, until)?;

    let records = store.query_by_date_range(start, end)?;
    let daily = Aggregator::aggregate_by_day(&records);
    let filled = Aggregator::fill_gaps(daily, start, end);

    if json {
        println!("{}", serde_json::to_string_pretty(&flat_report(filled))?);
        return Ok(());
    }

    println!(
        "{:<12} {:>12} {:>12} {:>12} {:>12} {:>10}  {}",
        "Date", "Input", "Output", "Cache W", "Cache R", "Cost", "Models"
    );
    for day in &filled {
        println!(
            "{:<12} {:>12} {:>12} {:>12} {:>12} {:>10.4}  {}",
            day.date.to_string(),
            day.input_tokens,
            day.output_tokens,
            day.cache_write_tokens,
            day.cache_read_tokens,
            day.total_cost,
            day.models_used.join(", ")
        );
    }
    Ok(())
}

fn run_summary(since: Option<String>, until: Option<String>, json: bool) -> anyhow::Result<()> {
    let store = open_store()?;
    let all = store.all_records()?;
    let (start, end) = resolve_range(&all, since, until)?;

    let records = store.query_by_date_range(start, end)?;
    let daily = Aggregator::aggregate_by_day(&records);
    let filled = Aggregator::fill_gaps(daily, start, end);
    let summary = Aggregator::summarize(&records, &filled);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Range        {} .. {}", start, end);
    println!("Messages     {}", summary.message_count);
    println!("Tokens       {}", summary.total_tokens);
    println!("Cost         ${:.4}", summary.total_cost);
    println!(
        "Days         {} active / {} total (avg ${:.4}/day)",
        summary.active_days, summary.total_days, summary.avg_daily_cost
    );

    println!("\n{:<24} {:>10} {:>14} {:>10} {:>8}", "Provider", "Msgs", "Tokens", "Cost", "Days");
    for row in &summary.providers {
        println!(
            "{:<24} {:>10} {:>14} {:>10.4} {:>8}",
            row.name, row.message_count, row.total_tokens, row.total_cost, row.active_days
        );
    }

    println!("\n{:<24} {:>10} {:>14} {:>10} {:>8}", "Model", "Msgs", "Tokens", "Cost", "Days");
    for row in &summary.models {
        println!(
            "{:<24} {:>10} {:>14} {:>10.4} {:>8}",
            row.name, row.message_count, row.total_tokens, row.total_cost, row.active_days
        );
    }
    Ok(())
}

fn run_recalc(force: bool) -> anyhow::Result<()> {
    let dir = data_dir()?;
    let _lock = WriteLock::acquire(&dir)?;

    let resolver = build_resolver_fresh()?;
    let mut store = open_store()?;

    let updated = recalculate_costs(&mut store, &resolver, force)?;
    println!("{} records repriced", updated);
    Ok(())
}

fn run_pricing(model: &str, provider: Option<&str>) -> anyhow::Result<()> {
    let resolver = build_resolver()?;

    match resolver.rates_for(model, provider) {
        Some(rates) => {
            println!("{:<14} ${:>10.4} / 1M tokens", "input", rates.input_per_mtok);
            println!("{:<14} ${:>10.4} / 1M tokens", "output", rates.output_per_mtok);
            println!(
                "{:<14} ${:>10.4} / 1M tokens",
                "cache write", rates.cache_write_per_mtok
            );
            println!(
                "{:<14} ${:>10.4} / 1M tokens",
                "cache read", rates.cache_read_per_mtok
            );
        }
        None => println!("no pricing known for '{}'", model),
    }
    Ok(())
}

fn run_export(
    since: Option<String>,
    until: Option<String>,
    by_provider: bool,
) -> anyhow::Result<()> {
    let store = open_store()?;
    let all = store.all_records()?;
    let (start, end) = resolve_range(&all, since, until)?;

    let records = store.query_by_date_range(start, end)?;

    if by_provider {
        let reports = per_provider_report(&records, start, end);
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        let daily = Aggregator::aggregate_by_day(&records);
        let filled = Aggregator::fill_gaps(daily, start, end);
        println!("{}", serde_json::to_string_pretty(&flat_report(filled))?);
    }
    Ok(())
}
