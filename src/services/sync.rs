//! Sync orchestration
//!
//! Walks the provider registry, normalizes what each provider yields,
//! and upserts the batch. A failing provider is reported and the rest
//! proceed; a failing storage transaction aborts the whole run.

use crate::providers::{ProviderRegistry, UsageProvider};
use crate::services::normalizer::RecordNormalizer;
use crate::services::pricing::{PricingResolver, TokenCounts};
use crate::store::Store;
use crate::types::{LedgerError, Result};
use chrono::Utc;

/// Result of syncing one provider
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub provider: String,
    pub inserted: usize,
    pub skipped: usize,
    pub error: Option<String>,
}

/// Sync every registered provider into the store.
///
/// Provider fetch failures become warnings and outcomes with an error
/// message; storage failures propagate and abort the run with the
/// current transaction rolled back.
pub fn sync_all(
    registry: &ProviderRegistry,
    resolver: &PricingResolver,
    store: &mut Store,
) -> Result<Vec<SyncOutcome>> {
    let mut outcomes = Vec::new();
    for provider in registry.providers() {
        match sync_provider(provider.as_ref(), resolver, store) {
            Ok(outcome) => outcomes.push(outcome),
            Err(LedgerError::Storage(e)) => return Err(LedgerError::Storage(e)),
            Err(e) => {
                eprintln!("[tokledger] Warning: {} failed: {}", provider.name(), e);
                outcomes.push(SyncOutcome {
                    provider: provider.name().to_string(),
                    inserted: 0,
                    skipped: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Ok(outcomes)
}

/// Sync a single provider: fetch, normalize, upsert, record sync state.
pub fn sync_provider(
    provider: &dyn UsageProvider,
    resolver: &PricingResolver,
    store: &mut Store,
) -> Result<SyncOutcome> {
    let batch = provider.fetch()?;
    if batch.is_empty() {
        // Environment not installed or no sessions yet; leave sync
        // state untouched
        return Ok(SyncOutcome {
            provider: provider.name().to_string(),
            inserted: 0,
            skipped: 0,
            error: None,
        });
    }

    let mut normalizer = RecordNormalizer::new(resolver);
    let (records, skips) = normalizer.normalize_batch(provider.name(), batch);

    let inserted = store.upsert(&records)?;
    store.record_sync(
        provider.name(),
        Utc::now().timestamp_millis(),
        records.last().map(|r| r.id.as_str()),
    )?;

    Ok(SyncOutcome {
        provider: provider.name().to_string(),
        inserted,
        skipped: skips.len(),
        error: None,
    })
}

/// Recompute stored costs with the current pricing tiers.
///
/// Default mode touches only records whose cost is still zero; `force`
/// reprices everything. All updates commit in one transaction; returns
/// the number of records whose stored cost actually changed.
pub fn recalculate_costs(
    store: &mut Store,
    resolver: &PricingResolver,
    force: bool,
) -> Result<usize> {
    let records = store.all_records()?;

    let mut updates = Vec::new();
    for record in &records {
        if !force && record.cost != 0.0 {
            continue;
        }
        let counts = TokenCounts {
            input: record.input_tokens,
            output: record.output_tokens,
            cache_write: record.cache_write_tokens,
            cache_read: record.cache_read_tokens,
        };
        let cost = resolver.resolve_cost(&record.model, counts, Some(&record.provider));
        if cost != record.cost {
            updates.push((record.id.clone(), cost));
        }
    }

    store.update_costs(&updates)
}
