//! Tiered pricing resolution
//!
//! Cost lookup tries the remote pricing catalog first (cached on disk),
//! then the built-in fallback table, then degrades to zero cost.
//! Resolution never fails: an unknown model prices at $0.

use crate::services::normalizer::normalize_model_name;
use crate::types::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Remote pricing catalog URL
const CATALOG_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Catalog cache TTL in seconds (1 hour)
const CACHE_TTL_SECS: i64 = 3600;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Token counts handed to the resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_write: u64,
    pub cache_read: u64,
}

/// Which pricing tier supplied an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Primary,
    Fallback,
    None,
}

/// Itemized cost result from a detailed resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_write_cost: f64,
    pub cache_read_cost: f64,
    pub total: f64,
    pub source: PriceSource,
}

impl CostBreakdown {
    fn unpriced() -> Self {
        Self {
            input_cost: 0.0,
            output_cost: 0.0,
            cache_write_cost: 0.0,
            cache_read_cost: 0.0,
            total: 0.0,
            source: PriceSource::None,
        }
    }
}

/// The four per-million-token rates for a model, without usage applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceRates {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_write_per_mtok: f64,
    pub cache_read_per_mtok: f64,
}

/// Per-model entry in the remote catalog.
///
/// Cache rates are kept as raw JSON values: the catalog encodes them as a
/// plain number, a numeric string, or a tiered object carrying a `base`
/// field depending on the model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogPrice {
    #[serde(default)]
    pub input_cost_per_token: Option<f64>,
    #[serde(default)]
    pub output_cost_per_token: Option<f64>,
    #[serde(default)]
    pub cache_creation_input_token_cost: Option<Value>,
    #[serde(default)]
    pub cache_read_input_token_cost: Option<Value>,
}

/// Cached catalog data
#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogCache {
    /// Unix timestamp when the catalog was fetched
    pub fetched_at: i64,
    pub models: HashMap<String, CatalogPrice>,
}

impl CatalogCache {
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        now - self.fetched_at > CACHE_TTL_SECS
    }
}

/// The primary pricing tier: a remote catalog, cached on disk
pub struct PricingCatalog {
    cache: CatalogCache,
    #[allow(dead_code)]
    cache_path: PathBuf,
}

impl PricingCatalog {
    /// Load from cache or fetch fresh data, at the given cache path
    pub fn with_cache_path(cache_path: PathBuf) -> Result<Self> {
        let cache = Self::load_or_fetch_cache(&cache_path)?;
        Ok(Self { cache, cache_path })
    }

    /// Prefer cache, refresh if expired or corrupt. Returns None only if
    /// no cache exists AND the network fetch fails.
    pub fn from_cache_only(cache_path: PathBuf) -> Option<Self> {
        match Self::load_cache(&cache_path) {
            Ok(cache) if !cache.is_expired() => Some(Self { cache, cache_path }),
            Ok(cache) => {
                if let Ok(fresh) = Self::fetch_catalog() {
                    let _ = Self::save_cache(&cache_path, &fresh);
                    Some(Self {
                        cache: fresh,
                        cache_path,
                    })
                } else {
                    Some(Self { cache, cache_path })
                }
            }
            Err(_) => {
                if let Ok(fresh) = Self::fetch_catalog() {
                    let _ = Self::save_cache(&cache_path, &fresh);
                    Some(Self {
                        cache: fresh,
                        cache_path,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Build a catalog directly from in-memory entries (for testing)
    #[cfg(test)]
    pub fn from_models(models: HashMap<String, CatalogPrice>) -> Self {
        Self {
            cache: CatalogCache {
                fetched_at: 0,
                models,
            },
            cache_path: PathBuf::new(),
        }
    }

    fn load_or_fetch_cache(cache_path: &PathBuf) -> Result<CatalogCache> {
        if let Ok(cache) = Self::load_cache(cache_path) {
            if !cache.is_expired() {
                return Ok(cache);
            }
            if let Ok(fresh) = Self::fetch_catalog() {
                let _ = Self::save_cache(cache_path, &fresh);
                return Ok(fresh);
            }
            // Fetch failed, use expired cache
            return Ok(cache);
        }

        let cache = Self::fetch_catalog()
            .map_err(|e| LedgerError::Pricing(format!("failed to fetch catalog: {}", e)))?;
        let _ = Self::save_cache(cache_path, &cache);
        Ok(cache)
    }

    fn load_cache(cache_path: &PathBuf) -> Result<CatalogCache> {
        let content = fs::read_to_string(cache_path)?;
        let cache: CatalogCache = serde_json::from_str(&content)
            .map_err(|e| LedgerError::Pricing(format!("invalid catalog cache: {}", e)))?;
        Ok(cache)
    }

    fn save_cache(cache_path: &PathBuf, cache: &CatalogCache) -> Result<()> {
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(cache)
            .map_err(|e| LedgerError::Pricing(format!("serialization failed: {}", e)))?;
        fs::write(cache_path, content)?;
        Ok(())
    }

    fn fetch_catalog() -> std::result::Result<CatalogCache, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| format!("HTTP client error: {}", e))?;

        let response = client
            .get(CATALOG_URL)
            .send()
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let models: HashMap<String, CatalogPrice> = response
            .json()
            .map_err(|e| format!("JSON parse error: {}", e))?;

        let fetched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(CatalogCache { fetched_at, models })
    }

    /// Catalog entry for a model (exact match first, then normalized name)
    pub fn get(&self, model: &str) -> Option<&CatalogPrice> {
        if let Some(price) = self.cache.models.get(model) {
            return Some(price);
        }
        let normalized = normalize_model_name(model);
        if normalized != model {
            return self.cache.models.get(&normalized);
        }
        None
    }

    #[allow(dead_code)]
    pub fn model_count(&self) -> usize {
        self.cache.models.len()
    }
}

/// Static fallback rate entry, per million tokens
#[derive(Debug, Clone, Copy)]
pub struct FallbackPrice {
    pub model: &'static str,
    pub provider: Option<&'static str>,
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_write_per_mtok: f64,
    pub cache_read_per_mtok: f64,
}

/// Curated rates for models the catalog may not know. Order matters:
/// the substring pass takes the first matching entry.
pub const FALLBACK_PRICES: &[FallbackPrice] = &[
    FallbackPrice {
        model: "claude-opus-4",
        provider: None,
        input_per_mtok: 15.0,
        output_per_mtok: 75.0,
        cache_write_per_mtok: 18.75,
        cache_read_per_mtok: 1.5,
    },
    FallbackPrice {
        model: "claude-sonnet-4",
        provider: None,
        input_per_mtok: 3.0,
        output_per_mtok: 15.0,
        cache_write_per_mtok: 3.75,
        cache_read_per_mtok: 0.3,
    },
    FallbackPrice {
        model: "claude-haiku-4",
        provider: None,
        input_per_mtok: 0.8,
        output_per_mtok: 4.0,
        cache_write_per_mtok: 1.0,
        cache_read_per_mtok: 0.08,
    },
    FallbackPrice {
        model: "gpt-5-codex",
        provider: Some("codex"),
        input_per_mtok: 1.25,
        output_per_mtok: 10.0,
        cache_write_per_mtok: 0.0,
        cache_read_per_mtok: 0.125,
    },
    FallbackPrice {
        model: "gpt-5",
        provider: None,
        input_per_mtok: 1.25,
        output_per_mtok: 10.0,
        cache_write_per_mtok: 0.0,
        cache_read_per_mtok: 0.125,
    },
    FallbackPrice {
        model: "gpt-5-mini",
        provider: None,
        input_per_mtok: 0.25,
        output_per_mtok: 2.0,
        cache_write_per_mtok: 0.0,
        cache_read_per_mtok: 0.025,
    },
    FallbackPrice {
        model: "gemini-2.5-pro",
        provider: None,
        input_per_mtok: 1.25,
        output_per_mtok: 10.0,
        cache_write_per_mtok: 0.0,
        cache_read_per_mtok: 0.31,
    },
    FallbackPrice {
        model: "gemini-2.5-flash",
        provider: None,
        input_per_mtok: 0.3,
        output_per_mtok: 2.5,
        cache_write_per_mtok: 0.0,
        cache_read_per_mtok: 0.075,
    },
    FallbackPrice {
        model: "qwen3-coder",
        provider: Some("dashscope"),
        input_per_mtok: 1.0,
        output_per_mtok: 5.0,
        cache_write_per_mtok: 0.0,
        cache_read_per_mtok: 0.1,
    },
];

/// Exact-match index over the fallback table, plus the ordered entries
/// for the substring pass. Built once per resolver; no runtime mutation.
struct FallbackTable {
    by_model_provider: HashMap<(String, String), usize>,
    by_model: HashMap<String, usize>,
    entries: &'static [FallbackPrice],
}

impl FallbackTable {
    fn new(entries: &'static [FallbackPrice]) -> Self {
        let mut by_model_provider = HashMap::new();
        let mut by_model = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(provider) = entry.provider {
                by_model_provider
                    .entry((entry.model.to_string(), provider.to_string()))
                    .or_insert(idx);
            }
            by_model.entry(entry.model.to_string()).or_insert(idx);
        }
        Self {
            by_model_provider,
            by_model,
            entries,
        }
    }

    /// Exact (model, provider) -> exact model -> case-insensitive
    /// substring in either direction, first entry wins.
    fn lookup(&self, model: &str, provider_hint: Option<&str>) -> Option<&FallbackPrice> {
        if let Some(provider) = provider_hint {
            if let Some(&idx) = self
                .by_model_provider
                .get(&(model.to_string(), provider.to_string()))
            {
                return Some(&self.entries[idx]);
            }
        }
        if let Some(&idx) = self.by_model.get(model) {
            return Some(&self.entries[idx]);
        }
        let query = model.to_ascii_lowercase();
        self.entries.iter().find(|entry| {
            let candidate = entry.model.to_ascii_lowercase();
            candidate.contains(&query) || query.contains(&candidate)
        })
    }
}

/// Reduce a catalog rate to a plain number: plain numbers and numeric
/// strings pass through, tiered objects contribute their `base` field,
/// anything else prices at zero.
fn coerce_rate(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Object(map)) => map
            .get("base")
            .map(|base| coerce_rate(Some(base)))
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Tiered cost resolver: catalog, then fallback table, then zero
pub struct PricingResolver {
    catalog: Option<PricingCatalog>,
    fallback: FallbackTable,
}

impl PricingResolver {
    pub fn new(catalog: Option<PricingCatalog>) -> Self {
        Self {
            catalog,
            fallback: FallbackTable::new(FALLBACK_PRICES),
        }
    }

    /// Resolve total cost for one record's usage. Never fails.
    pub fn resolve_cost(
        &self,
        model: &str,
        counts: TokenCounts,
        provider_hint: Option<&str>,
    ) -> f64 {
        self.resolve_cost_detailed(model, counts, provider_hint).total
    }

    /// Itemized resolution, reporting which tier supplied the answer.
    pub fn resolve_cost_detailed(
        &self,
        model: &str,
        counts: TokenCounts,
        provider_hint: Option<&str>,
    ) -> CostBreakdown {
        if model.trim().is_empty() {
            return CostBreakdown::unpriced();
        }

        if let Some(entry) = self.catalog.as_ref().and_then(|c| c.get(model)) {
            return Self::price_from_catalog(entry, counts);
        }

        if let Some(entry) = self.fallback.lookup(model, provider_hint) {
            return Self::price_from_fallback(entry, counts);
        }

        CostBreakdown::unpriced()
    }

    /// The four per-million rates for a model, without usage applied.
    pub fn rates_for(&self, model: &str, provider_hint: Option<&str>) -> Option<PriceRates> {
        if model.trim().is_empty() {
            return None;
        }
        if let Some(entry) = self.catalog.as_ref().and_then(|c| c.get(model)) {
            return Some(PriceRates {
                input_per_mtok: entry.input_cost_per_token.unwrap_or(0.0) * 1e6,
                output_per_mtok: entry.output_cost_per_token.unwrap_or(0.0) * 1e6,
                cache_write_per_mtok: coerce_rate(entry.cache_creation_input_token_cost.as_ref())
                    * 1e6,
                cache_read_per_mtok: coerce_rate(entry.cache_read_input_token_cost.as_ref()) * 1e6,
            });
        }
        self.fallback
            .lookup(model, provider_hint)
            .map(|entry| PriceRates {
                input_per_mtok: entry.input_per_mtok,
                output_per_mtok: entry.output_per_mtok,
                cache_write_per_mtok: entry.cache_write_per_mtok,
                cache_read_per_mtok: entry.cache_read_per_mtok,
            })
    }

    /// Base cost from the catalog's input/output rates, augmented with
    /// cache costs when cache tokens are present.
    fn price_from_catalog(entry: &CatalogPrice, counts: TokenCounts) -> CostBreakdown {
        let input_cost = counts.input as f64 * entry.input_cost_per_token.unwrap_or(0.0);
        let output_cost = counts.output as f64 * entry.output_cost_per_token.unwrap_or(0.0);

        let cache_write_cost = if counts.cache_write > 0 {
            counts.cache_write as f64 * coerce_rate(entry.cache_creation_input_token_cost.as_ref())
        } else {
            0.0
        };
        let cache_read_cost = if counts.cache_read > 0 {
            counts.cache_read as f64 * coerce_rate(entry.cache_read_input_token_cost.as_ref())
        } else {
            0.0
        };

        CostBreakdown {
            input_cost,
            output_cost,
            cache_write_cost,
            cache_read_cost,
            total: input_cost + output_cost + cache_write_cost + cache_read_cost,
            source: PriceSource::Primary,
        }
    }

    fn price_from_fallback(entry: &FallbackPrice, counts: TokenCounts) -> CostBreakdown {
        let input_cost = counts.input as f64 / 1e6 * entry.input_per_mtok;
        let output_cost = counts.output as f64 / 1e6 * entry.output_per_mtok;
        let cache_write_cost = counts.cache_write as f64 / 1e6 * entry.cache_write_per_mtok;
        let cache_read_cost = counts.cache_read as f64 / 1e6 * entry.cache_read_per_mtok;

        CostBreakdown {
            input_cost,
            output_cost,
            cache_write_cost,
            cache_read_cost,
            total: input_cost + output_cost + cache_write_cost + cache_read_cost,
            source: PriceSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn counts(input: u64, output: u64, cache_write: u64, cache_read: u64) -> TokenCounts {
        TokenCounts {
            input,
            output,
            cache_write,
            cache_read,
        }
    }

    fn catalog_with_sonnet() -> PricingCatalog {
        let mut models = HashMap::new();
        models.insert(
            "claude-sonnet-4".to_string(),
            CatalogPrice {
                input_cost_per_token: Some(0.000003),
                output_cost_per_token: Some(0.000015),
                cache_creation_input_token_cost: Some(json!(0.00000375)),
                cache_read_input_token_cost: Some(json!(0.0000003)),
            },
        );
        PricingCatalog::from_models(models)
    }

    // ========== tier precedence ==========

    #[test]
    fn test_primary_tier_wins_over_fallback() {
        // claude-sonnet-4 exists in both the catalog and the fallback table
        let resolver = PricingResolver::new(Some(catalog_with_sonnet()));

        let detailed =
            resolver.resolve_cost_detailed("claude-sonnet-4", counts(1000, 500, 0, 0), None);

        assert_eq!(detailed.source, PriceSource::Primary);
        // 1000 * 0.000003 + 500 * 0.000015 = 0.003 + 0.0075
        assert!((detailed.total - 0.0105).abs() < 1e-10);
    }

    #[test]
    fn test_fallback_tier_when_catalog_misses() {
        let resolver = PricingResolver::new(None);

        let detailed =
            resolver.resolve_cost_detailed("claude-sonnet-4", counts(1_000_000, 0, 0, 0), None);

        assert_eq!(detailed.source, PriceSource::Fallback);
        assert!((detailed.total - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_unknown_model_degrades_to_zero() {
        let resolver = PricingResolver::new(None);

        let detailed =
            resolver.resolve_cost_detailed("totally-unknown-xyz", counts(1000, 500, 0, 0), None);

        assert_eq!(detailed.source, PriceSource::None);
        assert!((detailed.total - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_blank_model_skips_lookup() {
        let resolver = PricingResolver::new(Some(catalog_with_sonnet()));

        assert_eq!(
            resolver
                .resolve_cost_detailed("  ", counts(1000, 500, 0, 0), None)
                .source,
            PriceSource::None
        );
        assert!((resolver.resolve_cost("", counts(1000, 500, 0, 0), None) - 0.0).abs()
            < f64::EPSILON);
    }

    // ========== catalog pricing ==========

    #[test]
    fn test_catalog_cache_augmentation() {
        let resolver = PricingResolver::new(Some(catalog_with_sonnet()));

        // input=1000, output=500, cache_write=100, cache_read=200
        // 0.003 + 0.0075 + 100*0.00000375 + 200*0.0000003 = 0.010935
        let detailed =
            resolver.resolve_cost_detailed("claude-sonnet-4", counts(1000, 500, 100, 200), None);

        assert!((detailed.total - 0.010935).abs() < 1e-10);
        assert!((detailed.cache_write_cost - 0.000375).abs() < 1e-12);
        assert!((detailed.cache_read_cost - 0.00006).abs() < 1e-12);
    }

    #[test]
    fn test_catalog_string_encoded_cache_rate() {
        let mut models = HashMap::new();
        models.insert(
            "oddball-model".to_string(),
            CatalogPrice {
                input_cost_per_token: Some(0.000001),
                output_cost_per_token: Some(0.000002),
                cache_creation_input_token_cost: Some(json!("0.0000005")),
                cache_read_input_token_cost: None,
            },
        );
        let resolver = PricingResolver::new(Some(PricingCatalog::from_models(models)));

        let detailed =
            resolver.resolve_cost_detailed("oddball-model", counts(0, 0, 1_000_000, 0), None);

        assert_eq!(detailed.source, PriceSource::Primary);
        assert!((detailed.cache_write_cost - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_catalog_tiered_cache_rate_uses_base() {
        let mut models = HashMap::new();
        models.insert(
            "tiered-model".to_string(),
            CatalogPrice {
                input_cost_per_token: Some(0.000001),
                output_cost_per_token: None,
                cache_creation_input_token_cost: None,
                cache_read_input_token_cost: Some(json!({"base": 0.0000001, "above_200k": 0.0000002})),
            },
        );
        let resolver = PricingResolver::new(Some(PricingCatalog::from_models(models)));

        let detailed =
            resolver.resolve_cost_detailed("tiered-model", counts(0, 0, 0, 1_000_000), None);

        assert!((detailed.cache_read_cost - 0.1).abs() < 1e-10);
    }

    #[test]
    fn test_unrecognized_cache_rate_prices_zero() {
        let mut models = HashMap::new();
        models.insert(
            "weird-model".to_string(),
            CatalogPrice {
                input_cost_per_token: Some(0.000001),
                output_cost_per_token: None,
                cache_creation_input_token_cost: Some(json!([1, 2, 3])),
                cache_read_input_token_cost: Some(json!("not-a-number")),
            },
        );
        let resolver = PricingResolver::new(Some(PricingCatalog::from_models(models)));

        let detailed = resolver.resolve_cost_detailed("weird-model", counts(0, 0, 100, 100), None);

        assert!((detailed.cache_write_cost - 0.0).abs() < f64::EPSILON);
        assert!((detailed.cache_read_cost - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_catalog_normalized_name_lookup() {
        let resolver = PricingResolver::new(Some(catalog_with_sonnet()));

        // Date-suffixed variant resolves via the normalized name
        let detailed = resolver.resolve_cost_detailed(
            "claude-sonnet-4-20250514",
            counts(1000, 500, 0, 0),
            None,
        );

        assert_eq!(detailed.source, PriceSource::Primary);
    }

    // ========== fallback table ==========

    #[test]
    fn test_fallback_provider_scoped_match_first() {
        let resolver = PricingResolver::new(None);

        let scoped = resolver.rates_for("gpt-5-codex", Some("codex")).unwrap();
        assert!((scoped.input_per_mtok - 1.25).abs() < 1e-10);
    }

    #[test]
    fn test_fallback_substring_either_direction() {
        let resolver = PricingResolver::new(None);

        // Query longer than entry: "claude-opus-4-1-20250805" contains "claude-opus-4"
        let a = resolver.resolve_cost_detailed(
            "claude-opus-4-1-20250805",
            counts(1_000_000, 0, 0, 0),
            None,
        );
        assert_eq!(a.source, PriceSource::Fallback);
        assert!((a.total - 15.0).abs() < 1e-10);

        // Entry longer than query: "gemini-2.5" is contained in "gemini-2.5-pro"
        let b = resolver.resolve_cost_detailed("gemini-2.5", counts(1_000_000, 0, 0, 0), None);
        assert_eq!(b.source, PriceSource::Fallback);
        assert!((b.total - 1.25).abs() < 1e-10);
    }

    #[test]
    fn test_fallback_substring_is_order_stable() {
        let resolver = PricingResolver::new(None);

        // "gpt-5-codex" and "gpt-5" both substring-match "gpt-5-codex-max";
        // the first table entry must win on every call.
        let first = resolver.resolve_cost_detailed("gpt-5-codex-max", counts(1_000_000, 0, 0, 0), None);
        for _ in 0..10 {
            let again =
                resolver.resolve_cost_detailed("gpt-5-codex-max", counts(1_000_000, 0, 0, 0), None);
            assert_eq!(again, first);
        }
        assert!((first.total - 1.25).abs() < 1e-10);
    }

    #[test]
    fn test_fallback_case_insensitive() {
        let resolver = PricingResolver::new(None);

        let detailed =
            resolver.resolve_cost_detailed("Claude-Sonnet-4", counts(1_000_000, 0, 0, 0), None);

        assert_eq!(detailed.source, PriceSource::Fallback);
    }

    #[test]
    fn test_fallback_cost_formula() {
        let resolver = PricingResolver::new(None);

        // claude-sonnet-4: $3/$15/$3.75/$0.30 per 1M
        let detailed = resolver.resolve_cost_detailed(
            "claude-sonnet-4",
            counts(2_000_000, 1_000_000, 400_000, 10_000_000),
            None,
        );

        // 6 + 15 + 1.5 + 3
        assert!((detailed.total - 25.5).abs() < 1e-9);
    }

    // ========== rates_for ==========

    #[test]
    fn test_rates_for_catalog_converts_to_per_million() {
        let resolver = PricingResolver::new(Some(catalog_with_sonnet()));

        let rates = resolver.rates_for("claude-sonnet-4", None).unwrap();

        assert!((rates.input_per_mtok - 3.0).abs() < 1e-9);
        assert!((rates.output_per_mtok - 15.0).abs() < 1e-9);
        assert!((rates.cache_write_per_mtok - 3.75).abs() < 1e-9);
        assert!((rates.cache_read_per_mtok - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_rates_for_unknown_model_none() {
        let resolver = PricingResolver::new(None);
        assert!(resolver.rates_for("totally-unknown-xyz", None).is_none());
        assert!(resolver.rates_for("", None).is_none());
    }

    // ========== catalog cache persistence ==========

    #[test]
    fn test_cache_load_and_save() {
        let temp_dir = TempDir::new().unwrap();
        let cache_path = temp_dir.path().join("catalog.json");

        let mut models = HashMap::new();
        models.insert(
            "test-model".to_string(),
            CatalogPrice {
                input_cost_per_token: Some(0.001),
                output_cost_per_token: Some(0.002),
                cache_creation_input_token_cost: None,
                cache_read_input_token_cost: None,
            },
        );
        let cache = CatalogCache {
            fetched_at: 12345,
            models,
        };

        PricingCatalog::save_cache(&cache_path, &cache).unwrap();
        let loaded = PricingCatalog::load_cache(&cache_path).unwrap();

        assert_eq!(loaded.fetched_at, 12345);
        assert!(loaded.models.contains_key("test-model"));
    }

    #[test]
    fn test_cache_is_expired_after_ttl() {
        let old = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            - CACHE_TTL_SECS
            - 1;
        let cache = CatalogCache {
            fetched_at: old,
            models: HashMap::new(),
        };
        assert!(cache.is_expired());
    }

    #[test]
    fn test_cache_is_valid_within_ttl() {
        let recent = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            - 1800;
        let cache = CatalogCache {
            fetched_at: recent,
            models: HashMap::new(),
        };
        assert!(!cache.is_expired());
    }

    #[test]
    fn test_with_cache_path_loads_fresh_cache_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let cache_path = temp_dir.path().join("catalog.json");

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let mut models = HashMap::new();
        models.insert("test-model".to_string(), CatalogPrice::default());
        let cache = CatalogCache {
            fetched_at: now,
            models,
        };
        fs::write(&cache_path, serde_json::to_string(&cache).unwrap()).unwrap();

        // Unexpired cache loads without touching the network
        let catalog = PricingCatalog::with_cache_path(cache_path).unwrap();
        assert_eq!(catalog.model_count(), 1);
    }

    #[test]
    fn test_from_cache_only_uses_expired_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache_path = temp_dir.path().join("catalog.json");

        let mut models = HashMap::new();
        models.insert("test-model".to_string(), CatalogPrice::default());
        let cache = CatalogCache {
            fetched_at: 0,
            models,
        };
        fs::write(&cache_path, serde_json::to_string(&cache).unwrap()).unwrap();

        // Expired cache still yields a catalog (refreshed when the
        // network is reachable, the stale copy otherwise)
        let catalog = PricingCatalog::from_cache_only(cache_path);
        assert!(catalog.is_some());
    }
}
