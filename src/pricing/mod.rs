use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use crate::{
    metrics,
    utils::{normalize, parse_address},
};

pub mod cache;
pub mod fallback;
pub mod sources;
pub mod tokens;

use cache::{CacheStats, PriceCache, PriceCacheEntry};
use fallback::FallbackTable;
use sources::{PriceQuote, PriceSource, PriceSourceKind};
use tokens::{TokenInfo, TokenRegistry};

/// Result-map key for a caller-supplied address. Unparsable input is kept as given.
fn address_key(raw: &str) -> String {
    parse_address(raw).map_or_else(|_| raw.to_string(), |address| normalize(&address))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceResult {
    pub price_usd: f64,
    pub confidence: f64,
    pub source: PriceSourceKind,
    pub timestamp: i64,
    pub block_number: Option<u64>,
    pub token_symbol: String,
    pub chain_id: u64,
}

impl PriceResult {
    fn from_entry(entry: PriceCacheEntry, token: &TokenInfo) -> Self {
        Self {
            price_usd: entry.price_usd,
            confidence: entry.confidence,
            source: entry.source,
            timestamp: entry.timestamp,
            block_number: entry.block_number,
            token_symbol: token.symbol.clone(),
            chain_id: token.chain_id,
        }
    }

    fn to_entry(&self) -> PriceCacheEntry {
        PriceCacheEntry {
            price_usd: self.price_usd,
            source: self.source,
            confidence: self.confidence,
            timestamp: self.timestamp,
            cached_at: chrono::Utc::now().timestamp(),
            token_symbol: self.token_symbol.clone(),
            chain_id: self.chain_id,
            block_number: self.block_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceComparison {
    pub prices: BTreeMap<PriceSourceKind, f64>,
    pub average: f64,
    pub variance: f64,
    /// Largest relative distance from the average, in percent.
    pub max_deviation_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub chain_id: u64,
    pub block_number: Option<u64>,
    pub timestamp: i64,
    pub source_comparison: BTreeMap<String, SourceComparison>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleStats {
    pub cache: CacheStats,
    pub sources: Vec<PriceSourceKind>,
    pub fallback_chains: Vec<u64>,
}

/// Cascading USD price lookup: cache, then each source in tier order, fallback table last.
pub struct PricingOracle {
    tokens: Arc<TokenRegistry>,
    cache: Arc<PriceCache>,
    sources: Vec<Arc<dyn PriceSource>>,
    fallback_chains: Vec<u64>,
    source_timeout: Duration,
}

impl PricingOracle {
    pub fn new(
        tokens: Arc<TokenRegistry>,
        cache: Arc<PriceCache>,
        mut live_sources: Vec<Arc<dyn PriceSource>>,
        fallback: FallbackTable,
        source_timeout: Duration,
    ) -> Self {
        live_sources.retain(|s| s.kind() != PriceSourceKind::Fallback);
        live_sources.sort_by_key(|s| s.kind());
        let fallback_chains = fallback.chains();
        live_sources.push(Arc::new(fallback));

        Self {
            tokens,
            cache,
            sources: live_sources,
            fallback_chains,
            source_timeout,
        }
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub async fn get_token_price(
        &self,
        token_address: &str,
        chain_id: u64,
        block: Option<u64>,
    ) -> Option<PriceResult> {
        let Some(token) = self.tokens.resolve(chain_id, token_address) else {
            warn!("Unknown token {} on chain {}", token_address, chain_id);
            metrics::record_price_unavailable();
            return None;
        };
        self.price_token(token, block).await
    }

    pub async fn get_token_price_by_symbol(
        &self,
        symbol: &str,
        chain_id: u64,
        block: Option<u64>,
    ) -> Option<PriceResult> {
        let Some(token) = self.tokens.by_symbol(chain_id, symbol) else {
            warn!("Unknown token symbol {} on chain {}", symbol, chain_id);
            metrics::record_price_unavailable();
            return None;
        };
        self.price_token(token, block).await
    }

    async fn price_token(&self, token: &TokenInfo, block: Option<u64>) -> Option<PriceResult> {
        if let Some(entry) = self.cache.get(token.chain_id, &token.symbol, block) {
            metrics::record_cache_lookup(true);
            debug!("Cache hit for {} on chain {}", token.symbol, token.chain_id);
            return Some(PriceResult::from_entry(entry, token));
        }
        metrics::record_cache_lookup(false);

        for source in &self.sources {
            let Some(quote) = self.attempt(source.as_ref(), token, block).await else {
                continue;
            };

            let result = PriceResult {
                price_usd: quote.price_usd,
                confidence: quote.confidence,
                source: source.kind(),
                timestamp: quote
                    .observed_at
                    .unwrap_or_else(|| chrono::Utc::now().timestamp()),
                block_number: block,
                token_symbol: token.symbol.clone(),
                chain_id: token.chain_id,
            };
            self.cache.set(result.to_entry());
            metrics::record_price_source(source.kind().as_str());
            debug!(
                "{} priced at ${} by {}",
                token.symbol,
                result.price_usd,
                source.kind().as_str()
            );
            return Some(result);
        }

        warn!("No price for {} on chain {}", token.symbol, token.chain_id);
        metrics::record_price_unavailable();
        None
    }

    /// One tier, bounded by the source timeout. Every failure reads as "no price".
    async fn attempt(
        &self,
        source: &dyn PriceSource,
        token: &TokenInfo,
        block: Option<u64>,
    ) -> Option<PriceQuote> {
        let kind = source.kind().as_str();
        match tokio::time::timeout(self.source_timeout, source.try_price(token, block)).await {
            Ok(Ok(Some(quote))) if quote.price_usd.is_finite() && quote.price_usd >= 0.0 => Some(quote),
            Ok(Ok(Some(quote))) => {
                warn!("{} returned invalid price {} for {}", kind, quote.price_usd, token.symbol);
                None
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                debug!("{} failed for {}: {}", kind, token.symbol, e);
                None
            }
            Err(_) => {
                warn!("{} timed out for {} after {:?}", kind, token.symbol, self.source_timeout);
                None
            }
        }
    }

    pub async fn convert_token_to_usd(
        &self,
        token_address: &str,
        amount: f64,
        chain_id: u64,
        block: Option<u64>,
    ) -> Option<f64> {
        self.get_token_price(token_address, chain_id, block)
            .await
            .map(|price| price.price_usd * amount)
    }

    /// USD value per lowercase address. An unavailable price counts as `0.0`.
    pub async fn convert_tokens_to_usd(
        &self,
        amounts: &BTreeMap<String, f64>,
        chain_id: u64,
        block: Option<u64>,
    ) -> BTreeMap<String, f64> {
        let lookups = amounts.iter().map(|(address, amount)| async move {
            let value = self.convert_token_to_usd(address, *amount, chain_id, block).await;
            if value.is_none() {
                warn!("No USD value for {} on chain {}, counting 0", address, chain_id);
            }
            (address_key(address), value.unwrap_or(0.0))
        });
        join_all(lookups).await.into_iter().collect()
    }

    pub async fn get_base_currency_price(&self, chain_id: u64, block: Option<u64>) -> Option<PriceResult> {
        let native = self.tokens.native(chain_id)?;
        self.price_token(native, block).await
    }

    /// Value of `amount` of the token expressed in the chain's native coin.
    pub async fn normalize_to_base_currency(
        &self,
        token_address: &str,
        amount: f64,
        chain_id: u64,
        block: Option<u64>,
    ) -> Option<f64> {
        let usd_value = self
            .convert_token_to_usd(token_address, amount, chain_id, block)
            .await?;
        let base = self.get_base_currency_price(chain_id, block).await?;
        if base.price_usd <= 0.0 {
            return None;
        }
        Some(usd_value / base.price_usd)
    }

    /// Prices for every resolvable address; the rest are left out.
    pub async fn get_multiple_token_prices(
        &self,
        token_addresses: &[String],
        chain_id: u64,
        block: Option<u64>,
    ) -> BTreeMap<String, PriceResult> {
        let lookups = token_addresses.iter().map(|address| async move {
            let price = self.get_token_price(address, chain_id, block).await;
            (address_key(address), price)
        });
        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(address, price)| price.map(|p| (address, p)))
            .collect()
    }

    /// Prices every registry token of the chain. Returns how many resolved.
    pub async fn warmup_cache(&self, chain_id: u64, block: Option<u64>) -> usize {
        let tokens = self.tokens.all(chain_id);
        info!("Warming price cache for {} tokens on chain {}", tokens.len(), chain_id);

        let priced = join_all(tokens.iter().map(|token| self.price_token(token, block)))
            .await
            .into_iter()
            .flatten()
            .count();

        info!("Price cache warmed for chain {}: {}/{}", chain_id, priced, tokens.len());
        priced
    }

    pub fn cache_stats(&self) -> OracleStats {
        OracleStats {
            cache: self.cache.stats(),
            sources: self.sources.iter().map(|s| s.kind()).collect(),
            fallback_chains: self.fallback_chains.clone(),
        }
    }

    pub fn clear_cache(&self, chain_id: Option<u64>) {
        self.cache.clear(chain_id);
    }

    /// Queries every tier separately for a fixed basket and compares the answers.
    /// Nothing is written to the cache.
    pub async fn validate_pricing_accuracy(&self, chain_id: u64, block: Option<u64>) -> AccuracyReport {
        let mut source_comparison = BTreeMap::new();

        for token in self.tokens.accuracy_basket(chain_id) {
            let quotes = join_all(self.sources.iter().map(|source| async move {
                (source.kind(), self.attempt(source.as_ref(), token, block).await)
            }))
            .await;

            let prices: BTreeMap<PriceSourceKind, f64> = quotes
                .into_iter()
                .filter_map(|(kind, quote)| quote.map(|q| (kind, q.price_usd)))
                .collect();

            if let Some(comparison) = compare_prices(prices) {
                source_comparison.insert(token.symbol.clone(), comparison);
            }
        }

        AccuracyReport {
            chain_id,
            block_number: block,
            timestamp: chrono::Utc::now().timestamp(),
            source_comparison,
        }
    }
}

fn compare_prices(prices: BTreeMap<PriceSourceKind, f64>) -> Option<SourceComparison> {
    if prices.is_empty() {
        return None;
    }
    let n = prices.len() as f64;
    let average = prices.values().sum::<f64>() / n;
    let variance = prices.values().map(|p| (p - average).powi(2)).sum::<f64>() / n;
    let max_deviation_pct = if average > 0.0 {
        prices
            .values()
            .map(|p| (p - average).abs() / average * 100.0)
            .fold(0.0, f64::max)
    } else {
        0.0
    };

    Some(SourceComparison {
        prices,
        average,
        variance,
        max_deviation_pct,
    })
}
