use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::tokens::TokenInfo;
use crate::errors::Result;

pub mod chainlink;
pub mod coingecko;
pub mod dex;

pub use chainlink::ChainlinkSource;
pub use coingecko::CoinGeckoSource;
pub use dex::{DexRoute, DexSource};

pub const CHAINLINK_LATEST_CONFIDENCE: f64 = 0.98;
pub const CHAINLINK_HISTORICAL_CONFIDENCE: f64 = 0.95;
pub const DEX_CONFIDENCE: f64 = 0.80;
pub const COINGECKO_LATEST_CONFIDENCE: f64 = 0.75;
pub const COINGECKO_HISTORICAL_CONFIDENCE: f64 = 0.70;
pub const FALLBACK_CONFIDENCE: f64 = 0.30;

/// Price tiers, declared in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceKind {
    Chainlink,
    Dex,
    Coingecko,
    Fallback,
}

impl PriceSourceKind {
    pub const ALL: [PriceSourceKind; 4] = [
        PriceSourceKind::Chainlink,
        PriceSourceKind::Dex,
        PriceSourceKind::Coingecko,
        PriceSourceKind::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSourceKind::Chainlink => "chainlink",
            PriceSourceKind::Dex => "dex",
            PriceSourceKind::Coingecko => "coingecko",
            PriceSourceKind::Fallback => "fallback",
        }
    }

    pub fn confidence(&self, historical: bool) -> f64 {
        match (self, historical) {
            (PriceSourceKind::Chainlink, false) => CHAINLINK_LATEST_CONFIDENCE,
            (PriceSourceKind::Chainlink, true) => CHAINLINK_HISTORICAL_CONFIDENCE,
            (PriceSourceKind::Dex, _) => DEX_CONFIDENCE,
            (PriceSourceKind::Coingecko, false) => COINGECKO_LATEST_CONFIDENCE,
            (PriceSourceKind::Coingecko, true) => COINGECKO_HISTORICAL_CONFIDENCE,
            (PriceSourceKind::Fallback, _) => FALLBACK_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price_usd: f64,
    pub confidence: f64,
    /// Unix seconds the source last updated this price, when it reports one.
    pub observed_at: Option<i64>,
}

impl PriceQuote {
    pub fn new(kind: PriceSourceKind, price_usd: f64, block: Option<u64>) -> Self {
        Self {
            price_usd,
            confidence: kind.confidence(block.is_some()),
            observed_at: None,
        }
    }

    pub fn observed_at(mut self, timestamp: i64) -> Self {
        self.observed_at = Some(timestamp);
        self
    }
}

/// One pricing tier. `Ok(None)` means the source has no price for this token.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn kind(&self) -> PriceSourceKind;

    async fn try_price(&self, token: &TokenInfo, block: Option<u64>) -> Result<Option<PriceQuote>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_strictly_orders_tiers() {
        let confidences = |kind: PriceSourceKind| [kind.confidence(false), kind.confidence(true)];

        for pair in PriceSourceKind::ALL.windows(2) {
            let higher = confidences(pair[0]);
            let lower = confidences(pair[1]);
            let min_higher = higher.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_lower = lower.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            assert!(min_higher > max_lower, "{:?} vs {:?}", pair[0], pair[1]);
        }

        for kind in PriceSourceKind::ALL {
            for c in confidences(kind) {
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(serde_json::to_string(&PriceSourceKind::Coingecko).unwrap(), "\"coingecko\"");
        assert_eq!(PriceSourceKind::Dex.as_str(), "dex");
        assert!(PriceSourceKind::Chainlink < PriceSourceKind::Fallback);
    }
}
