use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use super::{
    sources::{PriceQuote, PriceSource, PriceSourceKind},
    tokens::TokenInfo,
};
use crate::{
    config::{BSC, ETHEREUM},
    errors::Result,
};

const ETHEREUM_RATES: &[(&str, f64)] = &[
    ("ETH", 3200.0),
    ("WETH", 3200.0),
    ("USDC", 1.0),
    ("USDT", 1.0),
    ("DAI", 1.0),
    ("WBTC", 65000.0),
    ("UNI", 10.0),
    ("COMP", 50.0),
    ("stETH", 3200.0),
    ("UERII", 0.001),
];

const BSC_RATES: &[(&str, f64)] = &[
    ("BNB", 650.0),
    ("WBNB", 650.0),
    ("USDT", 1.0),
    ("BUSD", 1.0),
    ("CAKE", 2.5),
];

/// Last-resort USD rates keyed by (chain, symbol). Immutable once handed to the oracle.
#[derive(Debug, Clone, Default)]
pub struct FallbackTable {
    rates: HashMap<(u64, String), f64>,
}

impl FallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for (chain_id, rates) in [(ETHEREUM, ETHEREUM_RATES), (BSC, BSC_RATES)] {
            for (symbol, price) in rates {
                table.insert(chain_id, symbol, *price);
            }
        }
        table
    }

    pub fn insert(&mut self, chain_id: u64, symbol: &str, price_usd: f64) {
        self.rates.insert((chain_id, symbol.to_uppercase()), price_usd);
    }

    pub fn get(&self, chain_id: u64, symbol: &str) -> Option<f64> {
        self.rates.get(&(chain_id, symbol.to_uppercase())).copied()
    }

    pub fn chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.rates.keys().map(|(chain, _)| *chain).collect();
        chains.sort_unstable();
        chains.dedup();
        chains
    }

    pub fn entries(&self, chain_id: u64) -> BTreeMap<String, f64> {
        self.rates
            .iter()
            .filter(|((chain, _), _)| *chain == chain_id)
            .map(|((_, symbol), price)| (symbol.clone(), *price))
            .collect()
    }
}

#[async_trait]
impl PriceSource for FallbackTable {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Fallback
    }

    async fn try_price(&self, token: &TokenInfo, block: Option<u64>) -> Result<Option<PriceQuote>> {
        Ok(self
            .get(token.chain_id, &token.symbol)
            .map(|price| PriceQuote::new(PriceSourceKind::Fallback, price, block)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::tokens::TokenRegistry;

    #[test]
    fn test_default_rates() {
        let table = FallbackTable::with_defaults();
        assert_eq!(table.get(ETHEREUM, "steth"), Some(3200.0));
        assert_eq!(table.get(BSC, "CAKE"), Some(2.5));
        assert_eq!(table.get(BSC, "WBTC"), None);
        assert_eq!(table.chains(), vec![ETHEREUM, BSC]);
        assert_eq!(table.entries(BSC).len(), 5);
    }

    #[tokio::test]
    async fn test_every_rate_ranks_below_live_sources() {
        let table = FallbackTable::with_defaults();
        let tokens = TokenRegistry::with_defaults();

        for chain_id in table.chains() {
            for symbol in table.entries(chain_id).keys() {
                let token = tokens.by_symbol(chain_id, symbol).unwrap();
                for block in [None, Some(18_000_000)] {
                    let quote = table.try_price(token, block).await.unwrap().unwrap();
                    for live in [
                        PriceSourceKind::Chainlink,
                        PriceSourceKind::Dex,
                        PriceSourceKind::Coingecko,
                    ] {
                        assert!(quote.confidence < live.confidence(block.is_some()));
                    }
                }
            }
        }
    }
}
