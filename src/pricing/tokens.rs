use ethers::types::Address;
use serde::Serialize;
use std::collections::HashMap;

use crate::{
    config::{AVALANCHE, BSC, ETHEREUM},
    utils::{address_literal, is_native_alias, parse_address},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub chain_id: u64,
    /// `None` for the chain's gas currency.
    pub address: Option<Address>,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Chainlink USD aggregator.
    pub price_feed: Option<Address>,
    pub coingecko_id: Option<String>,
}

impl TokenInfo {
    pub fn is_native(&self) -> bool {
        self.address.is_none()
    }
}

// (symbol, name, address, decimals, chainlink feed, coingecko id); an empty address marks the native coin
type TokenRow = (
    &'static str,
    &'static str,
    &'static str,
    u8,
    Option<&'static str>,
    Option<&'static str>,
);

const ETHEREUM_TOKENS: &[TokenRow] = &[
    ("ETH", "Ethereum", "", 18, Some("0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"), Some("ethereum")),
    ("WETH", "Wrapped Ether", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", 18, Some("0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"), Some("ethereum")),
    ("USDC", "USD Coin", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6, Some("0x8fFfFfd4AfB6115b954Bd326cbe7B4BA576818f6"), Some("usd-coin")),
    ("USDT", "Tether USD", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6, Some("0x3E7d1eAB13ad0104d2750B8863b489D65364e32D"), Some("tether")),
    ("DAI", "Dai Stablecoin", "0x6B175474E89094C44Da98b954EedeAC495271d0F", 18, Some("0xAed0c38402d20D9df45C7C74C061f3f8a1e9e8D1"), Some("dai")),
    ("WBTC", "Wrapped Bitcoin", "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", 8, Some("0xF4030086522a5bEEa4988F8cA5B36dbC97BeE88c"), Some("wrapped-bitcoin")),
    ("UNI", "Uniswap", "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", 18, Some("0x553303d460EE0afB37EdFf9bE42922D8FF63220e"), Some("uniswap")),
    ("COMP", "Compound", "0xc00e94Cb662C3520282E6f5717214004A7f26888", 18, Some("0xdbd020CAeF83eFd542f4De03e3cF0C28A4428bd5"), Some("compound-governance-token")),
    ("stETH", "Lido Staked ETH", "0xae7ab96520DE3A18E5e111B5EaAb095312D7fE84", 18, Some("0xCfE54B5cD566aB89272946F602D76Ea879CAb4a8"), Some("staked-ether")),
    ("UERII", "UERII Token", "0x418C24191aE947A78C99fDc0e45a1f96Afb254BE", 6, None, Some("uerii")),
];

const BSC_TOKENS: &[TokenRow] = &[
    ("BNB", "BNB", "", 18, Some("0x0567F2323251f0Aab15c8dFb1967E4e8A7D42aeE"), Some("binancecoin")),
    ("WBNB", "Wrapped BNB", "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c", 18, Some("0x0567F2323251f0Aab15c8dFb1967E4e8A7D42aeE"), Some("binancecoin")),
    ("USDT", "Tether USD", "0x55d398326f99059fF775485246999027B3197955", 18, Some("0xB97Ad0E74fa7d920791E90258A6E2085088b4320"), Some("tether")),
    ("BUSD", "Binance USD", "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56", 18, Some("0xcBb98864Ef56E9042e7d2efef76141f15731B82f"), Some("binance-usd")),
    ("CAKE", "PancakeSwap Token", "0x0E09FaBB73Bd3Ade0a17ECC321fD13a19e81cE82", 18, Some("0xB6064eD41d4f67e353768aA239cA86f4F73665a1"), Some("pancakeswap-token")),
];

const AVALANCHE_TOKENS: &[TokenRow] = &[
    ("AVAX", "Avalanche", "", 18, None, Some("avalanche-2")),
    ("WAVAX", "Wrapped AVAX", "0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7", 18, None, Some("avalanche-2")),
];

/// Static token metadata per chain. Symbol lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<u64, Vec<TokenInfo>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (chain_id, rows) in [
            (ETHEREUM, ETHEREUM_TOKENS),
            (BSC, BSC_TOKENS),
            (AVALANCHE, AVALANCHE_TOKENS),
        ] {
            for row in rows {
                registry.insert(token_from_row(chain_id, row));
            }
        }
        registry
    }

    /// Adds a token, replacing any entry with the same symbol on that chain.
    pub fn insert(&mut self, token: TokenInfo) {
        let tokens = self.tokens.entry(token.chain_id).or_default();
        tokens.retain(|t| !t.symbol.eq_ignore_ascii_case(&token.symbol));
        tokens.push(token);
    }

    pub fn all(&self, chain_id: u64) -> &[TokenInfo] {
        self.tokens.get(&chain_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_symbol(&self, chain_id: u64, symbol: &str) -> Option<&TokenInfo> {
        self.all(chain_id)
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn native(&self, chain_id: u64) -> Option<&TokenInfo> {
        self.all(chain_id).iter().find(|t| t.is_native())
    }

    /// Token at `address`; gas-currency placeholder addresses resolve to the native coin.
    pub fn by_address(&self, chain_id: u64, address: &Address) -> Option<&TokenInfo> {
        if is_native_alias(address) {
            return self.native(chain_id);
        }
        self.all(chain_id)
            .iter()
            .find(|t| t.address.as_ref() == Some(address))
    }

    pub fn resolve(&self, chain_id: u64, address: &str) -> Option<&TokenInfo> {
        let address = parse_address(address).ok()?;
        self.by_address(chain_id, &address)
    }

    pub fn base_currency(&self, chain_id: u64) -> Option<&str> {
        self.native(chain_id).map(|t| t.symbol.as_str())
    }

    /// Tokens sampled by the accuracy audit.
    pub fn accuracy_basket(&self, chain_id: u64) -> Vec<&TokenInfo> {
        let symbols: &[&str] = match chain_id {
            ETHEREUM => &["ETH", "USDC", "USDT"],
            BSC => &["BNB", "USDT", "BUSD"],
            _ => &[],
        };
        if symbols.is_empty() {
            return self.native(chain_id).into_iter().collect();
        }
        symbols
            .iter()
            .filter_map(|s| self.by_symbol(chain_id, s))
            .collect()
    }
}

fn token_from_row(chain_id: u64, row: &TokenRow) -> TokenInfo {
    let (symbol, name, address, decimals, feed, coingecko_id) = *row;
    TokenInfo {
        chain_id,
        address: (!address.is_empty()).then(|| address_literal(address)),
        symbol: symbol.to_string(),
        name: name.to_string(),
        decimals,
        price_feed: feed.map(address_literal),
        coingecko_id: coingecko_id.map(str::to_string),
    }
}
