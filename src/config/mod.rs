use anyhow::{anyhow, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr, time::Duration};
use url::Url;

use crate::{errors::SnapshotError, utils::address_literal};

pub const ETHEREUM: u64 = 1;
pub const BSC: u64 = 56;
pub const AVALANCHE: u64 = 43114;

const LEGACY_ETHERSCAN_API: &str = "https://api.etherscan.io/api";
const UNIFIED_ETHERSCAN_API: &str = "https://api.etherscan.io/v2/api";
const ROUTESCAN_AVALANCHE_API: &str =
    "https://api.routescan.io/v2/network/mainnet/evm/43114/etherscan/api";

/// Static per-chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub explorer_url: String,
    /// Multi-chain explorer API that takes an explicit `chainid` parameter.
    pub unified_explorer: bool,
    pub explorer_api_key: Option<String>,
    pub native_symbol: String,
    pub wrapped_native: Address,
    pub avg_block_time_secs: f64,
    /// (block, unix timestamp) pair used to estimate timestamps when the node cannot answer.
    pub block_time_anchor: Option<(u64, i64)>,
}

impl ChainConfig {
    pub fn uses_unified_explorer(&self) -> bool {
        self.unified_explorer
    }

    pub fn explorer_key(&self) -> Result<&str, SnapshotError> {
        match self.explorer_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(SnapshotError::Configuration(format!(
                "missing explorer API key for chain {}",
                self.chain_id
            ))),
        }
    }

    /// Estimates the timestamp of `block` from the configured anchor.
    pub fn estimate_timestamp(&self, block: u64) -> Option<i64> {
        let (anchor_block, anchor_ts) = self.block_time_anchor?;
        let delta = block as f64 - anchor_block as f64;
        Some(anchor_ts + (delta * self.avg_block_time_secs) as i64)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.rpc_url)
            .map_err(|e| anyhow!("chain {}: invalid rpc url {}: {}", self.chain_id, self.rpc_url, e))?;
        Url::parse(&self.explorer_url).map_err(|e| {
            anyhow!("chain {}: invalid explorer url {}: {}", self.chain_id, self.explorer_url, e)
        })?;
        if self.native_symbol.is_empty() {
            return Err(anyhow!("chain {}: missing native token symbol", self.chain_id));
        }
        if self.wrapped_native.is_zero() {
            return Err(anyhow!("chain {}: missing wrapped native token", self.chain_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, ChainConfig>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ethereum, BSC and Avalanche with public RPC endpoints.
    pub fn with_defaults(explorer_api_key: Option<String>) -> Self {
        let mut registry = Self::new();

        registry.insert(ChainConfig {
            chain_id: ETHEREUM,
            name: "ethereum".to_string(),
            rpc_url: "https://ethereum-rpc.publicnode.com".to_string(),
            explorer_url: LEGACY_ETHERSCAN_API.to_string(),
            unified_explorer: false,
            explorer_api_key: explorer_api_key.clone(),
            native_symbol: "ETH".to_string(),
            wrapped_native: address_literal("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            avg_block_time_secs: 12.0,
            // merge block
            block_time_anchor: Some((15_537_394, 1_663_224_179)),
        });
        registry.insert(ChainConfig {
            chain_id: BSC,
            name: "bsc".to_string(),
            rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            explorer_url: UNIFIED_ETHERSCAN_API.to_string(),
            unified_explorer: true,
            explorer_api_key: explorer_api_key.clone(),
            native_symbol: "BNB".to_string(),
            wrapped_native: address_literal("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"),
            avg_block_time_secs: 3.0,
            block_time_anchor: None,
        });
        registry.insert(ChainConfig {
            chain_id: AVALANCHE,
            name: "avalanche".to_string(),
            rpc_url: "https://api.avax.network/ext/bc/C/rpc".to_string(),
            explorer_url: ROUTESCAN_AVALANCHE_API.to_string(),
            unified_explorer: true,
            explorer_api_key,
            native_symbol: "AVAX".to_string(),
            wrapped_native: address_literal("B31f66AA3C1e785363F0875A1B74E27b85FD66c7"),
            avg_block_time_secs: 2.0,
            block_time_anchor: None,
        });

        registry
    }

    pub fn insert(&mut self, config: ChainConfig) {
        self.chains.insert(config.chain_id, config);
    }

    pub fn get(&self, chain_id: u64) -> Result<&ChainConfig, SnapshotError> {
        self.chains
            .get(&chain_id)
            .ok_or_else(|| SnapshotError::unsupported_chain(chain_id))
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values()
    }

    pub fn set_rpc_url(&mut self, chain_id: u64, rpc_url: String) {
        if let Some(chain) = self.chains.get_mut(&chain_id) {
            chain.rpc_url = rpc_url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(anyhow!("chain registry is empty"));
        }
        for chain in self.chains.values() {
            chain.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub rpc_timeout: Duration,
    pub http_timeout: Duration,
    pub price_source_timeout: Duration,
    pub max_concurrency: usize,
    pub cache_max_age: Duration,
    /// JSON snapshot of the price cache, loaded at startup and written back on exit.
    pub price_cache_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(15),
            http_timeout: Duration::from_secs(30),
            price_source_timeout: Duration::from_secs(20),
            max_concurrency: 16,
            cache_max_age: Duration::from_secs(24 * 60 * 60),
            price_cache_path: None,
            metrics_port: None,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(anyhow!("max concurrency must be at least 1"));
        }
        if self.rpc_timeout.is_zero() || self.http_timeout.is_zero() || self.price_source_timeout.is_zero() {
            return Err(anyhow!("timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// Everything the binary needs, read from the environment.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub chains: ChainRegistry,
    pub runtime: RuntimeConfig,
    pub coingecko_api_key: Option<String>,
}

impl SnapshotConfig {
    pub fn from_env() -> Result<Self> {
        let mut chains = ChainRegistry::with_defaults(env_string("ETHERSCAN_API_KEY"));
        for (var, chain_id) in [
            ("ETHEREUM_RPC_URL", ETHEREUM),
            ("BSC_RPC_URL", BSC),
            ("AVALANCHE_RPC_URL", AVALANCHE),
        ] {
            if let Some(url) = env_string(var) {
                chains.set_rpc_url(chain_id, url);
            }
        }

        let mut runtime = RuntimeConfig::default();
        if let Some(ms) = env_parse::<u64>("SNAPSHOT_RPC_TIMEOUT_MS")? {
            runtime.rpc_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("SNAPSHOT_HTTP_TIMEOUT_MS")? {
            runtime.http_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("SNAPSHOT_SOURCE_TIMEOUT_MS")? {
            runtime.price_source_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("SNAPSHOT_MAX_CONCURRENCY")? {
            runtime.max_concurrency = n;
        }
        if let Some(secs) = env_parse::<u64>("SNAPSHOT_PRICE_CACHE_MAX_AGE_SECS")? {
            runtime.cache_max_age = Duration::from_secs(secs);
        }
        runtime.price_cache_path = env_string("SNAPSHOT_PRICE_CACHE_PATH").map(PathBuf::from);
        runtime.metrics_port = env_parse::<u16>("SNAPSHOT_METRICS_PORT")?;

        let config = Self {
            chains,
            runtime,
            coingecko_api_key: env_string("COINGECKO_API_KEY"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chains.validate()?;
        self.runtime.validate()
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid value for {}: {}", key, e)),
        None => Ok(None),
    }
}
