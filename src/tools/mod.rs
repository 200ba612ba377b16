use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Instant};

use crate::{
    abi::AbiInput,
    config::{ChainRegistry, SnapshotConfig},
    errors::{ErrorKind, Result, SnapshotError},
    ledger::{EthersLedger, LedgerClient},
    metrics,
    pricing::{
        cache::PriceCache,
        fallback::FallbackTable,
        sources::{dex::default_routes, ChainlinkSource, CoinGeckoSource, DexSource, PriceSource},
        tokens::TokenRegistry,
        PricingOracle,
    },
    source::{EtherscanClient, SourceFetcher},
    state::StateReader,
};

pub const SOURCE_FETCHER: &str = "source_code_fetcher";
pub const STATE_READER: &str = "state_reader_tool";
pub const PRICING_ORACLE: &str = "pricing_oracle";

/// Uniform envelope returned by every public operation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Seconds.
    pub execution_time: f64,
    pub tool_name: String,
}

impl ToolResult {
    pub fn ok(tool_name: &str, data: Value, execution_time: f64) -> Self {
        Self {
            success: true,
            data,
            error_message: None,
            error_kind: None,
            execution_time,
            tool_name: tool_name.to_string(),
        }
    }

    pub fn failed(tool_name: &str, message: String, kind: Option<ErrorKind>, execution_time: f64) -> Self {
        Self {
            success: false,
            data: Value::Object(Default::default()),
            error_message: Some(message),
            error_kind: kind,
            execution_time,
            tool_name: tool_name.to_string(),
        }
    }
}

async fn run<T, F>(tool_name: &str, operation: &str, fut: F) -> ToolResult
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let outcome = fut.await;
    let elapsed = start.elapsed();

    let result = match outcome {
        Ok(data) => match serde_json::to_value(data) {
            Ok(value) => ToolResult::ok(tool_name, value, elapsed.as_secs_f64()),
            Err(e) => ToolResult::failed(
                tool_name,
                format!("failed to serialise {} result: {}", operation, e),
                None,
                elapsed.as_secs_f64(),
            ),
        },
        Err(e) => {
            error!("{} {} failed: {}", tool_name, operation, e);
            ToolResult::failed(tool_name, e.to_string(), Some(e.kind()), elapsed.as_secs_f64())
        }
    };

    metrics::record_tool_call(tool_name, result.success, elapsed);
    result
}

/// Every snapshot operation behind the uniform envelope.
pub struct Toolkit {
    chains: Arc<ChainRegistry>,
    sources: SourceFetcher,
    state: StateReader,
    pricing: PricingOracle,
}

impl Toolkit {
    pub fn new(
        chains: Arc<ChainRegistry>,
        sources: SourceFetcher,
        state: StateReader,
        pricing: PricingOracle,
    ) -> Self {
        Self {
            chains,
            sources,
            state,
            pricing,
        }
    }

    /// Wires the ethers ledger, the Etherscan client and all price sources.
    pub fn from_config(config: &SnapshotConfig) -> anyhow::Result<Self> {
        let runtime = &config.runtime;
        let chains = Arc::new(config.chains.clone());
        let ledger: Arc<dyn LedgerClient> =
            Arc::new(EthersLedger::from_registry(&chains, runtime.rpc_timeout)?);
        let explorer = Arc::new(EtherscanClient::new(chains.clone(), runtime.http_timeout)?);

        let live_sources: Vec<Arc<dyn PriceSource>> = vec![
            Arc::new(ChainlinkSource::new(ledger.clone())),
            Arc::new(DexSource::new(ledger.clone(), default_routes())),
            Arc::new(CoinGeckoSource::new(
                runtime.http_timeout,
                config.coingecko_api_key.clone(),
                ledger.clone(),
                chains.clone(),
            )?),
        ];
        let cache = Arc::new(PriceCache::new(runtime.cache_max_age));
        if let Some(path) = runtime.price_cache_path.as_deref().filter(|p| p.exists()) {
            if let Err(e) = cache.load(path) {
                warn!("Ignoring unreadable price cache {}: {}", path.display(), e);
            }
        }
        let pricing = PricingOracle::new(
            Arc::new(TokenRegistry::with_defaults()),
            cache,
            live_sources,
            FallbackTable::with_defaults(),
            runtime.price_source_timeout,
        );

        info!("Toolkit ready for chains {:?}", chains.chain_ids());
        Ok(Self::new(
            chains.clone(),
            SourceFetcher::new(chains.clone(), explorer, ledger.clone()),
            StateReader::new(chains, ledger, runtime.max_concurrency),
            pricing,
        ))
    }

    pub fn pricing(&self) -> &PricingOracle {
        &self.pricing
    }

    pub async fn fetch_source(
        &self,
        chain_id: u64,
        address: &str,
        block: Option<u64>,
        resolve_proxies: bool,
    ) -> ToolResult {
        run(
            SOURCE_FETCHER,
            "fetch",
            self.sources.fetch(chain_id, address, block, resolve_proxies),
        )
        .await
    }

    pub async fn contract_metadata(&self, chain_id: u64, address: &str) -> ToolResult {
        run(
            SOURCE_FETCHER,
            "metadata",
            self.sources.get_contract_metadata(chain_id, address),
        )
        .await
    }

    pub async fn read_state(
        &self,
        chain_id: u64,
        address: &str,
        block: Option<u64>,
        abi: Option<&AbiInput>,
        specific_functions: &[String],
        include_common: bool,
    ) -> ToolResult {
        run(
            STATE_READER,
            "read",
            self.state
                .read(chain_id, address, block, abi, specific_functions, include_common),
        )
        .await
    }

    pub async fn read_storage_slots(
        &self,
        chain_id: u64,
        address: &str,
        slots: &[String],
        block: Option<u64>,
    ) -> ToolResult {
        run(
            STATE_READER,
            "storage",
            self.state.read_storage_slots(chain_id, address, slots, block),
        )
        .await
    }

    pub async fn get_token_balances(
        &self,
        chain_id: u64,
        token: &str,
        holders: &[String],
        block: Option<u64>,
    ) -> ToolResult {
        run(
            STATE_READER,
            "balances",
            self.state.get_token_balances(chain_id, token, holders, block),
        )
        .await
    }

    /// `data` is null when no source could price the token.
    pub async fn token_price(&self, chain_id: u64, token_address: &str, block: Option<u64>) -> ToolResult {
        run(PRICING_ORACLE, "price", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self.pricing.get_token_price(token_address, chain_id, block).await)
        })
        .await
    }

    pub async fn token_price_by_symbol(&self, chain_id: u64, symbol: &str, block: Option<u64>) -> ToolResult {
        run(PRICING_ORACLE, "price_by_symbol", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self.pricing.get_token_price_by_symbol(symbol, chain_id, block).await)
        })
        .await
    }

    pub async fn convert_token_to_usd(
        &self,
        chain_id: u64,
        token_address: &str,
        amount: f64,
        block: Option<u64>,
    ) -> ToolResult {
        run(PRICING_ORACLE, "convert", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self
                .pricing
                .convert_token_to_usd(token_address, amount, chain_id, block)
                .await)
        })
        .await
    }

    pub async fn convert_tokens_to_usd(
        &self,
        chain_id: u64,
        amounts: &BTreeMap<String, f64>,
        block: Option<u64>,
    ) -> ToolResult {
        run(PRICING_ORACLE, "convert_batch", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self.pricing.convert_tokens_to_usd(amounts, chain_id, block).await)
        })
        .await
    }

    pub async fn base_currency_price(&self, chain_id: u64, block: Option<u64>) -> ToolResult {
        run(PRICING_ORACLE, "base_currency", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self.pricing.get_base_currency_price(chain_id, block).await)
        })
        .await
    }

    pub async fn normalize_to_base_currency(
        &self,
        chain_id: u64,
        token_address: &str,
        amount: f64,
        block: Option<u64>,
    ) -> ToolResult {
        run(PRICING_ORACLE, "normalize", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self
                .pricing
                .normalize_to_base_currency(token_address, amount, chain_id, block)
                .await)
        })
        .await
    }

    pub async fn multiple_token_prices(
        &self,
        chain_id: u64,
        token_addresses: &[String],
        block: Option<u64>,
    ) -> ToolResult {
        run(PRICING_ORACLE, "price_batch", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self
                .pricing
                .get_multiple_token_prices(token_addresses, chain_id, block)
                .await)
        })
        .await
    }

    pub async fn warmup_cache(&self, chain_id: u64, block: Option<u64>) -> ToolResult {
        run(PRICING_ORACLE, "warmup", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self.pricing.warmup_cache(chain_id, block).await)
        })
        .await
    }

    pub async fn cache_stats(&self) -> ToolResult {
        run(PRICING_ORACLE, "cache_stats", async { Ok::<_, SnapshotError>(self.pricing.cache_stats()) }).await
    }

    pub async fn validate_pricing_accuracy(&self, chain_id: u64, block: Option<u64>) -> ToolResult {
        run(PRICING_ORACLE, "accuracy", async {
            self.chains.get(chain_id)?;
            Ok::<_, SnapshotError>(self.pricing.validate_pricing_accuracy(chain_id, block).await)
        })
        .await
    }
}
