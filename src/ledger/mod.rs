use async_trait::async_trait;
use ethers::{
    abi::Token,
    providers::{Http, Middleware, MiddlewareError, Provider},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes,
        TransactionRequest, H256, U256,
    },
};
use log::{debug, info};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use crate::{
    abi::FunctionDescriptor,
    config::ChainRegistry,
    errors::{Result, SnapshotError},
};

pub mod proxy;

/// Read-only view of a chain node. `block = None` reads at the head.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn call(&self, chain_id: u64, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes>;

    async fn storage_at(
        &self,
        chain_id: u64,
        address: Address,
        slot: H256,
        block: Option<u64>,
    ) -> Result<H256>;

    async fn balance(&self, chain_id: u64, address: Address, block: Option<u64>) -> Result<U256>;

    async fn code_at(&self, chain_id: u64, address: Address, block: Option<u64>) -> Result<Bytes>;

    async fn block_timestamp(&self, chain_id: u64, block: u64) -> Result<u64>;
}

/// Encodes `args` for `function`, calls `to` and decodes the return data.
pub async fn call_function(
    ledger: &dyn LedgerClient,
    chain_id: u64,
    to: Address,
    function: &FunctionDescriptor,
    args: &[Token],
    block: Option<u64>,
) -> Result<Vec<Token>> {
    let data = function.encode_call(args)?;
    let output = ledger.call(chain_id, to, data, block).await?;
    function.decode_output(&output)
}

fn block_id(block: Option<u64>) -> Option<BlockId> {
    block.map(|n| BlockId::Number(BlockNumber::Number(n.into())))
}

/// `LedgerClient` over one ethers middleware per chain.
pub struct EthersLedger<M> {
    providers: HashMap<u64, Arc<M>>,
    timeout: Duration,
}

impl EthersLedger<Provider<Http>> {
    pub fn from_registry(registry: &ChainRegistry, timeout: Duration) -> anyhow::Result<Self> {
        let mut ledger = Self::new(timeout);
        for chain in registry.iter() {
            let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())?;
            info!("Registered RPC provider for chain {} ({})", chain.chain_id, chain.name);
            ledger = ledger.with_provider(chain.chain_id, Arc::new(provider));
        }
        Ok(ledger)
    }
}

impl<M: Middleware + 'static> EthersLedger<M> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            timeout,
        }
    }

    pub fn with_provider(mut self, chain_id: u64, provider: Arc<M>) -> Self {
        self.providers.insert(chain_id, provider);
        self
    }

    fn provider(&self, chain_id: u64) -> Result<&Arc<M>> {
        self.providers
            .get(&chain_id)
            .ok_or_else(|| SnapshotError::unsupported_chain(chain_id))
    }

    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, M::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => match e.as_error_response() {
                Some(response) => {
                    debug!("{} rejected by node: {}", what, e);
                    Err(classify_node_error(what, response.code, &response.message))
                }
                None => Err(SnapshotError::TransientSource(format!("{}: {}", what, e))),
            },
            Err(_) => Err(SnapshotError::TransientSource(format!(
                "{} timed out after {:?}",
                what, self.timeout
            ))),
        }
    }
}

const RETRYABLE_CODES: [i64; 4] = [-32005, -32029, -32603, 429];
const THROTTLE_MARKERS: [&str; 5] = [
    "rate limit",
    "too many requests",
    "limit exceeded",
    "capacity",
    "try again",
];

/// Maps a JSON-RPC error object to the failure class of the call.
/// Reverts and bad requests belong to this call alone; throttling and
/// internal node errors are worth retrying.
pub fn classify_node_error(what: &str, code: i64, message: &str) -> SnapshotError {
    let lowered = message.to_lowercase();
    let detail = format!("{}: ({}) {}", what, code, message);

    if code == 3 || lowered.contains("revert") {
        return SnapshotError::CallFailed(detail);
    }
    if RETRYABLE_CODES.contains(&code)
        || THROTTLE_MARKERS.iter().any(|m| lowered.contains(m))
    {
        return SnapshotError::TransientSource(detail);
    }
    SnapshotError::CallFailed(detail)
}

#[async_trait]
impl<M: Middleware + 'static> LedgerClient for EthersLedger<M> {
    async fn call(&self, chain_id: u64, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes> {
        let provider = self.provider(chain_id)?;
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.timed("eth_call", provider.call(&tx, block_id(block))).await
    }

    async fn storage_at(
        &self,
        chain_id: u64,
        address: Address,
        slot: H256,
        block: Option<u64>,
    ) -> Result<H256> {
        let provider = self.provider(chain_id)?;
        self.timed(
            "eth_getStorageAt",
            provider.get_storage_at(address, slot, block_id(block)),
        )
        .await
    }

    async fn balance(&self, chain_id: u64, address: Address, block: Option<u64>) -> Result<U256> {
        let provider = self.provider(chain_id)?;
        self.timed("eth_getBalance", provider.get_balance(address, block_id(block)))
            .await
    }

    async fn code_at(&self, chain_id: u64, address: Address, block: Option<u64>) -> Result<Bytes> {
        let provider = self.provider(chain_id)?;
        self.timed("eth_getCode", provider.get_code(address, block_id(block)))
            .await
    }

    async fn block_timestamp(&self, chain_id: u64, block: u64) -> Result<u64> {
        let provider = self.provider(chain_id)?;
        let header = self
            .timed("eth_getBlockByNumber", provider.get_block(block))
            .await?
            .ok_or_else(|| SnapshotError::TransientSource(format!("block {} not found", block)))?;
        Ok(header.timestamp.as_u64())
    }
}
