#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chain_snapshot::{
    config::ChainRegistry,
    errors::{Result, SnapshotError},
    ledger::LedgerClient,
    pricing::{
        cache::PriceCache,
        fallback::FallbackTable,
        sources::{PriceQuote, PriceSource, PriceSourceKind},
        tokens::{TokenInfo, TokenRegistry},
        PricingOracle,
    },
    source::{ExplorerApi, ExplorerSource, SourceFetcher},
    state::StateReader,
    tools::Toolkit,
};

pub fn registry() -> Arc<ChainRegistry> {
    Arc::new(ChainRegistry::with_defaults(Some("test-key".to_string())))
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn hex_addr(byte: u8) -> String {
    format!("{:?}", addr(byte))
}

/// In-memory chain: bytecode, storage words, balances and canned call results keyed by calldata.
#[derive(Default)]
pub struct FakeLedger {
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, H256), H256>,
    balances: HashMap<Address, U256>,
    calls: HashMap<(Address, Bytes), Result<Bytes>>,
    pub call_count: AtomicUsize,
    pub storage_reads: AtomicUsize,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, address: Address, code: &[u8]) -> Self {
        self.code.insert(address, Bytes::from(code.to_vec()));
        self
    }

    pub fn with_storage(mut self, address: Address, slot: H256, word: H256) -> Self {
        self.storage.insert((address, slot), word);
        self
    }

    pub fn with_balance(mut self, address: Address, balance: U256) -> Self {
        self.balances.insert(address, balance);
        self
    }

    pub fn with_call(mut self, to: Address, data: Bytes, result: Result<Bytes>) -> Self {
        self.calls.insert((to, data), result);
        self
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn call(&self, _chain_id: u64, to: Address, data: Bytes, _block: Option<u64>) -> Result<Bytes> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .get(&(to, data))
            .cloned()
            .unwrap_or_else(|| Err(SnapshotError::CallFailed("execution reverted".to_string())))
    }

    async fn storage_at(
        &self,
        _chain_id: u64,
        address: Address,
        slot: H256,
        _block: Option<u64>,
    ) -> Result<H256> {
        self.storage_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.storage.get(&(address, slot)).copied().unwrap_or_default())
    }

    async fn balance(&self, _chain_id: u64, address: Address, _block: Option<u64>) -> Result<U256> {
        Ok(self.balances.get(&address).copied().unwrap_or_default())
    }

    async fn code_at(&self, _chain_id: u64, address: Address, _block: Option<u64>) -> Result<Bytes> {
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }

    async fn block_timestamp(&self, _chain_id: u64, block: u64) -> Result<u64> {
        Ok(1_700_000_000 + block)
    }
}

/// Explorer with a fixed set of verified contracts; everything else is unverified.
#[derive(Default)]
pub struct FakeExplorer {
    sources: HashMap<Address, ExplorerSource>,
    pub requests: AtomicUsize,
}

impl FakeExplorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(mut self, address: Address, name: &str, source_code: &str, abi: &str) -> Self {
        self.sources.insert(
            address,
            ExplorerSource {
                source_code: source_code.to_string(),
                abi: abi.to_string(),
                contract_name: name.to_string(),
                compiler_version: "v0.8.19+commit.7dd6d404".to_string(),
                ..Default::default()
            },
        );
        self
    }

    /// Marks `address` as a proxy in the explorer's own classification.
    pub fn with_implementation_hint(mut self, address: Address, implementation: &str) -> Self {
        if let Some(source) = self.sources.get_mut(&address) {
            source.proxy_flag = true;
            source.implementation_hint = Some(implementation.to_string());
        }
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExplorerApi for FakeExplorer {
    async fn fetch_source(&self, _chain_id: u64, address: Address) -> Result<ExplorerSource> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.sources.get(&address).cloned().ok_or_else(|| {
            SnapshotError::Verification(format!("source not verified for {:?}", address))
        })
    }
}

/// Price tier answering with fixed prices per symbol and counting every attempt.
pub struct CountingSource {
    kind: PriceSourceKind,
    prices: HashMap<String, f64>,
    pub attempts: AtomicUsize,
}

impl CountingSource {
    pub fn new(kind: PriceSourceKind, prices: &[(&str, f64)]) -> Self {
        Self {
            kind,
            prices: prices.iter().map(|(s, p)| (s.to_uppercase(), *p)).collect(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for CountingSource {
    fn kind(&self) -> PriceSourceKind {
        self.kind
    }

    async fn try_price(&self, token: &TokenInfo, block: Option<u64>) -> Result<Option<PriceQuote>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .prices
            .get(&token.symbol.to_uppercase())
            .map(|price| PriceQuote::new(self.kind, *price, block)))
    }
}

pub fn oracle(live_sources: Vec<Arc<dyn PriceSource>>) -> PricingOracle {
    PricingOracle::new(
        Arc::new(TokenRegistry::with_defaults()),
        Arc::new(PriceCache::new(Duration::from_secs(3600))),
        live_sources,
        FallbackTable::with_defaults(),
        Duration::from_secs(2),
    )
}

pub fn toolkit(ledger: Arc<FakeLedger>, explorer: Arc<FakeExplorer>, pricing: PricingOracle) -> Toolkit {
    let chains = registry();
    Toolkit::new(
        chains.clone(),
        SourceFetcher::new(chains.clone(), explorer, ledger.clone()),
        StateReader::new(chains, ledger, 4),
        pricing,
    )
}
