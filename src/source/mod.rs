use ethers::types::Address;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::{
    abi::{parse_abi_json, FunctionDescriptor},
    config::ChainRegistry,
    errors::{Result, SnapshotError},
    ledger::{
        proxy::{detect_implementation, ProxyKind},
        LedgerClient,
    },
    utils::{normalize, parse_address},
};

pub mod explorer;
pub mod normalize;

pub use explorer::{EtherscanClient, ExplorerApi, ExplorerSource};
pub use normalize::{normalize_source, NormalizedSource, SourceFragment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Unverified,
}

/// Verified source of a contract. `address` is always the queried address; when a proxy was
/// resolved, the source and ABI belong to `implementation_address`.
#[derive(Debug, Clone, Serialize)]
pub struct ContractSourceRecord {
    pub address: String,
    pub implementation_address: Option<String>,
    pub is_proxy: bool,
    /// `None` when the implementation came from the explorer's own proxy classification.
    pub proxy_kind: Option<ProxyKind>,
    pub source_code: String,
    pub fragments: Vec<SourceFragment>,
    pub contract_name: String,
    pub compiler_version: String,
    pub abi: Vec<FunctionDescriptor>,
    pub raw_abi: Value,
    pub verification_status: VerificationStatus,
    pub chain_id: u64,
    pub block_number: Option<u64>,
}

impl ContractSourceRecord {
    fn from_explorer(chain_id: u64, address: Address, block: Option<u64>, source: ExplorerSource) -> Self {
        let mut record = Self {
            address: normalize(&address),
            implementation_address: None,
            is_proxy: false,
            proxy_kind: None,
            source_code: String::new(),
            fragments: Vec::new(),
            contract_name: String::new(),
            compiler_version: String::new(),
            abi: Vec::new(),
            raw_abi: Value::Null,
            verification_status: VerificationStatus::Verified,
            chain_id,
            block_number: block,
        };
        record.apply_source(source);
        record
    }

    fn apply_source(&mut self, source: ExplorerSource) {
        let NormalizedSource { text, fragments } = normalize_source(&source.source_code);
        self.source_code = text;
        self.fragments = fragments;
        self.contract_name = source.contract_name;
        self.compiler_version = source.compiler_version;
        self.abi = parse_abi_json(&source.abi).unwrap_or_else(|e| {
            warn!("Unreadable ABI for {}: {}", self.address, e);
            Vec::new()
        });
        self.raw_abi = serde_json::from_str(&source.abi).unwrap_or(Value::String(source.abi));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractMetadata {
    pub address: String,
    pub chain_id: u64,
    pub contract_name: Option<String>,
    pub compiler_version: Option<String>,
    pub is_verified: bool,
    pub is_proxy: bool,
}

pub struct SourceFetcher {
    registry: Arc<ChainRegistry>,
    explorer: Arc<dyn ExplorerApi>,
    ledger: Arc<dyn LedgerClient>,
}

impl SourceFetcher {
    pub fn new(
        registry: Arc<ChainRegistry>,
        explorer: Arc<dyn ExplorerApi>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            registry,
            explorer,
            ledger,
        }
    }

    /// Fetches the verified source of `address`, following a proxy to its implementation.
    ///
    /// Proxy detection or implementation fetch failures leave the proxy's own source in place.
    pub async fn fetch(
        &self,
        chain_id: u64,
        address: &str,
        block: Option<u64>,
        resolve_proxies: bool,
    ) -> Result<ContractSourceRecord> {
        self.registry.get(chain_id)?;
        let address = parse_address(address)?;

        let source = self.explorer.fetch_source(chain_id, address).await?;
        let hint = source.implementation_hint.clone();
        let mut record = ContractSourceRecord::from_explorer(chain_id, address, block, source);
        info!(
            "Fetched source of {} ({}, {} chars)",
            record.address,
            record.contract_name,
            record.source_code.len()
        );

        if resolve_proxies {
            self.resolve_proxy(&mut record, address, hint.as_deref()).await;
        }

        Ok(record)
    }

    /// Storage slots first; the explorer's implementation hint only when no slot holds a pointer.
    async fn resolve_proxy(&self, record: &mut ContractSourceRecord, address: Address, hint: Option<&str>) {
        let detected = match detect_implementation(
            self.ledger.as_ref(),
            record.chain_id,
            address,
            record.block_number,
        )
        .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!("Proxy detection failed for {}: {}", record.address, e);
                None
            }
        };

        let (implementation, kind) = match detected {
            Some(info) => (info.implementation, Some(info.kind)),
            None => match hint
                .and_then(|raw| parse_address(raw).ok())
                .filter(|hinted| !hinted.is_zero() && *hinted != address)
            {
                Some(hinted) => (hinted, None),
                None => {
                    debug!("{} is not a proxy", record.address);
                    return;
                }
            },
        };

        info!(
            "Proxy detected: {} -> {:?} ({:?})",
            record.address, implementation, kind
        );

        match self.explorer.fetch_source(record.chain_id, implementation).await {
            Ok(source) => {
                record.apply_source(source);
                record.implementation_address = Some(normalize(&implementation));
                record.proxy_kind = kind;
                record.is_proxy = true;
            }
            Err(e) => warn!(
                "Implementation source fetch failed for {:?}: {}",
                implementation, e
            ),
        }
    }

    /// Name, compiler and verification state without proxy resolution.
    pub async fn get_contract_metadata(&self, chain_id: u64, address: &str) -> Result<ContractMetadata> {
        self.registry.get(chain_id)?;
        let address = parse_address(address)?;

        match self.explorer.fetch_source(chain_id, address).await {
            Ok(source) => Ok(ContractMetadata {
                address: normalize(&address),
                chain_id,
                contract_name: Some(source.contract_name),
                compiler_version: Some(source.compiler_version),
                is_verified: true,
                is_proxy: source.proxy_flag,
            }),
            Err(SnapshotError::Verification(_)) => Ok(ContractMetadata {
                address: normalize(&address),
                chain_id,
                contract_name: None,
                compiler_version: None,
                is_verified: false,
                is_proxy: false,
            }),
            Err(e) => Err(e),
        }
    }
}
