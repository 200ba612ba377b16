use async_trait::async_trait;
use ethers::types::Address;
use log::{debug, info};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

use crate::{
    config::ChainRegistry,
    errors::{Result, SnapshotError},
    utils::normalize,
};

/// One verified-source entry as the explorer returns it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExplorerSource {
    /// Raw `SourceCode` field, not yet normalized.
    pub source_code: String,
    pub abi: String,
    pub contract_name: String,
    pub compiler_version: String,
    /// The explorer's own proxy marker, if it has classified the contract.
    pub proxy_flag: bool,
    pub implementation_hint: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExplorerApi: Send + Sync {
    async fn fetch_source(&self, chain_id: u64, address: Address) -> Result<ExplorerSource>;
}

/// Etherscan-compatible `getsourcecode` client covering legacy and unified multi-chain endpoints.
pub struct EtherscanClient {
    http: reqwest::Client,
    registry: Arc<ChainRegistry>,
}

impl EtherscanClient {
    pub fn new(registry: Arc<ChainRegistry>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, registry })
    }

    pub fn with_client(registry: Arc<ChainRegistry>, http: reqwest::Client) -> Self {
        Self { http, registry }
    }

    fn query(&self, chain_id: u64, address: Address, api_key: &str, unified: bool) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(5);
        if unified {
            params.push(("chainid", chain_id.to_string()));
        }
        params.push(("module", "contract".to_string()));
        params.push(("action", "getsourcecode".to_string()));
        params.push(("address", normalize(&address)));
        params.push(("apikey", api_key.to_string()));
        params
    }
}

#[async_trait]
impl ExplorerApi for EtherscanClient {
    async fn fetch_source(&self, chain_id: u64, address: Address) -> Result<ExplorerSource> {
        let chain = self.registry.get(chain_id)?;
        let api_key = chain.explorer_key()?;
        let params = self.query(chain_id, address, api_key, chain.uses_unified_explorer());

        info!("Fetching verified source for {:?} on chain {}", address, chain_id);
        let response = self.http.get(&chain.explorer_url).query(&params).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("Explorer responded {} with {} bytes", status, body.len());

        parse_source_response(status, &body)
    }
}

/// Interprets a `getsourcecode` HTTP response.
pub fn parse_source_response(status: u16, body: &str) -> Result<ExplorerSource> {
    if !(200..300).contains(&status) {
        let excerpt: String = body.chars().take(500).collect();
        return Err(SnapshotError::TransientSource(format!(
            "explorer HTTP {}: {}",
            status, excerpt
        )));
    }

    let envelope: Value = serde_json::from_str(body).map_err(|e| {
        SnapshotError::TransientSource(format!("malformed explorer payload: {}", e))
    })?;

    if !status_ok(envelope.get("status")) {
        let message = match envelope.get("result") {
            Some(Value::String(result)) if !result.is_empty() => result.clone(),
            _ => field(&envelope, "message").unwrap_or_else(|| "unknown error".to_string()),
        };
        return Err(SnapshotError::TransientSource(format!(
            "explorer returned error: {}",
            message
        )));
    }

    let entry = envelope
        .get("result")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .filter(|entry| entry.is_object())
        .ok_or_else(|| {
            SnapshotError::TransientSource("no source code data returned".to_string())
        })?;

    let source_code = field(entry, "SourceCode").unwrap_or_default();
    if source_code.trim().is_empty() {
        return Err(SnapshotError::Verification(
            "contract source code not verified".to_string(),
        ));
    }

    Ok(ExplorerSource {
        source_code,
        abi: field(entry, "ABI").unwrap_or_else(|| "[]".to_string()),
        contract_name: field(entry, "ContractName").unwrap_or_else(|| "Unknown".to_string()),
        compiler_version: field(entry, "CompilerVersion")
            .unwrap_or_else(|| "Unknown".to_string()),
        proxy_flag: field(entry, "Proxy").as_deref() == Some("1"),
        implementation_hint: field(entry, "Implementation").filter(|s| !s.is_empty()),
    })
}

fn status_ok(status: Option<&Value>) -> bool {
    match status {
        Some(Value::String(s)) => s == "1",
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
