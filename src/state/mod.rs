use ethers::{
    abi::Token,
    types::{Address, H256, U256},
};
use futures::{future::join_all, stream, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use crate::{
    abi::{common_probes, erc20_balance_of, AbiInput, FunctionDescriptor},
    config::ChainRegistry,
    errors::{Result, SnapshotError},
    ledger::{call_function, proxy::detect_implementation, LedgerClient},
    metrics,
    utils::{is_native_alias, normalize, parse_address},
};

/// Per-item result of a batch read. Failures stay in the result map as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Value(T),
    Error(String),
}

impl<T> Outcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Value(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Error(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractStateSnapshot {
    pub address: String,
    pub chain_id: u64,
    pub block_number: Option<u64>,
    pub code_size: usize,
    pub is_proxy: bool,
    pub implementation: Option<String>,
    /// Function name to decoded return value, successful calls only.
    pub state: BTreeMap<String, Value>,
    pub failures: BTreeMap<String, String>,
    pub attempted_functions: Vec<String>,
    pub functions_attempted: usize,
    pub functions_succeeded: usize,
}

/// Storage slot identifier to the 32-byte word as hex.
pub type StorageSlotValues = BTreeMap<String, Outcome<String>>;

/// Holder address to raw balance as a decimal string.
pub type TokenBalances = BTreeMap<String, Outcome<String>>;

pub struct StateReader {
    registry: Arc<ChainRegistry>,
    ledger: Arc<dyn LedgerClient>,
    concurrency: usize,
}

impl StateReader {
    pub fn new(registry: Arc<ChainRegistry>, ledger: Arc<dyn LedgerClient>, concurrency: usize) -> Self {
        Self {
            registry,
            ledger,
            concurrency: concurrency.max(1),
        }
    }

    /// Reads every zero-argument view function of the contract at `block`.
    ///
    /// Candidates are the readable ABI functions, the common probes when `include_common` is set,
    /// and `specific_functions` not covered by either. A failed call only drops that entry.
    pub async fn read(
        &self,
        chain_id: u64,
        address: &str,
        block: Option<u64>,
        abi: Option<&AbiInput>,
        specific_functions: &[String],
        include_common: bool,
    ) -> Result<ContractStateSnapshot> {
        self.registry.get(chain_id)?;
        if address.trim().is_empty() {
            return Err(SnapshotError::Validation("address is required".to_string()));
        }
        let target = parse_address(address)?;

        let code = self.ledger.code_at(chain_id, target, block).await?;
        if code.is_empty() {
            return Err(SnapshotError::Validation(format!(
                "no contract code at {} (block {})",
                normalize(&target),
                block.map_or_else(|| "latest".to_string(), |b| b.to_string())
            )));
        }

        let ledger = self.ledger.as_ref();
        let proxy = match detect_implementation(ledger, chain_id, target, block).await {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("Proxy detection failed for {}: {}", normalize(&target), e);
                None
            }
        };

        let abi_functions = match abi.map(AbiInput::descriptors).transpose() {
            Ok(functions) => functions.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable ABI for {}: {}", normalize(&target), e);
                Vec::new()
            }
        };
        let candidates = candidate_functions(&abi_functions, specific_functions, include_common);
        let attempted_functions: Vec<String> = candidates.iter().map(|f| f.name.clone()).collect();
        debug!("Reading {} functions of {:?}", candidates.len(), target);

        let results: Vec<(String, Result<Value>)> = stream::iter(candidates)
            .map(|function| async move {
                let result = match function.encode_call(&[]) {
                    Ok(data) => match ledger.call(chain_id, target, data, block).await {
                        Ok(output) => function.decode_result(&output),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                };
                (function.name, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut state = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (name, result) in results {
            match result {
                Ok(value) => {
                    state.insert(name, value);
                }
                Err(e) => {
                    debug!("{}() failed on {:?}: {}", name, target, e);
                    failures.insert(name, e.to_string());
                }
            }
        }

        let snapshot = ContractStateSnapshot {
            address: normalize(&target),
            chain_id,
            block_number: block,
            code_size: code.len(),
            is_proxy: proxy.is_some(),
            implementation: proxy.map(|p| normalize(&p.implementation)),
            functions_attempted: attempted_functions.len(),
            functions_succeeded: state.len(),
            attempted_functions,
            state,
            failures,
        };
        metrics::record_state_calls(snapshot.functions_attempted, snapshot.functions_succeeded);
        info!(
            "State read of {}: {}/{} functions succeeded",
            snapshot.address, snapshot.functions_succeeded, snapshot.functions_attempted
        );
        Ok(snapshot)
    }

    /// Raw storage words. Slots are hex (`0x`-prefixed) or decimal identifiers.
    pub async fn read_storage_slots(
        &self,
        chain_id: u64,
        address: &str,
        slots: &[String],
        block: Option<u64>,
    ) -> Result<StorageSlotValues> {
        self.registry.get(chain_id)?;
        let target = parse_address(address)?;
        let ledger = self.ledger.as_ref();

        let reads = slots.iter().map(|slot| async move {
            let outcome = match parse_slot(slot) {
                Ok(key) => ledger
                    .storage_at(chain_id, target, key, block)
                    .await
                    .map(|word| format!("{:?}", word)),
                Err(e) => Err(e),
            };
            (slot.clone(), Outcome::from(outcome))
        });

        Ok(join_all(reads).await.into_iter().collect())
    }

    /// `balanceOf` for every holder, one concurrent call each. The native-token alias reads
    /// account balances instead.
    pub async fn get_token_balances(
        &self,
        chain_id: u64,
        token: &str,
        holders: &[String],
        block: Option<u64>,
    ) -> Result<TokenBalances> {
        self.registry.get(chain_id)?;
        let token = parse_address(token)?;
        let native = is_native_alias(&token);
        let ledger = self.ledger.as_ref();

        let reads = holders.iter().map(|raw| async move {
            let holder = match parse_address(raw) {
                Ok(holder) => holder,
                Err(e) => return (raw.clone(), Outcome::Error(e.to_string())),
            };
            let balance = if native {
                ledger.balance(chain_id, holder, block).await
            } else {
                token_balance(ledger, chain_id, token, holder, block).await
            };
            if let Err(e) = &balance {
                warn!("Balance read failed for holder {:?}: {}", holder, e);
            }
            (normalize(&holder), Outcome::from(balance.map(|b| b.to_string())))
        });

        Ok(join_all(reads).await.into_iter().collect())
    }
}

async fn token_balance(
    ledger: &dyn LedgerClient,
    chain_id: u64,
    token: Address,
    holder: Address,
    block: Option<u64>,
) -> Result<U256> {
    let output = call_function(
        ledger,
        chain_id,
        token,
        &erc20_balance_of(),
        &[Token::Address(holder)],
        block,
    )
    .await?;
    match output.first() {
        Some(Token::Uint(balance)) => Ok(*balance),
        _ => Err(SnapshotError::CallFailed("balanceOf returned no uint".to_string())),
    }
}

fn candidate_functions(
    abi_functions: &[FunctionDescriptor],
    specific_functions: &[String],
    include_common: bool,
) -> Vec<FunctionDescriptor> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for function in abi_functions.iter().filter(|f| f.is_state_readable()) {
        if seen.insert(function.name.clone()) {
            candidates.push(function.clone());
        }
    }

    if include_common {
        for probe in common_probes() {
            if seen.insert(probe.name.clone()) {
                candidates.push(probe);
            }
        }
    }

    for name in specific_functions {
        let name = name.trim();
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        // A zero-input ABI entry keeps its real output types even when it is not marked view.
        let descriptor = abi_functions
            .iter()
            .find(|f| f.name == name && f.input_types.is_empty())
            .cloned()
            .unwrap_or_else(|| FunctionDescriptor::view(name, &["bytes32"]));
        candidates.push(descriptor);
    }

    candidates
}

fn parse_slot(slot: &str) -> Result<H256> {
    let trimmed = slot.trim();
    let value = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex_body) => U256::from_str_radix(hex_body, 16).ok(),
        None => U256::from_dec_str(trimmed).ok(),
    }
    .ok_or_else(|| SnapshotError::Validation(format!("invalid storage slot {}", slot)))?;

    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    Ok(H256(word))
}
