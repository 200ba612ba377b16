use ethers::{
    types::{Address, H256, U256},
    utils::keccak256,
};
use log::{debug, warn};
use serde::Serialize;

use super::LedgerClient;
use crate::errors::{Result, SnapshotError};

/// Fixed-slot delegation patterns that are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// keccak256("eip1967.proxy.implementation") - 1
    Eip1967,
    /// keccak256("PROXIABLE"), UUPS
    Eip1822,
}

impl ProxyKind {
    pub fn slot(&self) -> H256 {
        match self {
            ProxyKind::Eip1967 => {
                let hash = U256::from_big_endian(&keccak256("eip1967.proxy.implementation"));
                let mut slot = [0u8; 32];
                (hash - U256::one()).to_big_endian(&mut slot);
                H256(slot)
            }
            ProxyKind::Eip1822 => H256(keccak256("PROXIABLE")),
        }
    }
}

const DETECTION_ORDER: [ProxyKind; 2] = [ProxyKind::Eip1967, ProxyKind::Eip1822];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyInfo {
    pub kind: ProxyKind,
    pub slot: H256,
    pub implementation: Address,
}

/// The address held in the low 20 bytes of a storage word, if non-zero.
pub fn address_from_slot(word: H256) -> Option<Address> {
    let address = Address::from_slice(&word.as_bytes()[12..]);
    (!address.is_zero()).then_some(address)
}

/// Looks for an implementation pointer behind `address` at `block`.
///
/// Returns `Ok(None)` when no known slot holds a usable pointer. A pointer equal to `address`
/// itself is ignored. Slot read errors only surface when every slot failed to read.
pub async fn detect_implementation(
    ledger: &dyn LedgerClient,
    chain_id: u64,
    address: Address,
    block: Option<u64>,
) -> Result<Option<ProxyInfo>> {
    let mut last_error: Option<SnapshotError> = None;
    let mut read_any = false;

    for kind in DETECTION_ORDER {
        let slot = kind.slot();
        match ledger.storage_at(chain_id, address, slot, block).await {
            Ok(word) => {
                read_any = true;
                if let Some(implementation) = address_from_slot(word) {
                    if implementation != address {
                        debug!("{:?} proxy at {:?} -> {:?}", kind, address, implementation);
                        return Ok(Some(ProxyInfo {
                            kind,
                            slot,
                            implementation,
                        }));
                    }
                }
            }
            Err(e) => {
                warn!("Proxy slot read failed for {:?} ({:?}): {}", address, kind, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !read_any => Err(e),
        _ => Ok(None),
    }
}
