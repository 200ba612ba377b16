mod common;

use ethers::types::H256;
use std::sync::Arc;

use chain_snapshot::{
    errors::{ErrorKind, SnapshotError},
    ledger::proxy::ProxyKind,
    source::{SourceFetcher, VerificationStatus},
};
use common::{addr, hex_addr, registry, FakeExplorer, FakeLedger};

const ERC20_ABI: &str = r#"[
    {"type":"function","name":"totalSupply","stateMutability":"view","inputs":[],"outputs":[{"type":"uint256"}]},
    {"type":"function","name":"transfer","stateMutability":"nonpayable","inputs":[{"type":"address"},{"type":"uint256"}],"outputs":[{"type":"bool"}]}
]"#;

fn fetcher(ledger: FakeLedger, explorer: FakeExplorer) -> (SourceFetcher, Arc<FakeExplorer>) {
    let explorer = Arc::new(explorer);
    (
        SourceFetcher::new(registry(), explorer.clone(), Arc::new(ledger)),
        explorer,
    )
}

#[test_log::test(tokio::test)]
async fn test_plain_contract_source() {
    let explorer = FakeExplorer::new().with_contract(addr(0x11), "Token", "contract Token {}", ERC20_ABI);
    let (fetcher, _) = fetcher(FakeLedger::new(), explorer);

    let record = fetcher.fetch(1, &hex_addr(0x11), Some(18_000_000), true).await.unwrap();
    assert_eq!(record.address, hex_addr(0x11));
    assert!(!record.is_proxy);
    assert_eq!(record.implementation_address, None);
    assert_eq!(record.source_code, "contract Token {}");
    assert_eq!(record.contract_name, "Token");
    assert_eq!(record.abi.len(), 2);
    assert_eq!(record.verification_status, VerificationStatus::Verified);
    assert_eq!(record.block_number, Some(18_000_000));
}

#[test_log::test(tokio::test)]
async fn test_eip1967_proxy_resolves_to_implementation() {
    let proxy = addr(0x22);
    let implementation = addr(0x33);
    let ledger = FakeLedger::new()
        .with_code(proxy, &[0x60, 0x80])
        .with_storage(proxy, ProxyKind::Eip1967.slot(), H256::from(implementation));
    let explorer = FakeExplorer::new()
        .with_contract(proxy, "TransparentUpgradeableProxy", "contract Proxy {}", "[]")
        .with_contract(implementation, "VaultV2", "contract VaultV2 {}", ERC20_ABI);
    let (fetcher, explorer) = fetcher(ledger, explorer);

    let record = fetcher.fetch(1, &hex_addr(0x22), None, true).await.unwrap();
    assert!(record.is_proxy);
    assert_eq!(record.address, hex_addr(0x22));
    assert_eq!(record.implementation_address, Some(hex_addr(0x33)));
    assert_eq!(record.proxy_kind, Some(ProxyKind::Eip1967));
    assert_eq!(record.source_code, "contract VaultV2 {}");
    assert_eq!(record.contract_name, "VaultV2");
    assert_eq!(explorer.requests(), 2);
}

#[test_log::test(tokio::test)]
async fn test_proxy_resolution_disabled() {
    let proxy = addr(0x22);
    let ledger = FakeLedger::new().with_storage(proxy, ProxyKind::Eip1822.slot(), H256::from(addr(0x33)));
    let explorer = FakeExplorer::new()
        .with_contract(proxy, "Proxy", "contract Proxy {}", "[]")
        .with_contract(addr(0x33), "Impl", "contract Impl {}", "[]");
    let (fetcher, explorer) = fetcher(ledger, explorer);

    let record = fetcher.fetch(1, &hex_addr(0x22), None, false).await.unwrap();
    assert!(!record.is_proxy);
    assert_eq!(record.contract_name, "Proxy");
    assert_eq!(explorer.requests(), 1);
}

#[test_log::test(tokio::test)]
async fn test_explorer_hint_resolves_unslotted_proxy() {
    let proxy = addr(0x22);
    let explorer = FakeExplorer::new()
        .with_contract(proxy, "Diamond", "contract Diamond {}", "[]")
        .with_implementation_hint(proxy, &hex_addr(0x55))
        .with_contract(addr(0x55), "Facet", "contract Facet {}", ERC20_ABI);
    let (fetcher, explorer) = fetcher(FakeLedger::new(), explorer);

    let record = fetcher.fetch(1, &hex_addr(0x22), None, true).await.unwrap();
    assert!(record.is_proxy);
    assert_eq!(record.implementation_address, Some(hex_addr(0x55)));
    assert_eq!(record.proxy_kind, None);
    assert_eq!(record.contract_name, "Facet");
    assert_eq!(explorer.requests(), 2);
}

#[test_log::test(tokio::test)]
async fn test_slot_pointer_wins_over_explorer_hint() {
    let proxy = addr(0x22);
    let ledger = FakeLedger::new().with_storage(proxy, ProxyKind::Eip1967.slot(), H256::from(addr(0x33)));
    let explorer = FakeExplorer::new()
        .with_contract(proxy, "Proxy", "contract Proxy {}", "[]")
        .with_implementation_hint(proxy, &hex_addr(0x55))
        .with_contract(addr(0x33), "VaultV3", "contract VaultV3 {}", "[]")
        .with_contract(addr(0x55), "VaultV2", "contract VaultV2 {}", "[]");
    let (fetcher, _) = fetcher(ledger, explorer);

    let record = fetcher.fetch(1, &hex_addr(0x22), None, true).await.unwrap();
    assert_eq!(record.implementation_address, Some(hex_addr(0x33)));
    assert_eq!(record.proxy_kind, Some(ProxyKind::Eip1967));
    assert_eq!(record.contract_name, "VaultV3");
}

#[test_log::test(tokio::test)]
async fn test_unverified_implementation_keeps_proxy_source() {
    let proxy = addr(0x22);
    let ledger = FakeLedger::new().with_storage(proxy, ProxyKind::Eip1967.slot(), H256::from(addr(0x44)));
    let explorer = FakeExplorer::new().with_contract(proxy, "Proxy", "contract Proxy {}", "[]");
    let (fetcher, _) = fetcher(ledger, explorer);

    let record = fetcher.fetch(1, &hex_addr(0x22), None, true).await.unwrap();
    assert!(!record.is_proxy);
    assert_eq!(record.implementation_address, None);
    assert_eq!(record.source_code, "contract Proxy {}");
}

#[test_log::test(tokio::test)]
async fn test_multi_file_source_is_flattened() {
    let raw = r#"{{"language":"Solidity","sources":{"contracts/B.sol":{"content":"contract B {}"},"contracts/A.sol":{"content":"contract A {}"}}}}"#;
    let explorer = FakeExplorer::new().with_contract(addr(0x11), "A", raw, "[]");
    let (fetcher, _) = fetcher(FakeLedger::new(), explorer);

    let record = fetcher.fetch(1, &hex_addr(0x11), None, false).await.unwrap();
    assert_eq!(record.fragments.len(), 2);
    assert_eq!(record.fragments[0].path, "contracts/A.sol");
    assert_eq!(
        record.source_code,
        "// File: contracts/A.sol\ncontract A {}\n\n// File: contracts/B.sol\ncontract B {}"
    );
}

#[test_log::test(tokio::test)]
async fn test_unsupported_chain_and_bad_address() {
    let (fetcher, explorer) = fetcher(FakeLedger::new(), FakeExplorer::new());

    let err = fetcher.fetch(999, &hex_addr(0x11), None, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = fetcher.fetch(1, "0x123", None, true).await.unwrap_err();
    assert!(matches!(err, SnapshotError::Validation(_)));
    assert_eq!(explorer.requests(), 0);
}

#[test_log::test(tokio::test)]
async fn test_metadata_of_unverified_contract() {
    let explorer = FakeExplorer::new().with_contract(addr(0x11), "Token", "contract Token {}", "[]");
    let (fetcher, _) = fetcher(FakeLedger::new(), explorer);

    let verified = fetcher.get_contract_metadata(1, &hex_addr(0x11)).await.unwrap();
    assert!(verified.is_verified);
    assert_eq!(verified.contract_name.as_deref(), Some("Token"));

    let unverified = fetcher.get_contract_metadata(1, &hex_addr(0x55)).await.unwrap();
    assert!(!unverified.is_verified);
    assert_eq!(unverified.contract_name, None);
}
