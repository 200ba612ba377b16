mod common;

use ethers::{
    abi::{encode, Token},
    types::{Bytes, H256, U256},
};
use serde_json::json;
use std::sync::Arc;

use chain_snapshot::{
    abi::{erc20_balance_of, AbiInput, FunctionDescriptor},
    errors::{ErrorKind, SnapshotError},
    ledger::proxy::ProxyKind,
    state::{Outcome, StateReader},
};
use common::{addr, hex_addr, registry, FakeLedger};

const TOKEN_ABI: &str = r#"[
    {"type":"function","name":"totalSupply","stateMutability":"view","inputs":[],"outputs":[{"type":"uint256"}]},
    {"type":"function","name":"transfer","stateMutability":"nonpayable","inputs":[{"type":"address"},{"type":"uint256"}],"outputs":[{"type":"bool"}]}
]"#;

fn calldata(name: &str) -> Bytes {
    FunctionDescriptor::view(name, &[]).encode_call(&[]).unwrap()
}

fn returns(tokens: &[Token]) -> chain_snapshot::errors::Result<Bytes> {
    Ok(Bytes::from(encode(tokens)))
}

fn token_ledger() -> FakeLedger {
    let token = addr(0x11);
    FakeLedger::new()
        .with_code(token, &[0x60, 0x80, 0x60, 0x40])
        .with_call(token, calldata("totalSupply"), returns(&[Token::Uint(U256::from(1_000_000u64))]))
        .with_call(token, calldata("name"), returns(&[Token::String("Snapshot Token".into())]))
        .with_call(token, calldata("symbol"), returns(&[Token::String("SNAP".into())]))
        .with_call(token, calldata("decimals"), returns(&[Token::Uint(U256::from(18u8))]))
}

fn reader(ledger: FakeLedger) -> (StateReader, Arc<FakeLedger>) {
    let ledger = Arc::new(ledger);
    (StateReader::new(registry(), ledger.clone(), 4), ledger)
}

#[test_log::test(tokio::test)]
async fn test_read_state_with_abi_and_probes() {
    let (reader, _) = reader(token_ledger());
    let abi = AbiInput::Json(TOKEN_ABI.to_string());

    let snapshot = reader
        .read(1, &hex_addr(0x11), Some(19_000_000), Some(&abi), &["getReserves".to_string()], true)
        .await
        .unwrap();

    assert_eq!(snapshot.address, hex_addr(0x11));
    assert_eq!(snapshot.code_size, 4);
    assert!(!snapshot.is_proxy);
    assert_eq!(snapshot.state["totalSupply"], json!("1000000"));
    assert_eq!(snapshot.state["name"], json!("Snapshot Token"));
    assert_eq!(snapshot.state["symbol"], json!("SNAP"));
    assert_eq!(snapshot.state["decimals"], json!("18"));
    assert!(!snapshot.attempted_functions.contains(&"transfer".to_string()));
    assert!(snapshot.failures.contains_key("getReserves"));
    assert!(snapshot.failures.contains_key("owner"));

    assert_eq!(snapshot.functions_succeeded, 4);
    assert_eq!(snapshot.functions_attempted, snapshot.attempted_functions.len());
    assert!(snapshot.functions_succeeded <= snapshot.functions_attempted);
    for key in snapshot.state.keys() {
        assert!(snapshot.attempted_functions.contains(key), "{} was not attempted", key);
    }
}

#[test_log::test(tokio::test)]
async fn test_read_state_without_common_probes() {
    let (reader, ledger) = reader(token_ledger());
    let abi = AbiInput::Json(TOKEN_ABI.to_string());

    let snapshot = reader.read(1, &hex_addr(0x11), None, Some(&abi), &[], false).await.unwrap();
    assert_eq!(snapshot.attempted_functions, vec!["totalSupply".to_string()]);
    assert_eq!(snapshot.functions_succeeded, 1);
    assert_eq!(ledger.calls(), 1);
}

#[test_log::test(tokio::test)]
async fn test_malformed_abi_falls_back_to_probes() {
    let (reader, _) = reader(token_ledger());
    let abi = AbiInput::Json("not json".to_string());

    let snapshot = reader.read(1, &hex_addr(0x11), None, Some(&abi), &[], true).await.unwrap();
    assert_eq!(snapshot.state["symbol"], json!("SNAP"));
    assert!(snapshot.failures.contains_key("paused"));
}

#[test_log::test(tokio::test)]
async fn test_read_state_rejects_bad_input() {
    let (reader, ledger) = reader(token_ledger());

    let err = reader.read(999, &hex_addr(0x11), None, None, &[], true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = reader.read(1, "0x123", None, None, &[], true).await.unwrap_err();
    assert!(matches!(err, SnapshotError::Validation(_)));
    assert_eq!(ledger.calls(), 0);

    // account without code
    let err = reader.read(1, &hex_addr(0x99), None, None, &[], true).await.unwrap_err();
    assert!(matches!(err, SnapshotError::Validation(_)));
}

#[test_log::test(tokio::test)]
async fn test_read_state_reports_proxy() {
    let proxy = addr(0x11);
    let ledger = token_ledger().with_storage(proxy, ProxyKind::Eip1967.slot(), H256::from(addr(0x77)));
    let (reader, _) = reader(ledger);

    let snapshot = reader.read(1, &hex_addr(0x11), None, None, &[], false).await.unwrap();
    assert!(snapshot.is_proxy);
    assert_eq!(snapshot.implementation, Some(hex_addr(0x77)));
    assert_eq!(snapshot.functions_attempted, 0);
}

#[test_log::test(tokio::test)]
async fn test_storage_slots() {
    let target = addr(0x11);
    let ledger = FakeLedger::new()
        .with_storage(target, H256::zero(), H256::from_low_u64_be(42))
        .with_storage(target, H256::from_low_u64_be(5), H256::from_low_u64_be(7));
    let (reader, _) = reader(ledger);

    let slots = vec!["0x0".to_string(), "5".to_string(), "zz".to_string()];
    let values = reader.read_storage_slots(1, &hex_addr(0x11), &slots, None).await.unwrap();

    assert_eq!(values.len(), 3);
    assert_eq!(values["0x0"], Outcome::Value(format!("{:?}", H256::from_low_u64_be(42))));
    assert_eq!(values["5"], Outcome::Value(format!("{:?}", H256::from_low_u64_be(7))));
    assert!(!values["zz"].is_value());
}

#[test_log::test(tokio::test)]
async fn test_token_balances_isolate_reverting_holder() {
    let token = addr(0x11);
    let holders: Vec<u8> = vec![0xa1, 0xa2, 0xa3, 0xa4, 0xa5];

    let mut ledger = FakeLedger::new().with_code(token, &[0x60]);
    for (i, byte) in holders.iter().enumerate() {
        if *byte == 0xa3 {
            continue;
        }
        let data = erc20_balance_of()
            .encode_call(&[Token::Address(addr(*byte))])
            .unwrap();
        ledger = ledger.with_call(token, data, returns(&[Token::Uint(U256::from(100 * (i as u64 + 1)))]));
    }
    let (reader, _) = reader(ledger);

    let raw_holders: Vec<String> = holders.iter().map(|b| hex_addr(*b)).collect();
    let balances = reader
        .get_token_balances(1, &hex_addr(0x11), &raw_holders, Some(19_000_000))
        .await
        .unwrap();

    assert_eq!(balances.len(), 5);
    assert_eq!(balances.values().filter(|o| o.is_value()).count(), 4);
    assert!(!balances[&hex_addr(0xa3)].is_value());
    assert_eq!(balances[&hex_addr(0xa1)], Outcome::Value("100".to_string()));
    assert_eq!(balances[&hex_addr(0xa5)], Outcome::Value("500".to_string()));
}

#[test_log::test(tokio::test)]
async fn test_native_balances() {
    let ledger = FakeLedger::new().with_balance(addr(0xa1), U256::exp10(18));
    let (reader, ledger) = reader(ledger);

    let holders = vec![hex_addr(0xa1), hex_addr(0xa2), "bogus".to_string()];
    let balances = reader
        .get_token_balances(1, "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE", &holders, None)
        .await
        .unwrap();

    assert_eq!(balances[&hex_addr(0xa1)], Outcome::Value("1000000000000000000".to_string()));
    assert_eq!(balances[&hex_addr(0xa2)], Outcome::Value("0".to_string()));
    assert!(!balances["bogus"].is_value());
    assert_eq!(ledger.calls(), 0);
}
