use anyhow::Result;
use ethers::{
    types::{Address, U256},
    utils::format_units,
};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

use crate::errors::SnapshotError;

pub fn setup_logger() -> Result<()> {
    let colors = ColoredLevelConfig {
        trace: Color::Cyan,
        debug: Color::Magenta,
        info: Color::Green,
        warn: Color::Red,
        error: Color::BrightRed,
        ..ColoredLevelConfig::new()
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}] {}",
                chrono::Local::now().format("[%H:%M:%S]"),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stdout())
        .level(LevelFilter::Error)
        .level_for("chain_snapshot", LevelFilter::Info)
        .apply()?;

    Ok(())
}

/// Parses a 40 hex character address, with or without the `0x` prefix.
pub fn parse_address(raw: &str) -> Result<Address, SnapshotError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SnapshotError::Validation(format!(
            "invalid address format: {}",
            raw
        )));
    }

    let bytes = hex::decode(body)
        .map_err(|e| SnapshotError::Validation(format!("invalid address {}: {}", raw, e)))?;
    Ok(Address::from_slice(&bytes))
}

/// Address for a table literal; malformed literals map to the zero address.
pub fn address_literal(raw: &str) -> Address {
    parse_address(raw).unwrap_or_else(|_| Address::zero())
}

/// Gas-currency placeholders: the zero address and `0xeeee...eeee`.
pub fn is_native_alias(address: &Address) -> bool {
    address.is_zero() || *address == Address::repeat_byte(0xee)
}

/// Lowercase, 0x-prefixed form used for every address the crate emits.
pub fn normalize(address: &Address) -> String {
    format!("{:?}", address)
}

/// Converts a raw integer amount with `decimals` places into a float.
/// Amounts that cannot be scaled (77 or more decimals) read as zero.
pub fn units_to_f64(amount: U256, decimals: u8) -> f64 {
    format_units(amount, decimals as u32)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Inverse of `units_to_f64` for whole-token quantities.
pub fn one_unit(decimals: u8) -> U256 {
    U256::exp10(decimals as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let addr = parse_address("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap();
        assert_eq!(normalize(&addr), "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");

        let bare = parse_address("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2").unwrap();
        assert_eq!(addr, bare);
    }

    #[test]
    fn test_parse_address_rejects_malformed() {
        for raw in ["0x123", "", "0xzz2aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "0x0c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"] {
            let err = parse_address(raw).unwrap_err();
            assert!(matches!(err, SnapshotError::Validation(_)), "{}", raw);
        }
    }

    #[test]
    fn test_native_alias() {
        assert!(is_native_alias(&Address::zero()));
        assert!(is_native_alias(
            &parse_address("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE").unwrap()
        ));
        assert!(!is_native_alias(&Address::repeat_byte(0x01)));
    }

    #[test]
    fn test_units_to_f64() {
        assert_eq!(units_to_f64(U256::from(1_500_000u64), 6), 1.5);
        assert_eq!(units_to_f64(U256::from(5u64), 2), 0.05);
        assert_eq!(units_to_f64(U256::from(42u64), 0), 42.0);
        assert_eq!(units_to_f64(one_unit(18), 18), 1.0);
    }

    #[test]
    fn test_units_to_f64_wide_amounts() {
        let answer = U256::from(2_345_670_000_000u64) * one_unit(30);
        assert_eq!(units_to_f64(answer, 40), 234.567);
        let max = units_to_f64(U256::MAX, 18);
        assert!((max / 1.157_920_892_373_162e59 - 1.0).abs() < 1e-9);
        assert_eq!(units_to_f64(U256::from(1u64), 80), 0.0);
    }
}
