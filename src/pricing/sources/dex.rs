use async_trait::async_trait;
use ethers::{
    abi::Token,
    types::{Address, U256},
};
use log::debug;
use std::{collections::HashMap, sync::Arc};

use super::{PriceQuote, PriceSource, PriceSourceKind};
use crate::{
    abi::{factory_get_pair, pair_get_reserves, pair_token0, router_get_amounts_out},
    config::{BSC, ETHEREUM},
    errors::{Result, SnapshotError},
    ledger::{call_function, LedgerClient},
    pricing::tokens::TokenInfo,
    utils::{address_literal, one_unit, units_to_f64},
};

const WRAPPED_NATIVE_DECIMALS: u8 = 18;

/// V2-style routers of one chain plus the pair used to value its native coin.
#[derive(Debug, Clone)]
pub struct DexRoute {
    pub chain_id: u64,
    pub routers: Vec<(String, Address)>,
    /// Pair factories read for reserve-based historical prices.
    pub factories: Vec<(String, Address)>,
    pub wrapped_native: Address,
    pub stable: Address,
    pub stable_decimals: u8,
}

pub fn default_routes() -> Vec<DexRoute> {
    vec![
        DexRoute {
            chain_id: ETHEREUM,
            routers: vec![
                ("uniswap_v2".to_string(), address_literal("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D")),
                ("sushiswap".to_string(), address_literal("0xd9e1cE17f2641f24aE83637ab66a2cca9C378B9F")),
            ],
            factories: vec![
                ("uniswap_v2".to_string(), address_literal("0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f")),
                ("sushiswap".to_string(), address_literal("0xC0AEe478e3658e2610c5F7A4A2E1777cE9e4f2Ac")),
            ],
            wrapped_native: address_literal("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            stable: address_literal("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            stable_decimals: 6,
        },
        DexRoute {
            chain_id: BSC,
            routers: vec![(
                "pancakeswap_v2".to_string(),
                address_literal("0x10ED43C718714eb63d5aA57B78B54704E256024E"),
            )],
            factories: vec![(
                "pancakeswap_v2".to_string(),
                address_literal("0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"),
            )],
            wrapped_native: address_literal("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"),
            stable: address_literal("0x55d398326f99059fF775485246999027B3197955"),
            stable_decimals: 18,
        },
    ]
}

/// Spot quotes: token -> wrapped native -> reference stablecoin through `getAmountsOut`.
/// Historical blocks fall back to pair reserves when the routers give nothing.
pub struct DexSource {
    ledger: Arc<dyn LedgerClient>,
    routes: HashMap<u64, DexRoute>,
}

impl DexSource {
    pub fn new(ledger: Arc<dyn LedgerClient>, routes: Vec<DexRoute>) -> Self {
        Self {
            ledger,
            routes: routes.into_iter().map(|r| (r.chain_id, r)).collect(),
        }
    }

    /// First router with a positive output wins.
    async fn quote(
        &self,
        route: &DexRoute,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        block: Option<u64>,
    ) -> Result<Option<U256>> {
        let function = router_get_amounts_out();
        let args = [
            Token::Uint(amount_in),
            Token::Array(vec![Token::Address(token_in), Token::Address(token_out)]),
        ];
        let mut last_error = None;

        for (name, router) in &route.routers {
            match call_function(self.ledger.as_ref(), route.chain_id, *router, &function, &args, block).await {
                Ok(tokens) => {
                    let amount_out = match tokens.first() {
                        Some(Token::Array(amounts)) => match amounts.last() {
                            Some(Token::Uint(out)) => *out,
                            _ => U256::zero(),
                        },
                        _ => U256::zero(),
                    };
                    if !amount_out.is_zero() {
                        return Ok(Some(amount_out));
                    }
                    debug!("{} quoted zero for {:?} -> {:?}", name, token_in, token_out);
                }
                Err(e) => {
                    debug!("{} quote failed for {:?} -> {:?}: {}", name, token_in, token_out, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Reserve ratio of the first factory pair holding both tokens, in `token_out` per `token_in`.
    async fn reserves_rate(
        &self,
        route: &DexRoute,
        token_in: (Address, u8),
        token_out: (Address, u8),
        block: Option<u64>,
    ) -> Result<Option<f64>> {
        let ledger = self.ledger.as_ref();
        let pair_args = [Token::Address(token_in.0), Token::Address(token_out.0)];

        for (name, factory) in &route.factories {
            let pair = match call_function(ledger, route.chain_id, *factory, &factory_get_pair(), &pair_args, block)
                .await?
                .first()
            {
                Some(Token::Address(pair)) if !pair.is_zero() => *pair,
                _ => {
                    debug!("{} has no pair for {:?}/{:?}", name, token_in.0, token_out.0);
                    continue;
                }
            };

            let token0 = match call_function(ledger, route.chain_id, pair, &pair_token0(), &[], block)
                .await?
                .first()
            {
                Some(Token::Address(token0)) => *token0,
                _ => continue,
            };
            let reserves = call_function(ledger, route.chain_id, pair, &pair_get_reserves(), &[], block).await?;
            let (reserve0, reserve1) = match (reserves.first(), reserves.get(1)) {
                (Some(Token::Uint(r0)), Some(Token::Uint(r1))) => (*r0, *r1),
                _ => continue,
            };

            let (reserve_in, reserve_out) = if token0 == token_in.0 {
                (reserve0, reserve1)
            } else {
                (reserve1, reserve0)
            };
            if reserve_in.is_zero() || reserve_out.is_zero() {
                continue;
            }
            return Ok(Some(
                units_to_f64(reserve_out, token_out.1) / units_to_f64(reserve_in, token_in.1),
            ));
        }

        Ok(None)
    }

    /// Price of one whole `token_in` in `token_out`.
    async fn rate(
        &self,
        route: &DexRoute,
        token_in: (Address, u8),
        token_out: (Address, u8),
        block: Option<u64>,
    ) -> Result<Option<f64>> {
        let quoted = self
            .quote(route, token_in.0, token_out.0, one_unit(token_in.1), block)
            .await
            .map(|out| out.map(|amount| units_to_f64(amount, token_out.1)));
        if block.is_none() || matches!(quoted, Ok(Some(_))) {
            return quoted;
        }

        match self.reserves_rate(route, token_in, token_out, block).await {
            Ok(Some(rate)) => Ok(Some(rate)),
            Ok(None) => quoted,
            Err(e) => {
                debug!("Reserve pricing failed for {:?}: {}", token_in.0, e);
                quoted
            }
        }
    }

    async fn native_usd(&self, route: &DexRoute, block: Option<u64>) -> Result<Option<f64>> {
        self.rate(
            route,
            (route.wrapped_native, WRAPPED_NATIVE_DECIMALS),
            (route.stable, route.stable_decimals),
            block,
        )
        .await
    }
}

#[async_trait]
impl PriceSource for DexSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Dex
    }

    async fn try_price(&self, token: &TokenInfo, block: Option<u64>) -> Result<Option<PriceQuote>> {
        let Some(route) = self.routes.get(&token.chain_id) else {
            return Ok(None);
        };
        if route.routers.is_empty() {
            return Err(SnapshotError::Configuration(format!(
                "no routers configured for chain {}",
                token.chain_id
            )));
        }

        let price_in_native = match token.address {
            None => 1.0,
            Some(address) if address == route.wrapped_native => 1.0,
            Some(address) => {
                let native = (route.wrapped_native, WRAPPED_NATIVE_DECIMALS);
                match self.rate(route, (address, token.decimals), native, block).await? {
                    Some(rate) => rate,
                    None => return Ok(None),
                }
            }
        };

        let Some(native_usd) = self.native_usd(route, block).await? else {
            return Ok(None);
        };

        Ok(Some(PriceQuote::new(
            PriceSourceKind::Dex,
            price_in_native * native_usd,
            block,
        )))
    }
}
