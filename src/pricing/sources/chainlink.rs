use async_trait::async_trait;
use dashmap::DashMap;
use ethers::{
    abi::Token,
    types::{Address, I256, U256},
};
use log::debug;
use std::sync::Arc;

use super::{PriceQuote, PriceSource, PriceSourceKind};
use crate::{
    abi::{feed_decimals, feed_latest_round_data},
    errors::{Result, SnapshotError},
    ledger::{call_function, LedgerClient},
    pricing::tokens::TokenInfo,
    utils::units_to_f64,
};

const DEFAULT_FEED_DECIMALS: u8 = 8;

/// Reads USD aggregators at the requested block.
pub struct ChainlinkSource {
    ledger: Arc<dyn LedgerClient>,
    decimals: DashMap<(u64, Address), u8>,
}

impl ChainlinkSource {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            decimals: DashMap::new(),
        }
    }

    async fn feed_decimals(&self, chain_id: u64, feed: Address, block: Option<u64>) -> u8 {
        if let Some(decimals) = self.decimals.get(&(chain_id, feed)) {
            return *decimals;
        }

        let decimals = match call_function(self.ledger.as_ref(), chain_id, feed, &feed_decimals(), &[], block).await {
            Ok(tokens) => match tokens.first() {
                Some(Token::Uint(d)) if *d <= U256::from(u8::MAX) => d.as_u32() as u8,
                _ => DEFAULT_FEED_DECIMALS,
            },
            Err(e) => {
                debug!("decimals() unreadable on feed {:?}: {}", feed, e);
                DEFAULT_FEED_DECIMALS
            }
        };
        self.decimals.insert((chain_id, feed), decimals);
        decimals
    }
}

#[async_trait]
impl PriceSource for ChainlinkSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Chainlink
    }

    async fn try_price(&self, token: &TokenInfo, block: Option<u64>) -> Result<Option<PriceQuote>> {
        let Some(feed) = token.price_feed else {
            return Ok(None);
        };

        let decimals = self.feed_decimals(token.chain_id, feed, block).await;
        let round = call_function(
            self.ledger.as_ref(),
            token.chain_id,
            feed,
            &feed_latest_round_data(),
            &[],
            block,
        )
        .await?;

        let answer = match round.get(1) {
            Some(Token::Int(raw)) => I256::from_raw(*raw),
            _ => {
                return Err(SnapshotError::CallFailed(
                    "latestRoundData returned no answer".to_string(),
                ))
            }
        };
        if answer <= I256::zero() {
            debug!("Non-positive answer from feed {:?}", feed);
            return Ok(None);
        }

        let price = units_to_f64(answer.into_raw(), decimals);
        let quote = PriceQuote::new(PriceSourceKind::Chainlink, price, block);
        let updated_at = match round.get(3) {
            Some(Token::Uint(t)) if !t.is_zero() && *t <= U256::from(i64::MAX as u64) => Some(t.as_u64() as i64),
            _ => None,
        };
        Ok(Some(match updated_at {
            Some(t) => quote.observed_at(t),
            None => quote,
        }))
    }
}
