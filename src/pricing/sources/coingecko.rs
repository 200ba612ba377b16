use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{debug, warn};
use serde_json::Value;
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use super::{PriceQuote, PriceSource, PriceSourceKind};
use crate::{
    config::ChainRegistry,
    errors::{Result, SnapshotError},
    ledger::LedgerClient,
    pricing::tokens::TokenInfo,
};

pub const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";
const API_KEY_HEADER: &str = "x-cg-pro-api-key";

/// Off-chain indexed prices. Historical lookups map the block to its UTC day.
pub struct CoinGeckoSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    ledger: Arc<dyn LedgerClient>,
    chains: Arc<ChainRegistry>,
    limiter: DefaultDirectRateLimiter,
}

impl CoinGeckoSource {
    pub fn new(
        timeout: Duration,
        api_key: Option<String>,
        ledger: Arc<dyn LedgerClient>,
        chains: Arc<ChainRegistry>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let min_interval = if api_key.is_some() {
            Duration::from_millis(1200)
        } else {
            Duration::from_secs(6)
        };
        Ok(Self {
            http,
            base_url: COINGECKO_API.to_string(),
            api_key,
            ledger,
            chains,
            limiter: request_limiter(min_interval),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.limiter = request_limiter(min_interval);
        self
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.throttle().await;

        let mut request = self.http.get(format!("{}/{}", self.base_url, path)).query(query);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            warn!("CoinGecko rate limit hit on {}", path);
            return Err(SnapshotError::TransientSource("coingecko rate limited".to_string()));
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SnapshotError::TransientSource(format!(
                "coingecko HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| SnapshotError::TransientSource(format!("malformed coingecko payload: {}", e)))
    }

    /// Block timestamp from the node, or estimated from the chain's anchor when the node fails.
    async fn block_timestamp(&self, chain_id: u64, block: u64) -> Result<i64> {
        match self.ledger.block_timestamp(chain_id, block).await {
            Ok(ts) => Ok(ts as i64),
            Err(e) => {
                debug!("Estimating timestamp of block {} on chain {}: {}", block, chain_id, e);
                self.chains
                    .get(chain_id)?
                    .estimate_timestamp(block)
                    .ok_or(e)
            }
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Coingecko
    }

    async fn try_price(&self, token: &TokenInfo, block: Option<u64>) -> Result<Option<PriceQuote>> {
        let Some(id) = token.coingecko_id.as_deref() else {
            return Ok(None);
        };

        let price = match block {
            None => {
                let body = self
                    .get_json(
                        "simple/price",
                        &[("ids", id.to_string()), ("vs_currencies", "usd".to_string())],
                    )
                    .await?;
                parse_simple_price(&body, id)
            }
            Some(number) => {
                let timestamp = self.block_timestamp(token.chain_id, number).await?;
                let date = history_date(timestamp).ok_or_else(|| {
                    SnapshotError::Validation(format!("timestamp {} out of range", timestamp))
                })?;
                let body = self
                    .get_json(
                        &format!("coins/{}/history", id),
                        &[("date", date), ("localization", "false".to_string())],
                    )
                    .await?;
                parse_history_price(&body)
            }
        };

        Ok(price
            .filter(|p| *p > 0.0)
            .map(|p| PriceQuote::new(PriceSourceKind::Coingecko, p, block)))
    }
}

/// One request per `min_interval`, no burst. A zero interval disables spacing.
fn request_limiter(min_interval: Duration) -> DefaultDirectRateLimiter {
    let quota = Quota::with_period(min_interval).unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
    RateLimiter::direct(quota)
}

/// `dd-mm-yyyy` UTC date expected by the history endpoint.
pub fn history_date(timestamp: i64) -> Option<String> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%d-%m-%Y").to_string())
}

pub fn parse_simple_price(body: &Value, id: &str) -> Option<f64> {
    body.get(id)?.get("usd")?.as_f64()
}

pub fn parse_history_price(body: &Value) -> Option<f64> {
    body.get("market_data")?.get("current_price")?.get("usd")?.as_f64()
}
