//! CoinGecko spot prices for the supported coins.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::PriceSource;
use crate::error::PriceError;

const BASE_URL: &str = "https://api.coingecko.com/api/v3/simple/price";
const SOURCE_ID: &str = "COINGECKO";

/// Ticker symbol to CoinGecko coin id.
static COIN_IDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("BTC", "bitcoin"),
        ("ETH", "ethereum"),
        ("SOL", "solana"),
        ("BNB", "binancecoin"),
        ("XRP", "ripple"),
        ("ADA", "cardano"),
        ("DOGE", "dogecoin"),
        ("DOT", "polkadot"),
        ("LTC", "litecoin"),
        ("USDT", "tether"),
        ("USDC", "usd-coin"),
    ])
});

pub struct CoinGecko {
    client: Client,
}

impl CoinGecko {
    pub fn new(timeout: Duration) -> Result<CoinGecko, PriceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(CoinGecko { client })
    }
}

/// Maps a `{coin_id: {"usd": price}}` body back to ticker symbols.
fn parse_prices(symbols: &[String], body: &str) -> Result<HashMap<String, f64>, PriceError> {
    let data: HashMap<String, HashMap<String, f64>> =
        serde_json::from_str(body).map_err(|e| PriceError::Malformed {
            source_id: SOURCE_ID,
            message: e.to_string(),
        })?;

    Ok(symbols
        .iter()
        .filter_map(|symbol| {
            let id = COIN_IDS.get(symbol.as_str())?;
            let price = data.get(*id)?.get("usd")?;
            Some((symbol.clone(), *price))
        })
        .collect())
}

#[async_trait]
impl PriceSource for CoinGecko {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, f64>, PriceError> {
        let ids: Vec<&str> = symbols
            .iter()
            .filter_map(|s| COIN_IDS.get(s.as_str()).copied())
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        debug!(ids = ?ids, "requesting CoinGecko prices");
        let response = self
            .client
            .get(BASE_URL)
            .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PriceError::Timeout { source_id: SOURCE_ID }
                } else {
                    PriceError::Network(e)
                }
            })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceError::RateLimited { source_id: SOURCE_ID });
        }
        if !response.status().is_success() {
            return Err(PriceError::Provider {
                source_id: SOURCE_ID,
                message: format!("HTTP {}", response.status()),
            });
        }

        let body = response.text().await?;
        parse_prices(symbols, &body)
    }
}
