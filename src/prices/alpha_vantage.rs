//! Alpha Vantage equity quotes via the GLOBAL_QUOTE endpoint.
//!
//! Note: the free tier allows only a handful of calls per minute and
//! answers throttled calls with HTTP 200 and a `Note`/`Information` body.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::PriceSource;
use crate::error::PriceError;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const SOURCE_ID: &str = "ALPHA_VANTAGE";

pub struct AlphaVantage {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
}

/// Alpha Vantage spells share classes with a dot.
fn provider_symbol(symbol: &str) -> String {
    symbol.replace('-', ".")
}

/// Price from a GLOBAL_QUOTE body; `Ok(None)` when the symbol is unknown.
fn parse_quote(body: &str) -> Result<Option<f64>, PriceError> {
    let response: GlobalQuoteResponse =
        serde_json::from_str(body).map_err(|e| PriceError::Malformed {
            source_id: SOURCE_ID,
            message: e.to_string(),
        })?;

    if response.note.is_some() || response.information.is_some() {
        return Err(PriceError::RateLimited { source_id: SOURCE_ID });
    }
    if let Some(message) = response.error_message {
        return Err(PriceError::Provider {
            source_id: SOURCE_ID,
            message,
        });
    }

    match response.quote.and_then(|q| q.price) {
        Some(price) => price
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| PriceError::Malformed {
                source_id: SOURCE_ID,
                message: format!("price '{price}': {e}"),
            }),
        None => Ok(None),
    }
}

impl AlphaVantage {
    pub fn new(api_key: String, timeout: Duration) -> Result<AlphaVantage, PriceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(AlphaVantage { client, api_key })
    }

    async fn fetch_one(&self, symbol: &str) -> Result<Option<f64>, PriceError> {
        let av_symbol = provider_symbol(symbol);
        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", av_symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PriceError::Timeout { source_id: SOURCE_ID }
                } else {
                    PriceError::Network(e)
                }
            })?;
        let body = response.text().await?;
        parse_quote(&body)
    }
}

#[async_trait]
impl PriceSource for AlphaVantage {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, f64>, PriceError> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self.fetch_one(symbol).await {
                Ok(Some(price)) => {
                    prices.insert(symbol.clone(), price);
                }
                Ok(None) => debug!(%symbol, "Alpha Vantage has no quote"),
                // once throttled every further call fails too; hand the rest to the next source
                Err(PriceError::RateLimited { source_id }) if !prices.is_empty() => {
                    warn!("{source_id} rate limit reached after {} symbols", prices.len());
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_quote() {
        let body = r#"{"Global Quote": {"01. symbol": "AAPL", "05. price": "189.8400"}}"#;
        assert_eq!(parse_quote(body).unwrap(), Some(189.84));
    }

    #[test]
    fn test_unknown_symbol_is_empty_quote() {
        assert_eq!(parse_quote(r#"{"Global Quote": {}}"#).unwrap(), None);
    }

    #[test]
    fn test_throttle_note_is_rate_limit() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#;
        assert!(matches!(
            parse_quote(body),
            Err(PriceError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_error_message_is_provider_error() {
        let body = r#"{"Error Message": "Invalid API call."}"#;
        assert!(matches!(parse_quote(body), Err(PriceError::Provider { .. })));
    }

    #[test]
    fn test_share_class_symbol() {
        assert_eq!(provider_symbol("BRK-B"), "BRK.B");
        assert_eq!(provider_symbol("AAPL"), "AAPL");
    }
}
