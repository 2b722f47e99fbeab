//! Yahoo Finance latest close for stocks and `SYM-USD` crypto pairs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;
use yahoo_finance_api as yahoo;

use super::PriceSource;
use crate::error::PriceError;
use crate::holding::AssetClass;

const SOURCE_ID: &str = "YAHOO";

pub struct Yahoo {
    class: AssetClass,
    timeout: Duration,
}

impl Yahoo {
    pub fn new(class: AssetClass, timeout: Duration) -> Yahoo {
        Yahoo { class, timeout }
    }

    fn ticker(&self, symbol: &str) -> String {
        match self.class {
            AssetClass::Crypto => format!("{symbol}-USD"),
            AssetClass::Stock => symbol.to_string(),
        }
    }
}

fn provider_error(e: yahoo::YahooError) -> PriceError {
    PriceError::Provider {
        source_id: SOURCE_ID,
        message: e.to_string(),
    }
}

// An empty chart is "no quote", anything else is a provider failure
fn classify(e: yahoo::YahooError) -> Result<Option<f64>, PriceError> {
    match e {
        yahoo::YahooError::NoResult | yahoo::YahooError::NoQuotes => Ok(None),
        e => Err(provider_error(e)),
    }
}

// Get the latest close for a ticker, bounded by the request timeout
async fn get_quote_price(
    connector: &yahoo::YahooConnector,
    ticker: &str,
    timeout: Duration,
) -> Result<Option<f64>, PriceError> {
    let response = tokio::time::timeout(timeout, connector.get_latest_quotes(ticker, "1d"))
        .await
        .map_err(|_| PriceError::Timeout { source_id: SOURCE_ID })?;

    match response.and_then(|response| response.last_quote()) {
        Ok(quote) => Ok(Some(quote.close)),
        Err(e) => classify(e),
    }
}

#[async_trait]
impl PriceSource for Yahoo {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, f64>, PriceError> {
        let connector = yahoo::YahooConnector::new().map_err(provider_error)?;
        let tickers: Vec<String> = symbols.iter().map(|s| self.ticker(s)).collect();

        let results = join_all(
            tickers
                .iter()
                .map(|ticker| get_quote_price(&connector, ticker, self.timeout)),
        )
        .await;

        let mut prices = HashMap::new();
        let mut last_error = None;
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(Some(price)) => {
                    prices.insert(symbol.clone(), price);
                }
                Ok(None) => debug!(%symbol, "Yahoo has no quote"),
                Err(e) => {
                    debug!(%symbol, "Yahoo quote failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        // a partial answer still beats none; only a total failure is an error
        match last_error {
            Some(e) if prices.is_empty() => Err(e),
            _ => Ok(prices),
        }
    }
}
