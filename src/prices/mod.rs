//! Live USD prices with a fallback chain.
//!
//! Sources are tried in order. Whatever a source cannot price falls through
//! to the next one, then to the last cached quote, then to a fixed default.
//! Fetching prices never fails; problems surface as warnings on the board.

mod alpha_vantage;
mod coingecko;
mod yahoo;

pub use alpha_vantage::AlphaVantage;
pub use coingecko::CoinGecko;
pub use yahoo::Yahoo;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::PriceError;
use crate::holding::{is_stable_asset, AssetClass};

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Short constant name used in logs and warnings.
    fn id(&self) -> &'static str;

    /// USD prices for as many of `symbols` as the source knows.
    ///
    /// Symbols the source cannot price are simply absent from the map.
    async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, f64>, PriceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteOrigin {
    Live(&'static str),
    Cached,
    Stale,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub symbol: String,
    pub usd_price: f64,
    pub fetched_at: DateTime<Utc>,
    pub origin: QuoteOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    Partial,
}

/// Result of one price lookup: a quote for every requested symbol.
#[derive(Debug, Clone, Default)]
pub struct PriceBoard {
    pub quotes: HashMap<String, PriceQuote>,
    pub warnings: Vec<String>,
}

impl PriceBoard {
    pub fn prices(&self) -> HashMap<String, f64> {
        self.quotes
            .iter()
            .map(|(symbol, quote)| (symbol.clone(), quote.usd_price))
            .collect()
    }

    pub fn status(&self) -> NetworkStatus {
        let degraded = self
            .quotes
            .values()
            .filter(|q| matches!(q.origin, QuoteOrigin::Stale | QuoteOrigin::Fallback))
            .count();
        if degraded == 0 {
            NetworkStatus::Connected
        } else if degraded == self.quotes.len() {
            NetworkStatus::Disconnected
        } else {
            NetworkStatus::Partial
        }
    }
}

/// In-process quote cache. Expired entries are kept as a last resort.
#[derive(Debug)]
pub struct QuoteCache {
    ttl: chrono::Duration,
    entries: HashMap<String, PriceQuote>,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> QuoteCache {
        QuoteCache {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            entries: HashMap::new(),
        }
    }

    pub fn fresh(&self, symbol: &str, now: DateTime<Utc>) -> Option<&PriceQuote> {
        self.entries
            .get(symbol)
            .filter(|q| now - q.fetched_at < self.ttl)
    }

    pub fn any(&self, symbol: &str) -> Option<&PriceQuote> {
        self.entries.get(symbol)
    }

    pub fn put(&mut self, quote: PriceQuote) {
        self.entries.insert(quote.symbol.clone(), quote);
    }
}

pub struct PriceChain {
    sources: Vec<Arc<dyn PriceSource>>,
    cache: Mutex<QuoteCache>,
}

impl PriceChain {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, cache_ttl: Duration) -> PriceChain {
        PriceChain {
            sources,
            cache: Mutex::new(QuoteCache::new(cache_ttl)),
        }
    }

    /// Default chain for an asset class.
    ///
    /// Crypto: CoinGecko, then Yahoo. Stocks: Alpha Vantage when a key is
    /// configured, then Yahoo.
    pub fn for_class(class: AssetClass, cfg: &Config) -> PriceChain {
        let timeout = Duration::from_secs(cfg.request_timeout_secs);
        let mut sources: Vec<Arc<dyn PriceSource>> = Vec::new();

        match class {
            AssetClass::Crypto => match CoinGecko::new(timeout) {
                Ok(source) => sources.push(Arc::new(source)),
                Err(e) => warn!("CoinGecko unavailable: {e}"),
            },
            AssetClass::Stock => {
                if let Some(key) = cfg.alpha_vantage_key() {
                    match AlphaVantage::new(key, timeout) {
                        Ok(source) => sources.push(Arc::new(source)),
                        Err(e) => warn!("Alpha Vantage unavailable: {e}"),
                    }
                }
            }
        }
        sources.push(Arc::new(Yahoo::new(class, timeout)));

        PriceChain::new(sources, Duration::from_secs(cfg.price_cache_ttl_secs))
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, QuoteCache> {
        // a poisoned cache is still a usable cache
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn quotes(&self, symbols: &[String]) -> PriceBoard {
        let now = Utc::now();
        let mut board = PriceBoard::default();
        let mut pending: Vec<String> = Vec::new();

        {
            let cache = self.lock_cache();
            for symbol in symbols {
                if board.quotes.contains_key(symbol) || pending.contains(symbol) {
                    continue;
                }
                match cache.fresh(symbol, now) {
                    Some(quote) => {
                        debug!(%symbol, "price served from cache");
                        board.quotes.insert(
                            symbol.clone(),
                            PriceQuote {
                                origin: QuoteOrigin::Cached,
                                ..quote.clone()
                            },
                        );
                    }
                    None => pending.push(symbol.clone()),
                }
            }
        }

        for source in &self.sources {
            if pending.is_empty() {
                break;
            }
            match source.fetch(&pending).await {
                Ok(prices) => {
                    let fetched_at = Utc::now();
                    let mut cache = self.lock_cache();
                    pending.retain(|symbol| match prices.get(symbol) {
                        Some(&price) if price.is_finite() && price > 0.0 => {
                            let quote = PriceQuote {
                                symbol: symbol.clone(),
                                usd_price: price,
                                fetched_at,
                                origin: QuoteOrigin::Live(source.id()),
                            };
                            cache.put(quote.clone());
                            board.quotes.insert(symbol.clone(), quote);
                            false
                        }
                        _ => true,
                    });
                    if !pending.is_empty() {
                        debug!(source = source.id(), missing = ?pending, "source left symbols unpriced");
                    }
                }
                Err(e) => {
                    warn!(source = source.id(), "price source failed: {e}");
                    board.warnings.push(format!("{}: {e}", source.id()));
                }
            }
        }

        if pending.is_empty() {
            return board;
        }

        let cache = self.lock_cache();
        for symbol in pending {
            match cache.any(&symbol) {
                Some(quote) => {
                    board
                        .warnings
                        .push(format!("{symbol}: live price unavailable, using last known price"));
                    board.quotes.insert(
                        symbol,
                        PriceQuote {
                            origin: QuoteOrigin::Stale,
                            ..quote.clone()
                        },
                    );
                }
                None => {
                    let usd_price = if is_stable_asset(&symbol) { 1.0 } else { 0.0 };
                    board
                        .warnings
                        .push(format!("{symbol}: no price available, using {usd_price:.2}"));
                    board.quotes.insert(
                        symbol.clone(),
                        PriceQuote {
                            symbol,
                            usd_price,
                            fetched_at: now,
                            origin: QuoteOrigin::Fallback,
                        },
                    );
                }
            }
        }
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        id: &'static str,
        prices: HashMap<String, f64>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(id: &'static str, prices: &[(&str, f64)]) -> Arc<FixedSource> {
            Arc::new(FixedSource {
                id,
                prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceSource for FixedSource {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, f64>, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(symbols
                .iter()
                .filter_map(|s| self.prices.get(s).map(|p| (s.clone(), *p)))
                .collect())
        }
    }

    struct FailingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for FailingSource {
        fn id(&self) -> &'static str {
            "FAILING"
        }

        async fn fetch(&self, _symbols: &[String]) -> Result<HashMap<String, f64>, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PriceError::RateLimited { source_id: "FAILING" })
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_primary_failure_uses_secondary() {
        let failing = Arc::new(FailingSource { calls: AtomicUsize::new(0) });
        let secondary = FixedSource::new("SECONDARY", &[("BTC", 60000.0)]);
        let chain = PriceChain::new(vec![failing.clone(), secondary], Duration::from_secs(60));

        let board = chain.quotes(&symbols(&["BTC"])).await;
        assert_eq!(board.prices()["BTC"], 60000.0);
        assert_eq!(board.quotes["BTC"].origin, QuoteOrigin::Live("SECONDARY"));
        assert_eq!(board.warnings.len(), 1);
        assert_eq!(board.status(), NetworkStatus::Connected);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_primary_falls_through_per_symbol() {
        let primary = FixedSource::new("PRIMARY", &[("BTC", 60000.0), ("ETH", 0.0)]);
        let secondary = FixedSource::new("SECONDARY", &[("ETH", 3000.0), ("BTC", 1.0)]);
        let chain = PriceChain::new(vec![primary, secondary], Duration::from_secs(60));

        let prices = chain.quotes(&symbols(&["BTC", "ETH"])).await.prices();
        assert_eq!(prices["BTC"], 60000.0);
        assert_eq!(prices["ETH"], 3000.0);
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_network() {
        let source = FixedSource::new("PRIMARY", &[("BTC", 60000.0)]);
        let chain = PriceChain::new(vec![source.clone()], Duration::from_secs(60));

        chain.quotes(&symbols(&["BTC"])).await;
        let board = chain.quotes(&symbols(&["BTC", "BTC"])).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(board.quotes["BTC"].origin, QuoteOrigin::Cached);
        assert_eq!(board.quotes.len(), 1);
    }

    #[tokio::test]
    async fn test_all_sources_fail_returns_cached_values_unchanged() {
        let chain = PriceChain::new(vec![Arc::new(FailingSource { calls: AtomicUsize::new(0) })], Duration::ZERO);
        let earlier = PriceQuote {
            symbol: "ETH".to_string(),
            usd_price: 2500.0,
            fetched_at: Utc::now() - chrono::Duration::hours(1),
            origin: QuoteOrigin::Live("PRIMARY"),
        };
        chain.lock_cache().put(earlier.clone());

        let board = chain.quotes(&symbols(&["ETH"])).await;
        let quote = &board.quotes["ETH"];
        assert_eq!(quote.usd_price, earlier.usd_price);
        assert_eq!(quote.fetched_at, earlier.fetched_at);
        assert_eq!(quote.origin, QuoteOrigin::Stale);
        assert_eq!(board.status(), NetworkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_no_price_anywhere_uses_defaults() {
        let chain = PriceChain::new(vec![Arc::new(FailingSource { calls: AtomicUsize::new(0) })], Duration::from_secs(60));
        let board = chain.quotes(&symbols(&["DOGE", "USDT"])).await;
        assert_eq!(board.prices()["DOGE"], 0.0);
        assert_eq!(board.prices()["USDT"], 1.0);
        assert_eq!(board.quotes["DOGE"].origin, QuoteOrigin::Fallback);
    }

    #[tokio::test]
    async fn test_mixed_origins_report_partial() {
        let source = FixedSource::new("PRIMARY", &[("BTC", 60000.0)]);
        let chain = PriceChain::new(vec![source], Duration::from_secs(60));
        let board = chain.quotes(&symbols(&["BTC", "XYZ"])).await;
        assert_eq!(board.status(), NetworkStatus::Partial);
    }
}
