use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Assets priced at one US dollar when no quote is available.
const STABLE_ASSETS: [&str; 3] = ["USDT", "USDC", "DAI"];

const DEFAULT_RATE: f64 = 14.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Stock,
}

impl AssetClass {
    pub fn all() -> [AssetClass; 2] {
        [AssetClass::Crypto, AssetClass::Stock]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "crypto",
            AssetClass::Stock => "stock",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "Crypto",
            AssetClass::Stock => "Stocks",
        }
    }

    /// Settings key of the USD -> local currency exchange rate.
    pub fn rate_key(&self) -> String {
        format!("{}_rate", self.as_str())
    }

    /// Settings key of the total amount invested, in local currency.
    pub fn invested_key(&self) -> String {
        format!("{}_invested", self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "crypto" => Ok(AssetClass::Crypto),
            "stock" | "stocks" => Ok(AssetClass::Stock),
            _ => Err(ValidationError::UnknownAssetClass(s.to_string())),
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    symbol: String,
    quantity: f64,
}

impl Holding {
    pub fn new(symbol: &str, quantity: f64) -> Result<Holding, ValidationError> {
        let symbol = normalize_symbol(symbol)?;
        if !quantity.is_finite() {
            return Err(ValidationError::InvalidQuantity(quantity.to_string()));
        }
        if quantity < 0.0 {
            return Err(ValidationError::NegativeQuantity(quantity));
        }
        Ok(Holding { symbol, quantity })
    }

    pub fn get_symbol(&self) -> &str {
        &self.symbol
    }

    pub fn get_quantity(&self) -> f64 {
        self.quantity
    }

    pub fn is_stable(&self) -> bool {
        is_stable_asset(&self.symbol)
    }
}

pub fn is_stable_asset(symbol: &str) -> bool {
    STABLE_ASSETS.contains(&symbol)
}

pub fn normalize_symbol(symbol: &str) -> Result<String, ValidationError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ValidationError::SymbolRequired);
    }
    Ok(symbol)
}

pub fn parse_quantity(input: &str) -> Result<f64, ValidationError> {
    let trimmed = input.trim();
    let quantity = trimmed
        .parse::<f64>()
        .map_err(|_| ValidationError::InvalidQuantity(trimmed.to_string()))?;
    if !quantity.is_finite() {
        return Err(ValidationError::InvalidQuantity(trimmed.to_string()));
    }
    if quantity < 0.0 {
        return Err(ValidationError::NegativeQuantity(quantity));
    }
    Ok(quantity)
}

pub fn parse_amount(input: &str) -> Result<f64, ValidationError> {
    let trimmed = input.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ValidationError::InvalidNumber(trimmed.to_string())),
    }
}

/// Settings and holdings of one asset class as found in the legacy JSON files.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyAccount {
    pub rate: f64,
    pub invested: f64,
    pub holdings: Vec<Holding>,
}

#[derive(Debug, Deserialize)]
struct LegacyCryptoFile {
    #[serde(default = "default_rate")]
    crypto_rate: f64,
    #[serde(default)]
    crypto_investment: f64,
    #[serde(default)]
    crypto_holdings: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct LegacyStockFile {
    #[serde(default = "default_rate")]
    rate: f64,
    #[serde(default)]
    invested: f64,
    #[serde(default)]
    assets: HashMap<String, Value>,
}

fn default_rate() -> f64 {
    DEFAULT_RATE
}

pub fn default_exchange_rate() -> f64 {
    DEFAULT_RATE
}

// quantities were stored as numbers or strings; anything else counts as zero
fn coerce_quantity(value: &Value) -> f64 {
    let quantity = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if quantity.is_finite() && quantity >= 0.0 {
        quantity
    } else {
        0.0
    }
}

fn legacy_holdings(raw: HashMap<String, Value>) -> Vec<Holding> {
    let mut holdings: Vec<Holding> = raw
        .iter()
        .filter_map(|(symbol, qty)| Holding::new(symbol, coerce_quantity(qty)).ok())
        .collect();
    holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    holdings
}

pub fn legacy_account_from_str(
    class: AssetClass,
    data: &str,
) -> Result<LegacyAccount, serde_json::Error> {
    match class {
        AssetClass::Crypto => {
            let file: LegacyCryptoFile = serde_json::from_str(data)?;
            Ok(LegacyAccount {
                rate: file.crypto_rate,
                invested: file.crypto_investment,
                holdings: legacy_holdings(file.crypto_holdings),
            })
        }
        AssetClass::Stock => {
            let file: LegacyStockFile = serde_json::from_str(data)?;
            Ok(LegacyAccount {
                rate: file.rate,
                invested: file.invested,
                holdings: legacy_holdings(file.assets),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyHistoryEntry {
    timestamp: String,
    #[serde(alias = "value_ghs")]
    value: f64,
}

/// Parses a legacy history file into `(timestamp, value)` pairs.
///
/// Entries with an unreadable timestamp are skipped.
pub fn legacy_history_from_str(data: &str) -> Result<Vec<(DateTime<Utc>, f64)>, serde_json::Error> {
    let entries: Vec<LegacyHistoryEntry> = serde_json::from_str(data)?;
    let mut points: Vec<(DateTime<Utc>, f64)> = entries
        .into_iter()
        .filter_map(|e| parse_timestamp(&e.timestamp).map(|ts| (ts, e.value)))
        .collect();
    points.sort_by_key(|(ts, _)| *ts);
    Ok(points)
}

pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_asset_class_from_str() {
        assert_eq!("Crypto".parse::<AssetClass>().unwrap(), AssetClass::Crypto);
        assert_eq!("stocks".parse::<AssetClass>().unwrap(), AssetClass::Stock);
        assert!("bonds".parse::<AssetClass>().is_err());
        assert_eq!(AssetClass::Stock.rate_key(), "stock_rate");
        assert_eq!(AssetClass::Crypto.invested_key(), "crypto_invested");
    }

    #[test]
    fn test_holding_validation() {
        let holding = Holding::new(" btc ", 0.5).unwrap();
        assert_eq!(holding.get_symbol(), "BTC");
        assert!(matches!(
            Holding::new("", 1.0),
            Err(ValidationError::SymbolRequired)
        ));
        assert!(matches!(
            Holding::new("ETH", -1.0),
            Err(ValidationError::NegativeQuantity(_))
        ));
        assert!(Holding::new("USDT", 10.0).unwrap().is_stable());
    }

    #[test]
    fn test_holding_rejects_non_finite_quantity() {
        for quantity in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                Holding::new("BTC", quantity),
                Err(ValidationError::InvalidQuantity(_))
            ));
        }
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("1.25").unwrap(), 1.25);
        assert!(matches!(
            parse_quantity("abc"),
            Err(ValidationError::InvalidQuantity(_))
        ));
        assert!(matches!(
            parse_quantity("-3"),
            Err(ValidationError::NegativeQuantity(_))
        ));
    }

    #[test]
    fn test_legacy_crypto_file() {
        let data = r#"{
            "crypto_rate": 15.2,
            "crypto_investment": 1000,
            "crypto_holdings": {"BTC": 0.01, "ETH": "0.5", "SOL": "oops"}
        }"#;
        let account = legacy_account_from_str(AssetClass::Crypto, data).unwrap();
        assert_eq!(account.rate, 15.2);
        assert_eq!(account.invested, 1000.0);
        let symbols: Vec<_> = account.holdings.iter().map(|h| h.get_symbol()).collect();
        assert_eq!(symbols, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(account.holdings[1].get_quantity(), 0.5);
        assert_eq!(account.holdings[2].get_quantity(), 0.0);
    }

    #[test]
    fn test_legacy_stock_file_defaults() {
        let account = legacy_account_from_str(AssetClass::Stock, r#"{"assets": {"AAPL": 3}}"#)
            .unwrap();
        assert_eq!(account.rate, DEFAULT_RATE);
        assert_eq!(account.invested, 0.0);
        assert_eq!(account.holdings.len(), 1);
    }

    #[test]
    fn test_legacy_history_mixed_formats() {
        let data = r#"[
            {"timestamp": "2025-02-01T10:30:00.123456", "value": 120.0},
            {"timestamp": "2025-01-15", "value_ghs": 100.0},
            {"timestamp": "not a date", "value": 1.0}
        ]"#;
        let points = legacy_history_from_str(data).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].1, 100.0);
        assert_eq!(points[0].0.day(), 15);
        assert_eq!(points[1].0.hour(), 10);
    }
}
